// Justo DRM Core - content licensing for the Justo reader
// Copyright (C) 2025 Justo contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! AES-256-GCM envelope decryption
//!
//! # Algorithm
//! 1. Check the key is 32 bytes (before touching the cipher)
//! 2. Check IV and tag lengths are ones GCM can be instantiated with
//! 3. Decrypt `ciphertext || authTag` with the tag length taken from the envelope
//! 4. Return the whole plaintext, or an error and nothing
//!
//! # Accepted Lengths
//! - IV: 12 bytes nominal; 16 bytes accepted with a warning (wrapped keys
//!   use it). Anything else is a malformed envelope.
//! - Tag: 12 to 16 bytes (96 to 128 bits).
//!
//! The library only decrypts. Tests build their ciphertexts with `aes-gcm`
//! directly.

use crate::crypto::encoding::Base64Codec;
use crate::crypto::envelope::{EncryptedEnvelope, NOMINAL_IV_LENGTH};
use crate::crypto::key::{SymmetricKey, KEY_LENGTH};
use crate::error::DecryptionError;
use aes::Aes256;
use aes_gcm::aead::consts::{U12, U13, U14, U15, U16};
use aes_gcm::aead::generic_array::{ArrayLength, GenericArray};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, TagSize};
use tracing::warn;
use zeroize::Zeroizing;

/// Decrypted asset bytes (EPUB zip or MP3), zeroized on drop
pub struct PlaintextAsset(Zeroizing<Vec<u8>>);

impl PlaintextAsset {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Base64 rendering for consumers that take text (the book web view)
    pub fn to_base64(&self, codec: &dyn Base64Codec) -> String {
        codec.encode(&self.0)
    }
}

impl From<Vec<u8>> for PlaintextAsset {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl std::fmt::Debug for PlaintextAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlaintextAsset({} bytes)", self.0.len())
    }
}

/// Decrypt an envelope with a validated key
pub fn decrypt(envelope: &EncryptedEnvelope, key: &SymmetricKey) -> Result<PlaintextAsset, DecryptionError> {
    open(key.as_bytes(), envelope).map(PlaintextAsset::from)
}

/// Decrypt and return base64 text
pub fn decrypt_to_base64(
    envelope: &EncryptedEnvelope,
    key: &SymmetricKey,
    codec: &dyn Base64Codec,
) -> Result<String, DecryptionError> {
    decrypt(envelope, key).map(|plaintext| plaintext.to_base64(codec))
}

/// Decrypt with key bytes of unknown length
///
/// Rejects anything but 32 bytes with `KeyLengthInvalid` before any AEAD work.
pub fn decrypt_with_key_bytes(envelope: &EncryptedEnvelope, key: &[u8]) -> Result<PlaintextAsset, DecryptionError> {
    if key.len() != KEY_LENGTH {
        return Err(DecryptionError::KeyLengthInvalid {
            expected: KEY_LENGTH,
            actual: key.len(),
        });
    }
    open(key, envelope).map(PlaintextAsset::from)
}

/// Raw AES-256-GCM open of a normalized envelope
///
/// Shared with the preshared key unwrap, which uses a 16-byte IV.
pub(crate) fn open(key: &[u8], envelope: &EncryptedEnvelope) -> Result<Vec<u8>, DecryptionError> {
    if key.len() != KEY_LENGTH {
        return Err(DecryptionError::KeyLengthInvalid {
            expected: KEY_LENGTH,
            actual: key.len(),
        });
    }
    let tag_bits = envelope.tag_length_bits();
    if tag_bits == 0 {
        return Err(DecryptionError::MalformedEnvelope("auth tag is empty".to_string()));
    }
    if !(96..=128).contains(&tag_bits) {
        return Err(DecryptionError::MalformedEnvelope(format!(
            "unsupported tag length of {} bits",
            tag_bits
        )));
    }
    let iv = envelope.iv();
    if iv.len() != NOMINAL_IV_LENGTH {
        warn!(iv_len = iv.len(), "IV length differs from the recommended 12 bytes for GCM");
    }

    let sealed = Zeroizing::new(envelope.sealed_payload());

    macro_rules! open_for_nonce {
        ($nonce:ty) => {
            match tag_bits {
                96 => open_sized::<$nonce, U12>(key, iv, &sealed),
                104 => open_sized::<$nonce, U13>(key, iv, &sealed),
                112 => open_sized::<$nonce, U14>(key, iv, &sealed),
                120 => open_sized::<$nonce, U15>(key, iv, &sealed),
                _ => open_sized::<$nonce, U16>(key, iv, &sealed),
            }
        };
    }

    match iv.len() {
        12 => open_for_nonce!(U12),
        16 => open_for_nonce!(U16),
        other => Err(DecryptionError::MalformedEnvelope(format!(
            "unsupported IV length of {} bytes",
            other
        ))),
    }
}

fn open_sized<N, T>(key: &[u8], iv: &[u8], sealed: &[u8]) -> Result<Vec<u8>, DecryptionError>
where
    N: ArrayLength<u8>,
    T: TagSize,
{
    let cipher = AesGcm::<Aes256, N, T>::new_from_slice(key).map_err(|_| DecryptionError::KeyLengthInvalid {
        expected: KEY_LENGTH,
        actual: key.len(),
    })?;
    cipher
        .decrypt(GenericArray::from_slice(iv), sealed)
        .map_err(|_| DecryptionError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encoding::StandardBase64;
    use crate::crypto::envelope::{ConcatenatedLayout, EnvelopeForm, JsonEnvelope};
    use aes_gcm::aead::AeadInPlace;
    use aes_gcm::Aes256Gcm;

    const KEY: [u8; 32] = [0x42; 32];

    fn seal(key: &[u8; 32], iv: &[u8; 12], plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let cipher = Aes256Gcm::new_from_slice(key).unwrap();
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(iv), b"", &mut buffer)
            .unwrap();
        (buffer, tag.to_vec())
    }

    fn key() -> SymmetricKey {
        SymmetricKey::from_slice(&KEY).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let iv = [7u8; 12];
        let (ct, tag) = seal(&KEY, &iv, b"HELLO WORLD");
        let env = EncryptedEnvelope::new(iv.to_vec(), tag, ct).unwrap();
        let plaintext = decrypt(&env, &key()).unwrap();
        assert_eq!(plaintext.as_bytes(), b"HELLO WORLD");
    }

    #[test]
    fn test_base64_entry_point() {
        let iv = [1u8; 12];
        let (ct, tag) = seal(&KEY, &iv, b"chapter one");
        let env = EncryptedEnvelope::new(iv.to_vec(), tag, ct).unwrap();
        let b64 = decrypt_to_base64(&env, &key(), &StandardBase64).unwrap();
        assert_eq!(StandardBase64.decode(&b64).unwrap(), b"chapter one");
    }

    #[test]
    fn test_flipped_tag_bit_fails_authentication() {
        let iv = [3u8; 12];
        let (ct, mut tag) = seal(&KEY, &iv, b"some audio frames");
        for bit in 0..8 {
            tag[5] ^= 1 << bit;
            let env = EncryptedEnvelope::new(iv.to_vec(), tag.clone(), ct.clone()).unwrap();
            assert_eq!(decrypt(&env, &key()).unwrap_err(), DecryptionError::AuthenticationFailed);
            tag[5] ^= 1 << bit;
        }
    }

    #[test]
    fn test_flipped_ciphertext_fails_authentication() {
        let iv = [3u8; 12];
        let (mut ct, tag) = seal(&KEY, &iv, b"some audio frames");
        ct[0] ^= 0x80;
        let env = EncryptedEnvelope::new(iv.to_vec(), tag, ct).unwrap();
        assert_eq!(decrypt(&env, &key()).unwrap_err(), DecryptionError::AuthenticationFailed);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let iv = [3u8; 12];
        let (ct, tag) = seal(&KEY, &iv, b"secret");
        let env = EncryptedEnvelope::new(iv.to_vec(), tag, ct).unwrap();
        let other = SymmetricKey::from_slice(&[0x43; 32]).unwrap();
        assert_eq!(decrypt(&env, &other).unwrap_err(), DecryptionError::AuthenticationFailed);
    }

    #[test]
    fn test_key_length_checked_first() {
        // Envelope is garbage; the key length error must win.
        let env = EncryptedEnvelope::new(vec![0; 5], vec![0; 3], vec![]).unwrap();
        for len in [0usize, 16, 24, 31, 33, 64] {
            let err = decrypt_with_key_bytes(&env, &vec![0u8; len]).unwrap_err();
            assert_eq!(err, DecryptionError::KeyLengthInvalid { expected: 32, actual: len });
        }
    }

    #[test]
    fn test_unsupported_iv_length() {
        let env = EncryptedEnvelope::new(vec![0; 8], vec![0; 16], vec![1]).unwrap();
        assert!(matches!(decrypt(&env, &key()), Err(DecryptionError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_unsupported_tag_length() {
        let env = EncryptedEnvelope::new(vec![0; 12], vec![0; 4], vec![1]).unwrap();
        assert!(matches!(decrypt(&env, &key()), Err(DecryptionError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_sixteen_byte_iv_is_accepted() {
        let iv = [5u8; 16];
        let cipher = AesGcm::<Aes256, U16>::new_from_slice(&KEY).unwrap();
        let mut buffer = b"wrapped".to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .unwrap();
        let env = EncryptedEnvelope::new(iv.to_vec(), tag.to_vec(), buffer).unwrap();
        assert_eq!(decrypt(&env, &key()).unwrap().as_bytes(), b"wrapped");
    }

    #[test]
    fn test_truncated_tag_is_supported() {
        let iv = [9u8; 12];
        let cipher = AesGcm::<Aes256, U12, U12>::new_from_slice(&KEY).unwrap();
        let mut buffer = b"short tag".to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .unwrap();
        let env = EncryptedEnvelope::new(iv.to_vec(), tag.to_vec(), buffer).unwrap();
        assert_eq!(env.tag_length_bits(), 96);
        assert_eq!(decrypt(&env, &key()).unwrap().as_bytes(), b"short tag");
    }

    #[test]
    fn test_both_forms_decrypt_identically() {
        let iv = [0u8; 12];
        let (ct, tag) = seal(&KEY, &iv, b"HELLO WORLD");
        let codec = StandardBase64;

        let json = EnvelopeForm::Json(JsonEnvelope {
            iv: Some(codec.encode(&iv)),
            auth_tag: Some(codec.encode(&tag)),
            content: Some(codec.encode(&ct)),
        });
        let mut blob = iv.to_vec();
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&ct);
        let concatenated = EnvelopeForm::Concatenated {
            bytes: blob,
            layout: ConcatenatedLayout::ASSET_BODY,
        };

        let from_json = decrypt(&json.normalize(&codec).unwrap(), &key()).unwrap();
        let from_blob = decrypt(&concatenated.normalize(&codec).unwrap(), &key()).unwrap();
        assert_eq!(from_json.as_bytes(), from_blob.as_bytes());
        assert_eq!(from_json.as_bytes(), b"HELLO WORLD");
    }

    #[test]
    fn test_empty_plaintext() {
        let iv = [2u8; 12];
        let (ct, tag) = seal(&KEY, &iv, b"");
        let env = EncryptedEnvelope::new(iv.to_vec(), tag, ct).unwrap();
        let plaintext = decrypt(&env, &key()).unwrap();
        assert!(plaintext.is_empty());
    }
}

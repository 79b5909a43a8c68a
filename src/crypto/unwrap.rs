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


//! License key unwrapping
//!
//! The license server never sends a bare content key. Two wrappings exist:
//!
//! ## RSA (books)
//! `protectedKey` is base64 RSA ciphertext made with the public key we sent
//! in the license request. Decrypting with the matching private key yields
//! the key material (hex, base64 or raw, see `crypto::key`).
//!
//! ## Preshared AES-GCM (audio)
//! `protectedKey` is base64 of `iv(16) || authTag(16) || ciphertext`,
//! sealed under a 32-byte master key shipped with the app build.
//!
//! Which scheme applies is chosen per asset kind, unless the license payload
//! names a scheme itself. Both reject wrong lengths instead of coercing them.

use crate::crypto::encoding::Base64Codec;
use crate::crypto::envelope::{ConcatenatedLayout, EncryptedEnvelope};
use crate::crypto::gcm;
use crate::crypto::key::{SymmetricKey, KEY_LENGTH};
use crate::crypto::keypair::{parse_private_key_pem, KeyPair};
use crate::error::{DecryptionError, UnwrapError};
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// RSA padding used by the license server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsaPadding {
    /// OAEP with SHA-256 and MGF1-SHA-256
    #[default]
    OaepSha256,
    /// OAEP with SHA-1, the Android `OAEPPadding` default
    OaepSha1,
    /// PKCS#1 v1.5
    Pkcs1v15,
}

/// Wire name of a key delivery scheme, as named in configuration and license payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnwrapScheme {
    #[serde(rename = "rsa", alias = "RSA")]
    Rsa,
    #[serde(rename = "aes-gcm", alias = "aes_gcm", alias = "preshared")]
    PresharedAes,
}

impl UnwrapScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnwrapScheme::Rsa => "rsa",
            UnwrapScheme::PresharedAes => "aes-gcm",
        }
    }
}

/// How the symmetric key is recovered from a license
#[derive(Clone)]
pub enum KeyUnwrapStrategy {
    /// Decrypt with the access's private key
    RsaUnwrap { padding: RsaPadding },
    /// AES-256-GCM open with an application master key
    PresharedAesUnwrap { master_key: SymmetricKey },
}

impl KeyUnwrapStrategy {
    pub fn scheme(&self) -> UnwrapScheme {
        match self {
            KeyUnwrapStrategy::RsaUnwrap { .. } => UnwrapScheme::Rsa,
            KeyUnwrapStrategy::PresharedAesUnwrap { .. } => UnwrapScheme::PresharedAes,
        }
    }

    /// Recover the content key
    ///
    /// `key_pair` is the pair generated for this access; the preshared scheme
    /// ignores it.
    pub fn unwrap_key(
        &self,
        protected_key: &str,
        key_pair: &KeyPair,
        codec: &dyn Base64Codec,
    ) -> Result<SymmetricKey, UnwrapError> {
        match self {
            KeyUnwrapStrategy::RsaUnwrap { padding } => {
                unwrap_rsa(protected_key, key_pair.private_key(), *padding, codec)
            }
            KeyUnwrapStrategy::PresharedAesUnwrap { master_key } => {
                unwrap_preshared(protected_key, master_key, codec)
            }
        }
    }
}

impl std::fmt::Debug for KeyUnwrapStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyUnwrapStrategy::RsaUnwrap { padding } => {
                f.debug_struct("RsaUnwrap").field("padding", padding).finish()
            }
            KeyUnwrapStrategy::PresharedAesUnwrap { .. } => {
                f.debug_struct("PresharedAesUnwrap").field("master_key", &"[REDACTED]").finish()
            }
        }
    }
}

/// Scheme A: RSA-decrypt a base64 protected key
pub fn unwrap_rsa(
    protected_key: &str,
    private_key: &RsaPrivateKey,
    padding: RsaPadding,
    codec: &dyn Base64Codec,
) -> Result<SymmetricKey, UnwrapError> {
    let ciphertext = codec
        .decode(protected_key)
        .map_err(|e| UnwrapError::InvalidEncoding(format!("protected key is not base64: {}", e)))?;
    if ciphertext.is_empty() {
        return Err(UnwrapError::InvalidEncoding("protected key is empty".to_string()));
    }

    let material = match padding {
        RsaPadding::OaepSha256 => private_key.decrypt(Oaep::new::<sha2::Sha256>(), &ciphertext),
        RsaPadding::OaepSha1 => private_key.decrypt(Oaep::new::<sha1::Sha1>(), &ciphertext),
        RsaPadding::Pkcs1v15 => private_key.decrypt(Pkcs1v15Encrypt, &ciphertext),
    }
    .map(Zeroizing::new)
    .map_err(|e| UnwrapError::RsaDecryptFailed(e.to_string()))?;

    SymmetricKey::from_key_material(&material, codec)
}

/// Scheme A over PEM text, returning the key as hex
pub fn unwrap_rsa_to_hex(
    protected_key: &str,
    private_key_pem: &str,
    padding: RsaPadding,
    codec: &dyn Base64Codec,
) -> Result<Zeroizing<String>, UnwrapError> {
    let private_key = parse_private_key_pem(private_key_pem)?;
    unwrap_rsa(protected_key, &private_key, padding, codec).map(|key| key.to_hex())
}

/// Scheme B: open `iv(16) || authTag(16) || ciphertext` with the master key
pub fn unwrap_preshared(
    protected_key: &str,
    master_key: &SymmetricKey,
    codec: &dyn Base64Codec,
) -> Result<SymmetricKey, UnwrapError> {
    let payload = codec
        .decode(protected_key)
        .map_err(|e| UnwrapError::InvalidEncoding(format!("protected key is not base64: {}", e)))?;

    let layout = ConcatenatedLayout::WRAPPED_KEY;
    if payload.len() < layout.header_len() {
        return Err(UnwrapError::PayloadTooShort {
            minimum: layout.header_len(),
            actual: payload.len(),
        });
    }

    let envelope = EncryptedEnvelope::from_concatenated(&payload, layout).map_err(map_decryption_error)?;
    let material = gcm::open(master_key.as_bytes(), &envelope)
        .map(Zeroizing::new)
        .map_err(map_decryption_error)?;

    SymmetricKey::from_key_material(&material, codec)
}

/// Scheme B over base64 text, returning the key as base64
pub fn unwrap_preshared_to_base64(
    protected_key: &str,
    master_key_base64: &str,
    codec: &dyn Base64Codec,
) -> Result<Zeroizing<String>, UnwrapError> {
    let master_key = SymmetricKey::from_base64(master_key_base64, codec)?;
    unwrap_preshared(protected_key, &master_key, codec).map(|key| key.to_base64(codec))
}

fn map_decryption_error(err: DecryptionError) -> UnwrapError {
    match err {
        DecryptionError::AuthenticationFailed => UnwrapError::AuthenticationFailed,
        DecryptionError::KeyLengthInvalid { actual, .. } => UnwrapError::KeyLengthInvalid {
            expected: KEY_LENGTH,
            actual,
        },
        DecryptionError::MalformedEnvelope(message) => UnwrapError::InvalidEncoding(message),
    }
}

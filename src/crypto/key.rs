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


//! AES-256 content keys
//!
//! # Key Material Forms
//! The license server does not agree with itself on how an unwrapped key is
//! spelled. After removing the RSA or AES-GCM wrapping the bytes may be:
//! - 32 raw bytes
//! - 64 hex characters
//! - base64 text decoding to 32 bytes
//!
//! `SymmetricKey::from_key_material` accepts all three. Anything else is
//! rejected with a key length error; nothing is truncated or padded.
//!
//! # Lifetime
//! A key lives for one asset access and is zeroized on drop.

use crate::crypto::encoding::Base64Codec;
use crate::error::UnwrapError;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// AES-256 key length in bytes
pub const KEY_LENGTH: usize = 32;

/// 32-byte AES-256 key, zeroized on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    /// Create a key from exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, UnwrapError> {
        if bytes.len() != KEY_LENGTH {
            return Err(UnwrapError::KeyLengthInvalid {
                expected: KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Decode a base64 key (e.g. a configured master key)
    pub fn from_base64(text: &str, codec: &dyn Base64Codec) -> Result<Self, UnwrapError> {
        let bytes = Zeroizing::new(
            codec
                .decode(text)
                .map_err(|e| UnwrapError::InvalidEncoding(format!("key is not base64: {}", e)))?,
        );
        Self::from_slice(&bytes)
    }

    /// Decode a 64-character hex key
    pub fn from_hex(text: &str) -> Result<Self, UnwrapError> {
        let bytes = Zeroizing::new(
            hex::decode(text.trim())
                .map_err(|e| UnwrapError::InvalidEncoding(format!("key is not hex: {}", e)))?,
        );
        Self::from_slice(&bytes)
    }

    /// Normalize unwrapped key material into a key
    ///
    /// Raw bytes win when the material is already 32 bytes long, so a raw key
    /// that happens to be printable is never re-decoded.
    pub fn from_key_material(material: &[u8], codec: &dyn Base64Codec) -> Result<Self, UnwrapError> {
        if material.len() == KEY_LENGTH {
            return Self::from_slice(material);
        }

        let text = match std::str::from_utf8(material) {
            Ok(text) => text.trim(),
            Err(_) => {
                return Err(UnwrapError::KeyLengthInvalid {
                    expected: KEY_LENGTH,
                    actual: material.len(),
                })
            }
        };

        if text.len() == KEY_LENGTH * 2 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Self::from_hex(text);
        }

        match codec.decode(text) {
            Ok(decoded) => Self::from_slice(&Zeroizing::new(decoded)),
            Err(_) => Err(UnwrapError::KeyLengthInvalid {
                expected: KEY_LENGTH,
                actual: material.len(),
            }),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex spelling
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }

    pub fn to_base64(&self, codec: &dyn Base64Codec) -> Zeroizing<String> {
        Zeroizing::new(codec.encode(&self.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

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


//! Encrypted envelope forms
//!
//! Asset bodies arrive in one of two shapes:
//!
//! ## JSON form
//! ```json
//! { "iv": "<base64>", "authTag": "<base64>", "content": "<base64>" }
//! ```
//!
//! ## Concatenated form
//! A single byte blob `iv || authTag || ciphertext`. The split points are
//! given by a `ConcatenatedLayout`; asset bodies use a 12-byte IV, wrapped
//! license keys use a 16-byte IV.
//!
//! Both are parsed into an `EnvelopeForm` and normalized into one
//! `EncryptedEnvelope` before any cryptography happens. The decryption
//! engine only ever sees the normalized form.

use crate::crypto::encoding::Base64Codec;
use crate::error::DecryptionError;
use serde::{Deserialize, Serialize};

/// Nominal GCM IV length
pub const NOMINAL_IV_LENGTH: usize = 12;

/// GCM tag length used by the license server
pub const TAG_LENGTH: usize = 16;

/// Byte layout of a concatenated envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatenatedLayout {
    pub iv_len: usize,
    pub tag_len: usize,
}

impl ConcatenatedLayout {
    /// `iv(12) || authTag(16) || ciphertext`, used for raw asset bodies
    pub const ASSET_BODY: Self = Self {
        iv_len: NOMINAL_IV_LENGTH,
        tag_len: TAG_LENGTH,
    };

    /// `iv(16) || authTag(16) || ciphertext`, used for preshared-key wrapped licenses
    pub const WRAPPED_KEY: Self = Self {
        iv_len: 16,
        tag_len: TAG_LENGTH,
    };

    /// Bytes needed before the ciphertext starts
    pub fn header_len(&self) -> usize {
        self.iv_len + self.tag_len
    }
}

impl Default for ConcatenatedLayout {
    fn default() -> Self {
        Self::ASSET_BODY
    }
}

/// JSON envelope as served by the asset endpoint
///
/// Fields are optional so that a missing field becomes a precise
/// `MalformedEnvelope` instead of a generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    #[serde(rename = "authTag", alias = "auth_tag", default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,

    #[serde(alias = "ciphertext", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Envelope as received, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeForm {
    Json(JsonEnvelope),
    Concatenated {
        bytes: Vec<u8>,
        layout: ConcatenatedLayout,
    },
}

impl EnvelopeForm {
    /// Classify an HTTP response body
    ///
    /// A body whose content type says JSON must parse as a JSON envelope or it
    /// is malformed. Without that declaration a body starting with `{` is tried
    /// as JSON first and kept as raw bytes when it does not parse, since a
    /// random IV starts with `{` about once in 256 bodies.
    pub fn from_body(
        body: Vec<u8>,
        content_type: Option<&str>,
        layout: ConcatenatedLayout,
    ) -> Result<Self, DecryptionError> {
        let declared_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        let looks_json = body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map(|b| *b == b'{')
            .unwrap_or(false);

        if declared_json {
            let parsed: JsonEnvelope = serde_json::from_slice(&body).map_err(|e| {
                DecryptionError::MalformedEnvelope(format!("body is not a JSON envelope: {}", e))
            })?;
            return Ok(EnvelopeForm::Json(parsed));
        }

        if looks_json {
            if let Ok(parsed) = serde_json::from_slice::<JsonEnvelope>(&body) {
                return Ok(EnvelopeForm::Json(parsed));
            }
        }

        Ok(EnvelopeForm::Concatenated {
            bytes: body,
            layout,
        })
    }

    /// Normalize into `{iv, authTag, ciphertext}`
    pub fn normalize(self, codec: &dyn Base64Codec) -> Result<EncryptedEnvelope, DecryptionError> {
        match self {
            EnvelopeForm::Json(json) => {
                let iv = decode_field("iv", json.iv.as_deref(), codec)?;
                let auth_tag = decode_field("authTag", json.auth_tag.as_deref(), codec)?;
                let ciphertext = decode_field("content", json.content.as_deref(), codec)?;
                EncryptedEnvelope::new(iv, auth_tag, ciphertext)
            }
            EnvelopeForm::Concatenated { bytes, layout } => EncryptedEnvelope::from_concatenated(&bytes, layout),
        }
    }
}

fn decode_field(
    name: &str,
    value: Option<&str>,
    codec: &dyn Base64Codec,
) -> Result<Vec<u8>, DecryptionError> {
    let value = match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Err(DecryptionError::MalformedEnvelope(format!("missing {}", name))),
    };
    codec
        .decode(value)
        .map_err(|e| DecryptionError::MalformedEnvelope(format!("{} is not base64: {}", name, e)))
}

/// Normalized envelope handed to the decryption engine
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    iv: Vec<u8>,
    auth_tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Build an envelope, rejecting an empty IV or tag
    ///
    /// An empty ciphertext is allowed; GCM authenticates the empty message.
    pub fn new(iv: Vec<u8>, auth_tag: Vec<u8>, ciphertext: Vec<u8>) -> Result<Self, DecryptionError> {
        if iv.is_empty() {
            return Err(DecryptionError::MalformedEnvelope("missing iv".to_string()));
        }
        if auth_tag.is_empty() {
            return Err(DecryptionError::MalformedEnvelope("auth tag is empty".to_string()));
        }
        Ok(Self {
            iv,
            auth_tag,
            ciphertext,
        })
    }

    /// Split `iv || authTag || ciphertext`
    pub fn from_concatenated(bytes: &[u8], layout: ConcatenatedLayout) -> Result<Self, DecryptionError> {
        if layout.iv_len == 0 || layout.tag_len == 0 {
            return Err(DecryptionError::MalformedEnvelope(
                "layout must have a non-empty iv and tag".to_string(),
            ));
        }
        if bytes.len() < layout.header_len() {
            return Err(DecryptionError::MalformedEnvelope(format!(
                "payload too short: {} bytes, need at least {}",
                bytes.len(),
                layout.header_len()
            )));
        }
        let (iv, rest) = bytes.split_at(layout.iv_len);
        let (auth_tag, ciphertext) = rest.split_at(layout.tag_len);
        Self::new(iv.to_vec(), auth_tag.to_vec(), ciphertext.to_vec())
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn auth_tag(&self) -> &[u8] {
        &self.auth_tag
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Tag length in bits, as an AEAD `tagLength` parameter
    pub fn tag_length_bits(&self) -> usize {
        self.auth_tag.len() * 8
    }

    /// `ciphertext || authTag`, the single-buffer AEAD input
    pub fn sealed_payload(&self) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + self.auth_tag.len());
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.auth_tag);
        sealed
    }
}

impl std::fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("iv_len", &self.iv.len())
            .field("tag_len", &self.auth_tag.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

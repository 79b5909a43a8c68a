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


//! Base64 codecs
//!
//! Every component that turns wire text into bytes takes a `Base64Codec`
//! argument instead of reaching for a process-wide helper. `StandardBase64`
//! is what the license server and asset endpoints speak.
//!
//! # Decoding rules
//! - Standard alphabet (`+`, `/`)
//! - ASCII whitespace anywhere in the input is ignored
//! - Trailing `=` padding is optional

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{DecodeError, Engine as _};

const TOLERANT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Stateless base64 conversion
pub trait Base64Codec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> String;

    fn decode(&self, text: &str) -> Result<Vec<u8>, DecodeError>;
}

/// Standard-alphabet codec, padded on encode, padding-indifferent on decode
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBase64;

impl Base64Codec for StandardBase64 {
    fn encode(&self, bytes: &[u8]) -> String {
        TOLERANT.encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, DecodeError> {
        if text.bytes().any(|b| b.is_ascii_whitespace()) {
            let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            TOLERANT.decode(compact)
        } else {
            TOLERANT.decode(text)
        }
    }
}

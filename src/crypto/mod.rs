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


//! Cryptography for licensed content
//!
//! # Flow
//! 1. `keypair` - fresh RSA key pair per access, public half sent with the license request
//! 2. `unwrap` - recover the AES-256 content key from the license (RSA or preshared AES-GCM)
//! 3. `envelope` - normalize the encrypted asset body (JSON or concatenated bytes)
//! 4. `gcm` - AES-256-GCM open of the normalized envelope
//!
//! Key material and plaintext are zeroized when dropped.

pub mod encoding;
pub mod envelope;
pub mod gcm;
pub mod key;
pub mod keypair;
pub mod unwrap;

pub use encoding::{Base64Codec, StandardBase64};
pub use envelope::{ConcatenatedLayout, EncryptedEnvelope, EnvelopeForm, JsonEnvelope};
pub use gcm::{decrypt, decrypt_to_base64, decrypt_with_key_bytes, PlaintextAsset};
pub use key::{SymmetricKey, KEY_LENGTH};
pub use keypair::{generate_key_pair, KeyPair, PublicKeyFormat, DEFAULT_KEY_BITS};
pub use unwrap::{
    unwrap_preshared_to_base64,
    unwrap_rsa_to_hex,
    KeyUnwrapStrategy,
    RsaPadding,
    UnwrapScheme,
};

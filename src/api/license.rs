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


//! License acquisition
//!
//! # License Request Flow
//! 1. Generate a fresh key pair for this access (`crypto::keypair`)
//! 2. POST the asset id and the public key PEM to `/license`
//! 3. Receive the protected (wrapped) content key
//! 4. Hand it to `crypto::unwrap`
//!
//! Every call mints a new license server-side. Nothing here caches licenses
//! or retries a failed request.
//!
//! # API Endpoint
//!
//! **POST** `/license`
//!
//! Request body (JSON). `bookId` is used for audio assets as well:
//! ```json
//! { "bookId": "42", "publicKey": "-----BEGIN PUBLIC KEY-----\n..." }
//! ```
//!
//! Response:
//! ```json
//! { "payload": { "decryptionKey": "<base64>", "scheme": "rsa" } }
//! ```
//! `scheme` is optional (`"rsa"` or `"aes-gcm"`). Error bodies carry
//! `message` or `error`.

use crate::api::client::{transport_error, Endpoint, HttpClient};
use crate::crypto::unwrap::UnwrapScheme;
use crate::error::{DrmError, Result};
use serde::{Deserialize, Serialize};

/// License endpoint path under the API base URL
pub const LICENSE_PATH: &str = "/license";

/// Longest response body snippet kept in errors
const MAX_BODY_SNIPPET: usize = 512;

/// Body of a license request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRequest {
    #[serde(rename = "bookId")]
    pub asset_id: String,

    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// A license as issued by the server
#[derive(Clone, PartialEq, Eq)]
pub struct LicenseResponse {
    /// Wrapped content key, opaque until unwrapped
    pub protected_key: String,

    /// Delivery scheme named by the server, if any
    pub scheme: Option<UnwrapScheme>,
}

impl std::fmt::Debug for LicenseResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseResponse")
            .field("protected_key_len", &self.protected_key.len())
            .field("scheme", &self.scheme)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LicenseBody {
    payload: Option<LicensePayload>,
}

#[derive(Debug, Deserialize)]
struct LicensePayload {
    #[serde(rename = "decryptionKey", alias = "protectedKey")]
    decryption_key: Option<String>,

    #[serde(default)]
    scheme: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Request a license for one asset
///
/// # Arguments
/// * `client` - Authenticated HTTP client
/// * `asset_id` - Asset identifier (sent as `bookId`)
/// * `public_key_pem` - Public half of this access's key pair
///
/// # Errors
/// - `LicenseDenied` for any non-2xx answer, with the server's message
/// - `LicenseUnreachable` on connection failure or timeout
/// - `LicenseMalformed` if the body lacks `payload.decryptionKey` or names an unknown scheme
pub async fn request_license(
    client: &HttpClient,
    asset_id: &str,
    public_key_pem: &str,
) -> Result<LicenseResponse> {
    if asset_id.trim().is_empty() {
        return Err(DrmError::invalid_input("Asset id is empty"));
    }
    if public_key_pem.trim().is_empty() {
        return Err(DrmError::invalid_input("Public key is empty"));
    }

    let request = LicenseRequest {
        asset_id: asset_id.to_string(),
        public_key: public_key_pem.to_string(),
    };

    let response = client.post_json(Endpoint::License, LICENSE_PATH, &request).await?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(Endpoint::License, &e))?;

    if !status.is_success() {
        let message = error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        tracing::warn!(asset_id, status = status.as_u16(), %message, "License denied");
        return Err(DrmError::LicenseDenied {
            status_code: status.as_u16(),
            message,
        });
    }

    let license = parse_license_body(&body)?;
    tracing::info!(asset_id, scheme = ?license.scheme, "License issued");
    Ok(license)
}

/// Parse a successful license response body
pub fn parse_license_body(body: &str) -> Result<LicenseResponse> {
    let parsed: LicenseBody = serde_json::from_str(body).map_err(|e| {
        DrmError::license_malformed(format!("Response is not valid JSON: {}", e), Some(snippet(body)))
    })?;

    let payload = parsed
        .payload
        .ok_or_else(|| DrmError::license_malformed("Missing payload", Some(snippet(body))))?;

    let protected_key = payload
        .decryption_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| DrmError::license_malformed("Missing payload.decryptionKey", Some(snippet(body))))?;

    let scheme = match payload.scheme.as_deref() {
        None => None,
        Some(name) => Some(
            serde_json::from_value::<UnwrapScheme>(serde_json::Value::String(name.to_string())).map_err(
                |_| DrmError::license_malformed(format!("Unknown key scheme '{}'", name), None),
            )?,
        ),
    };

    Ok(LicenseResponse {
        protected_key,
        scheme,
    })
}

/// `message` or `error` from an error body
fn error_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            return Some(message);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') {
        None
    } else {
        Some(snippet(trimmed))
    }
}

fn snippet(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_SNIPPET) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

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


//! Licensable assets and encrypted body download
//!
//! An [`AssetReference`] comes from the catalog listing (outside this crate)
//! and names where the encrypted body lives. The body is fetched with a plain
//! authenticated GET and handed to `crypto::envelope` untouched, together
//! with its content type so the envelope form can be told apart.

use crate::api::client::{transport_error, Endpoint, HttpClient};
use crate::crypto::envelope::{ConcatenatedLayout, EnvelopeForm};
use crate::error::{DecryptionError, DrmError, Result};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Kind of licensable asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// EPUB book, rendered from memory
    Book,
    /// MP3 audiobook, played from a cache file
    Audio,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Book => "book",
            AssetKind::Audio => "audio",
        }
    }

    /// File extension used when the plaintext is written to the cache
    pub fn file_extension(&self) -> &'static str {
        match self {
            AssetKind::Book => "epub",
            AssetKind::Audio => "mp3",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetKind {
    type Err = DrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "book" | "epub" => Ok(AssetKind::Book),
            "audio" | "audiobook" | "mp3" => Ok(AssetKind::Audio),
            other => Err(DrmError::invalid_input(format!("Unknown asset kind '{}'", other))),
        }
    }
}

/// Identifies one licensable unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReference {
    /// Opaque asset id, sent to the license server as `bookId`
    pub id: String,
    pub kind: AssetKind,
    /// Absolute URL or a path under the API base URL
    pub body_location: String,
}

impl AssetReference {
    pub fn new<I, L>(id: I, kind: AssetKind, body_location: L) -> Self
    where
        I: Into<String>,
        L: Into<String>,
    {
        Self {
            id: id.into(),
            kind,
            body_location: body_location.into(),
        }
    }
}

/// Encrypted body as downloaded
#[derive(Debug, Clone)]
pub struct EncryptedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl EncryptedBody {
    /// Classify as a JSON or concatenated envelope
    pub fn into_envelope_form(self, layout: ConcatenatedLayout) -> std::result::Result<EnvelopeForm, DecryptionError> {
        EnvelopeForm::from_body(self.bytes, self.content_type.as_deref(), layout)
    }
}

/// Download the encrypted body of an asset
///
/// # Errors
/// - `AssetFetchFailed` for transport failures and non-2xx answers
///   (transient for timeouts, connection failures, 408, 429 and 5xx)
/// - `AssetTooLarge` once the body exceeds `max_asset_bytes`, whether announced
///   by `Content-Length` or found while streaming
pub async fn fetch_encrypted_body(client: &HttpClient, asset: &AssetReference) -> Result<EncryptedBody> {
    let url = client.resolve_location(&asset.body_location)?;
    let limit = client.config().max_asset_bytes;

    let response = client.get(Endpoint::Asset, url).await?;
    let status = response.status();

    if !status.is_success() {
        tracing::warn!(asset_id = %asset.id, status = status.as_u16(), "Asset body request failed");
        return Err(DrmError::AssetFetchFailed {
            message: format!(
                "Server answered {} for asset {}",
                status.as_u16(),
                asset.id
            ),
            status_code: Some(status.as_u16()),
            is_transient: is_transient_status(status),
        });
    }

    if let Some(announced) = response.content_length() {
        if announced > limit {
            return Err(DrmError::AssetTooLarge {
                limit,
                actual: announced,
            });
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(Endpoint::Asset, &e))?;
        let received = (bytes.len() + chunk.len()) as u64;
        if received > limit {
            return Err(DrmError::AssetTooLarge {
                limit,
                actual: received,
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    tracing::debug!(
        asset_id = %asset.id,
        bytes = bytes.len(),
        content_type = content_type.as_deref().unwrap_or("-"),
        "Fetched encrypted body"
    );

    Ok(EncryptedBody {
        bytes,
        content_type,
    })
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{ClientConfig, InMemorySession};
    use axum::http::{header, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;

    async fn client_with(router: Router, max_asset_bytes: u64) -> HttpClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let config = ClientConfig::builder()
            .base_url(format!("http://{}", addr))
            .max_asset_bytes(max_asset_bytes)
            .build();
        HttpClient::new(config, Arc::new(InMemorySession::new("token"))).unwrap()
    }

    #[test]
    fn test_asset_reference_json() {
        let asset: AssetReference = serde_json::from_str(
            r#"{"id":"42","kind":"audio","bodyLocation":"/audio/42/body"}"#,
        )
        .unwrap();
        assert_eq!(asset, AssetReference::new("42", AssetKind::Audio, "/audio/42/body"));
    }

    #[test]
    fn test_asset_kind_parsing() {
        assert_eq!("Book".parse::<AssetKind>().unwrap(), AssetKind::Book);
        assert_eq!("mp3".parse::<AssetKind>().unwrap(), AssetKind::Audio);
        assert!("video".parse::<AssetKind>().is_err());
        assert_eq!(AssetKind::Audio.file_extension(), "mp3");
    }

    #[tokio::test]
    async fn test_fetch_json_body_keeps_content_type() {
        let router = Router::new().route(
            "/books/1/body",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], r#"{"iv":"","authTag":"","content":""}"#) }),
        );
        let client = client_with(router, 1024).await;
        let asset = AssetReference::new("1", AssetKind::Book, "/books/1/body");

        let body = fetch_encrypted_body(&client, &asset).await.unwrap();
        assert_eq!(body.content_type.as_deref(), Some("application/json"));
        assert!(matches!(
            body.into_envelope_form(ConcatenatedLayout::ASSET_BODY).unwrap(),
            EnvelopeForm::Json(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_raw_body() {
        let router = Router::new().route("/raw", get(|| async { vec![7u8; 40] }));
        let client = client_with(router, 1024).await;
        let asset = AssetReference::new("1", AssetKind::Audio, "/raw");

        let body = fetch_encrypted_body(&client, &asset).await.unwrap();
        assert_eq!(body.bytes, vec![7u8; 40]);
    }

    #[tokio::test]
    async fn test_fetch_status_classification() {
        let router = Router::new()
            .route("/missing", get(|| async { AxumStatus::NOT_FOUND }))
            .route("/busy", get(|| async { AxumStatus::BAD_GATEWAY }));
        let client = client_with(router, 1024).await;

        let err = fetch_encrypted_body(&client, &AssetReference::new("1", AssetKind::Book, "/missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DrmError::AssetFetchFailed {
                status_code: Some(404),
                is_transient: false,
                ..
            }
        ));

        let err = fetch_encrypted_body(&client, &AssetReference::new("1", AssetKind::Book, "/busy"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let router = Router::new().route("/big", get(|| async { vec![0u8; 4096] }));
        let client = client_with(router, 1024).await;
        let asset = AssetReference::new("1", AssetKind::Audio, "/big");

        let err = fetch_encrypted_body(&client, &asset).await.unwrap_err();
        assert!(matches!(err, DrmError::AssetTooLarge { limit: 1024, actual: 4096 }));
    }
}

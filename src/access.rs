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


//! Asset access pipeline
//!
//! One call to [`LibraryCore::open_asset`] runs the whole flow for one asset:
//!
//! 1. Generate a fresh RSA key pair (blocking pool)
//! 2. Request a license with the public key
//! 3. Unwrap the content key (scheme from the license, else per asset kind)
//! 4. Fetch the encrypted body
//! 5. Decrypt it (blocking pool)
//! 6. Materialize the plaintext (memory for books, cache file for audio)
//!
//! Stages run strictly in order. Key generation, network and decryption
//! stages race the caller's [`CancellationToken`]; materialization runs to
//! completion and its file is released if cancellation arrived meanwhile. A
//! cancelled access returns `Cancelled`, drops its in-flight requests, leaves
//! no cache file behind and never hands out plaintext. Independent accesses share only the HTTP connection pool and
//! the cache directory (with disjoint file names).
//!
//! Nothing is cached between accesses: no key pairs, no licenses, no keys.
//! Retrying means calling `open_asset` again.

use crate::api::asset::{fetch_encrypted_body, AssetReference};
use crate::api::client::{HttpClient, SessionStore};
use crate::api::license::request_license;
use crate::config::CoreConfig;
use crate::crypto::encoding::{Base64Codec, StandardBase64};
use crate::crypto::envelope::{ConcatenatedLayout, EnvelopeForm};
use crate::crypto::gcm;
use crate::crypto::key::{SymmetricKey, KEY_LENGTH};
use crate::crypto::keypair::generate_key_pair;
use crate::crypto::unwrap::UnwrapScheme;
use crate::error::{DecryptionError, DrmError, Result, UnwrapError};
use crate::file::cache::{EphemeralCache, LocalHandle};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Result of a successful access
#[derive(Debug)]
pub struct OpenedAsset {
    /// Id used in logs and for cancellation over the bridge
    pub access_id: String,
    pub asset: AssetReference,
    /// Key delivery scheme that was used
    pub scheme: UnwrapScheme,
    pub handle: LocalHandle,
}

/// Entry point for asset accesses
///
/// Holds configuration and shared plumbing only; no per-access state
/// survives an access.
pub struct LibraryCore {
    config: CoreConfig,
    client: HttpClient,
    cache: EphemeralCache,
    codec: Arc<dyn Base64Codec>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl LibraryCore {
    /// Create a core with the standard base64 codec
    ///
    /// # Errors
    /// `InvalidConfiguration` if the configuration does not validate
    pub fn new(config: CoreConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        Self::with_codec(config, session, Arc::new(StandardBase64))
    }

    /// Create a core with an explicit base64 codec
    pub fn with_codec(
        config: CoreConfig,
        session: Arc<dyn SessionStore>,
        codec: Arc<dyn Base64Codec>,
    ) -> Result<Self> {
        config.validate(codec.as_ref())?;
        let client = HttpClient::new(config.client.clone(), session)?;
        let cache = EphemeralCache::new(config.cache.clone());

        tracing::info!(
            base_url = %config.client.base_url,
            cache_dir = %config.cache.directory.display(),
            preshared_key = config.crypto.master_key_base64.is_some(),
            "Library core ready"
        );

        Ok(Self {
            config,
            client,
            cache,
            codec,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cache(&self) -> &EphemeralCache {
        &self.cache
    }

    pub fn codec(&self) -> &dyn Base64Codec {
        self.codec.as_ref()
    }

    /// Run the full access pipeline for one asset
    ///
    /// # Errors
    /// Any stage error, unchanged; `Cancelled` once `cancel` fires
    pub async fn open_asset(&self, asset: &AssetReference, cancel: &CancellationToken) -> Result<OpenedAsset> {
        let access_id = Uuid::new_v4().to_string();
        self.run_access(access_id, asset, cancel).await
    }

    /// Run an access that can be cancelled later through [`Self::cancel_access`]
    pub async fn open_asset_tracked(&self, access_id: &str, asset: &AssetReference) -> Result<OpenedAsset> {
        let cancel = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            if in_flight.contains_key(access_id) {
                return Err(DrmError::invalid_input(format!("Access '{}' is already running", access_id)));
            }
            in_flight.insert(access_id.to_string(), cancel.clone());
        }

        let _entry = InFlightEntry {
            in_flight: &self.in_flight,
            access_id,
        };
        self.run_access(access_id.to_string(), asset, &cancel).await
    }

    /// Cancel a tracked access; returns whether it was still running
    pub fn cancel_access(&self, access_id: &str) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        match in_flight.get(access_id) {
            Some(token) => {
                tracing::info!(access_id, "Cancelling access");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_access(
        &self,
        access_id: String,
        asset: &AssetReference,
        cancel: &CancellationToken,
    ) -> Result<OpenedAsset> {
        let span = tracing::info_span!("access", %access_id, asset_id = %asset.id, kind = %asset.kind);
        async move {
            let result = self.pipeline(asset, cancel).await;
            match &result {
                Ok((scheme, handle)) => {
                    tracing::info!(?scheme, bytes = handle.len(), "Asset opened")
                }
                Err(DrmError::Cancelled) => tracing::info!("Access cancelled"),
                Err(e) => tracing::warn!(error = %e, "Access failed"),
            }
            result.map(|(scheme, handle)| OpenedAsset {
                access_id,
                asset: asset.clone(),
                scheme,
                handle,
            })
        }
        .instrument(span)
        .await
    }

    async fn pipeline(&self, asset: &AssetReference, cancel: &CancellationToken) -> Result<(UnwrapScheme, LocalHandle)> {
        if cancel.is_cancelled() {
            return Err(DrmError::Cancelled);
        }
        let codec = self.codec.as_ref();

        // 1. Key pair, fresh for every access
        let bits = self.config.crypto.key_bits;
        let format = self.config.crypto.public_key_format;
        let key_pair = until_cancelled(cancel, async move {
            tokio::task::spawn_blocking(move || generate_key_pair(bits, format))
                .await
                .map_err(|e| DrmError::internal(format!("Key generation task failed: {}", e)))?
        })
        .await?;

        // 2. License
        tracing::debug!("Requesting license");
        let license = until_cancelled(cancel, request_license(&self.client, &asset.id, key_pair.public_key_pem())).await?;

        // 3. Unwrap
        let scheme = license
            .scheme
            .unwrap_or_else(|| self.config.crypto.scheme_for(asset.kind));
        let strategy = self.config.crypto.strategy_for(scheme, codec)?;
        let key = strategy.unwrap_key(&license.protected_key, &key_pair, codec)?;
        drop(key_pair);
        tracing::debug!(?scheme, "Content key unwrapped");

        // 4. Encrypted body
        let body = until_cancelled(cancel, fetch_encrypted_body(&self.client, asset)).await?;
        let envelope = body
            .into_envelope_form(ConcatenatedLayout::ASSET_BODY)?
            .normalize(codec)?;

        // 5. Decrypt
        let plaintext = until_cancelled(cancel, async move {
            tokio::task::spawn_blocking(move || gcm::decrypt(&envelope, &key))
                .await
                .map_err(|e| DrmError::internal(format!("Decryption task failed: {}", e)))?
                .map_err(DrmError::from)
        })
        .await?;

        // 6. Materialize
        // Runs to completion; a file written under cancellation is released below
        let handle = self.cache.materialize(plaintext, asset.kind).await?;
        if cancel.is_cancelled() {
            if let Err(e) = self.cache.release(&handle).await {
                tracing::warn!(error = %e, "Failed to release cache file of cancelled access");
            }
            return Err(DrmError::Cancelled);
        }

        Ok((scheme, handle))
    }
}

impl std::fmt::Debug for LibraryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryCore")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Unregisters a tracked access when it finishes or its future is dropped
struct InFlightEntry<'a> {
    in_flight: &'a Mutex<HashMap<String, CancellationToken>>,
    access_id: &'a str,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(self.access_id);
    }
}

/// Race a stage against cancellation; cancellation wins ties
async fn until_cancelled<T, F>(cancel: &CancellationToken, stage: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DrmError::Cancelled),
        result = stage => result,
    }
}

/// Decrypt an encrypted body with a key given as hex or base64 text
///
/// Used by the bridge and the CLI for bodies obtained outside the pipeline.
/// The key must decode to exactly 32 bytes.
pub fn decrypt_body_to_base64(
    body: Vec<u8>,
    content_type: Option<&str>,
    key_text: &str,
    codec: &dyn Base64Codec,
) -> Result<String> {
    let key = parse_key_text(key_text, codec)?;
    let envelope = EnvelopeForm::from_body(body, content_type, ConcatenatedLayout::ASSET_BODY)?.normalize(codec)?;
    let plaintext = gcm::decrypt(&envelope, &key)?;
    Ok(plaintext.to_base64(codec))
}

/// 64 hex characters, otherwise base64; wrong lengths stay `KeyLengthInvalid`
fn parse_key_text(text: &str, codec: &dyn Base64Codec) -> std::result::Result<SymmetricKey, DecryptionError> {
    let text = text.trim();
    let parsed = if text.len() == KEY_LENGTH * 2 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        SymmetricKey::from_hex(text)
    } else {
        SymmetricKey::from_base64(text, codec)
    };
    parsed.map_err(|e| match e {
        UnwrapError::KeyLengthInvalid { expected, actual } => DecryptionError::KeyLengthInvalid { expected, actual },
        _ => DecryptionError::MalformedEnvelope("key is neither hex nor base64".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::asset::AssetKind;
    use crate::api::client::InMemorySession;
    use aes_gcm::aead::{AeadInPlace, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use tempfile::TempDir;

    fn core_in(dir: &TempDir) -> LibraryCore {
        let mut config = CoreConfig::default();
        config.cache.directory = dir.path().to_path_buf();
        LibraryCore::new(config, Arc::new(InMemorySession::anonymous())).unwrap()
    }

    fn concatenated_body(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        let iv = [4u8; 12];
        let cipher = Aes256Gcm::new_from_slice(key).unwrap();
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .unwrap();
        let mut body = iv.to_vec();
        body.extend_from_slice(&tag);
        body.extend_from_slice(&buffer);
        body
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let core = core_in(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let asset = AssetReference::new("42", AssetKind::Audio, "/audio/42");
        let err = core.open_asset(&asset, &cancel).await.unwrap_err();
        assert!(matches!(err, DrmError::Cancelled));
    }

    #[tokio::test]
    async fn test_until_cancelled_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = until_cancelled(&cancel, async { Ok::<_, DrmError>(1) }).await;
        assert!(matches!(result, Err(DrmError::Cancelled)));

        let live = CancellationToken::new();
        assert_eq!(until_cancelled(&live, async { Ok::<_, DrmError>(1) }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_tracked_access_is_unregistered() {
        // Accepts connections but never answers, so the license request hangs
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dir = TempDir::new().unwrap();
        let mut config = CoreConfig::default();
        config.client.base_url = format!("http://{}/api", listener.local_addr().unwrap());
        config.cache.directory = dir.path().to_path_buf();
        let core = Arc::new(LibraryCore::new(config, Arc::new(InMemorySession::anonymous())).unwrap());

        let running = {
            let core = core.clone();
            tokio::spawn(async move {
                let asset = AssetReference::new("42", AssetKind::Audio, "/audio/42");
                core.open_asset_tracked("access-7", &asset).await
            })
        };
        for _ in 0..100 {
            if core.in_flight.lock().unwrap().contains_key("access-7") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(core.in_flight.lock().unwrap().contains_key("access-7"));

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());

        assert!(core.in_flight.lock().unwrap().is_empty());
        assert!(!core.cancel_access("access-7"));
        drop(listener);
    }

    #[test]
    fn test_cancel_unknown_access() {
        let dir = TempDir::new().unwrap();
        let core = core_in(&dir);
        assert!(!core.cancel_access("nope"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CoreConfig::default();
        config.crypto.key_bits = 512;
        let err = LibraryCore::new(config, Arc::new(InMemorySession::anonymous())).unwrap_err();
        assert!(matches!(err, DrmError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_decrypt_body_with_hex_and_base64_keys() {
        let key = [0x42u8; 32];
        let body = concatenated_body(&key, b"HELLO WORLD");

        let b64 = decrypt_body_to_base64(body.clone(), None, &hex::encode(key), &StandardBase64).unwrap();
        assert_eq!(StandardBase64.decode(&b64).unwrap(), b"HELLO WORLD");

        let b64 = decrypt_body_to_base64(body, None, &StandardBase64.encode(&key), &StandardBase64).unwrap();
        assert_eq!(StandardBase64.decode(&b64).unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn test_decrypt_body_with_short_key() {
        let body = concatenated_body(&[0x42u8; 32], b"HELLO WORLD");
        let err = decrypt_body_to_base64(body, None, &StandardBase64.encode(&[0u8; 16]), &StandardBase64).unwrap_err();
        assert!(err.is_key_length_invalid());

        let err = decrypt_body_to_base64(
            concatenated_body(&[0x42u8; 32], b"HELLO WORLD"),
            None,
            &StandardBase64.encode(&[1u8; 48]),
            &StandardBase64,
        )
        .unwrap_err();
        assert!(err.is_key_length_invalid());
    }

    #[test]
    fn test_decrypt_body_with_garbage_key() {
        let body = concatenated_body(&[0x42u8; 32], b"HELLO WORLD");
        let err = decrypt_body_to_base64(body, None, "not a key!", &StandardBase64).unwrap_err();
        assert!(matches!(err, DrmError::Decryption(DecryptionError::MalformedEnvelope(_))));
    }
}

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


//! Core configuration
//!
//! [`CoreConfig`] bundles the HTTP, cache and crypto settings. The mobile
//! bridge passes it as JSON; the CLI and tests build it in code or read it
//! from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `JUSTO_API_BASE_URL` | `client.base_url` |
//! | `JUSTO_HTTP_TIMEOUT_SECS` | `client.timeout_secs` |
//! | `JUSTO_CACHE_DIR` | `cache.directory` |
//! | `JUSTO_CACHE_TTL_SECS` | `cache.ttl_secs` |
//! | `JUSTO_MASTER_KEY` | `crypto.master_key_base64` |
//!
//! The preshared master key is never compiled in. Without one, assets that
//! use the preshared scheme fail with `MissingMasterKey`.

use crate::api::asset::AssetKind;
use crate::api::client::ClientConfig;
use crate::crypto::encoding::Base64Codec;
use crate::crypto::key::SymmetricKey;
use crate::crypto::keypair::{PublicKeyFormat, DEFAULT_KEY_BITS, MAX_KEY_BITS, MIN_KEY_BITS};
use crate::crypto::unwrap::{KeyUnwrapStrategy, RsaPadding, UnwrapScheme};
use crate::error::{DrmError, Result, UnwrapError};
use crate::file::cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const ENV_API_BASE_URL: &str = "JUSTO_API_BASE_URL";
pub const ENV_MASTER_KEY: &str = "JUSTO_MASTER_KEY";
pub const ENV_CACHE_DIR: &str = "JUSTO_CACHE_DIR";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "JUSTO_HTTP_TIMEOUT_SECS";
pub const ENV_CACHE_TTL_SECS: &str = "JUSTO_CACHE_TTL_SECS";

/// Durations as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Key generation and unwrap settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// RSA modulus size for per-access key pairs
    pub key_bits: usize,
    pub rsa_padding: RsaPadding,
    pub public_key_format: PublicKeyFormat,
    /// Base64 of the 32-byte preshared master key
    #[serde(skip_serializing)]
    pub master_key_base64: Option<String>,
    /// Scheme used for books when the license does not name one
    pub book_scheme: UnwrapScheme,
    /// Scheme used for audio when the license does not name one
    pub audio_scheme: UnwrapScheme,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
            rsa_padding: RsaPadding::default(),
            public_key_format: PublicKeyFormat::default(),
            master_key_base64: None,
            book_scheme: UnwrapScheme::Rsa,
            audio_scheme: UnwrapScheme::PresharedAes,
        }
    }
}

impl CryptoConfig {
    /// Default scheme for an asset kind
    pub fn scheme_for(&self, kind: AssetKind) -> UnwrapScheme {
        match kind {
            AssetKind::Book => self.book_scheme,
            AssetKind::Audio => self.audio_scheme,
        }
    }

    /// Build the unwrap strategy for a scheme
    ///
    /// # Errors
    /// `Unwrap(MissingMasterKey)` for the preshared scheme without a master key,
    /// `Unwrap(KeyLengthInvalid)` if the master key is not 32 bytes
    pub fn strategy_for(&self, scheme: UnwrapScheme, codec: &dyn Base64Codec) -> Result<KeyUnwrapStrategy> {
        match scheme {
            UnwrapScheme::Rsa => Ok(KeyUnwrapStrategy::RsaUnwrap {
                padding: self.rsa_padding,
            }),
            UnwrapScheme::PresharedAes => {
                let encoded = self
                    .master_key_base64
                    .as_deref()
                    .filter(|key| !key.trim().is_empty())
                    .ok_or(UnwrapError::MissingMasterKey)?;
                let master_key = SymmetricKey::from_base64(encoded, codec)?;
                Ok(KeyUnwrapStrategy::PresharedAesUnwrap { master_key })
            }
        }
    }
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key_bits", &self.key_bits)
            .field("rsa_padding", &self.rsa_padding)
            .field("public_key_format", &self.public_key_format)
            .field(
                "master_key_base64",
                &self.master_key_base64.as_ref().map(|_| "[REDACTED]"),
            )
            .field("book_scheme", &self.book_scheme)
            .field("audio_scheme", &self.audio_scheme)
            .finish()
    }
}

/// Complete configuration of a [`crate::access::LibraryCore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub client: ClientConfig,
    pub cache: CacheConfig,
    pub crypto: CryptoConfig,
}

impl CoreConfig {
    /// Defaults overridden by `JUSTO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `JUSTO_*` names
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = lookup(ENV_API_BASE_URL) {
            config.client.base_url = base_url.trim().to_string();
        }
        if let Some(secs) = lookup(ENV_HTTP_TIMEOUT_SECS) {
            config.client.timeout = Duration::from_secs(parse_secs(ENV_HTTP_TIMEOUT_SECS, &secs)?);
        }
        if let Some(directory) = lookup(ENV_CACHE_DIR) {
            config.cache.directory = PathBuf::from(directory);
        }
        if let Some(secs) = lookup(ENV_CACHE_TTL_SECS) {
            config.cache.ttl = Duration::from_secs(parse_secs(ENV_CACHE_TTL_SECS, &secs)?);
        }
        if let Some(master_key) = lookup(ENV_MASTER_KEY) {
            config.crypto.master_key_base64 = Some(master_key.trim().to_string());
        }

        Ok(config)
    }

    /// Parse a JSON config as sent over the native bridge
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the configuration before any access runs
    pub fn validate(&self, codec: &dyn Base64Codec) -> Result<()> {
        let base_url = Url::parse(&self.client.base_url).map_err(|e| {
            DrmError::InvalidConfiguration(format!("Invalid API base URL '{}': {}", self.client.base_url, e))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(DrmError::InvalidConfiguration(format!(
                "API base URL must be http or https, got '{}'",
                base_url.scheme()
            )));
        }

        if self.client.timeout.is_zero() {
            return Err(DrmError::InvalidConfiguration("HTTP timeout must not be zero".to_string()));
        }
        if self.client.max_asset_bytes == 0 {
            return Err(DrmError::InvalidConfiguration("max_asset_bytes must not be zero".to_string()));
        }

        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.crypto.key_bits) {
            return Err(DrmError::InvalidConfiguration(format!(
                "key_bits must be between {} and {}, got {}",
                MIN_KEY_BITS, MAX_KEY_BITS, self.crypto.key_bits
            )));
        }

        if let Some(master_key) = &self.crypto.master_key_base64 {
            SymmetricKey::from_base64(master_key, codec)
                .map_err(|e| DrmError::InvalidConfiguration(format!("Invalid master key: {}", e)))?;
        }

        if self.cache.directory.as_os_str().is_empty() {
            return Err(DrmError::InvalidConfiguration("Cache directory is empty".to_string()));
        }
        // Playable file:// URIs can only be built from absolute paths
        if !self.cache.directory.is_absolute() {
            return Err(DrmError::InvalidConfiguration(format!(
                "Cache directory must be an absolute path, got '{}'",
                self.cache.directory.display()
            )));
        }

        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| DrmError::InvalidConfiguration(format!("{} must be a whole number of seconds, got '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encoding::StandardBase64;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CoreConfig::default();
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert_eq!(config.cache.ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.crypto.key_bits, 2048);
        assert_eq!(config.crypto.rsa_padding, RsaPadding::OaepSha256);
        assert_eq!(config.crypto.scheme_for(AssetKind::Book), UnwrapScheme::Rsa);
        assert_eq!(config.crypto.scheme_for(AssetKind::Audio), UnwrapScheme::PresharedAes);
        config.validate(&StandardBase64).unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let master = StandardBase64.encode(&[9u8; 32]);
        let config = CoreConfig::from_lookup(lookup_from(&[
            (ENV_API_BASE_URL, "https://api.justo.example/api"),
            (ENV_HTTP_TIMEOUT_SECS, "12"),
            (ENV_CACHE_DIR, "/data/cache"),
            (ENV_CACHE_TTL_SECS, "60"),
            (ENV_MASTER_KEY, master.as_str()),
        ]))
        .unwrap();

        assert_eq!(config.client.base_url, "https://api.justo.example/api");
        assert_eq!(config.client.timeout, Duration::from_secs(12));
        assert_eq!(config.cache.directory, PathBuf::from("/data/cache"));
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.crypto.master_key_base64.as_deref(), Some(master.as_str()));
        config.validate(&StandardBase64).unwrap();
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = CoreConfig::from_lookup(lookup_from(&[(ENV_HTTP_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, DrmError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validate_rejections() {
        let mut config = CoreConfig::default();
        config.client.base_url = "not a url".to_string();
        assert!(config.validate(&StandardBase64).is_err());

        let mut config = CoreConfig::default();
        config.crypto.key_bits = 1024;
        assert!(config.validate(&StandardBase64).is_err());

        let mut config = CoreConfig::default();
        config.client.timeout = Duration::ZERO;
        assert!(config.validate(&StandardBase64).is_err());

        let mut config = CoreConfig::default();
        config.crypto.master_key_base64 = Some(StandardBase64.encode(&[1u8; 16]));
        assert!(config.validate(&StandardBase64).is_err());
    }

    #[test]
    fn test_validate_rejects_relative_cache_dir() {
        let config = CoreConfig::from_lookup(lookup_from(&[(ENV_CACHE_DIR, "justo-cache")])).unwrap();
        let err = config.validate(&StandardBase64).unwrap_err();
        match err {
            DrmError::InvalidConfiguration(message) => assert!(message.contains("absolute")),
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }

    #[test]
    fn test_strategy_selection() {
        let mut crypto = CryptoConfig::default();
        assert!(matches!(
            crypto.strategy_for(UnwrapScheme::Rsa, &StandardBase64).unwrap(),
            KeyUnwrapStrategy::RsaUnwrap {
                padding: RsaPadding::OaepSha256
            }
        ));

        let err = crypto
            .strategy_for(UnwrapScheme::PresharedAes, &StandardBase64)
            .unwrap_err();
        assert!(matches!(err, DrmError::Unwrap(UnwrapError::MissingMasterKey)));

        crypto.master_key_base64 = Some(StandardBase64.encode(&[3u8; 32]));
        let strategy = crypto.strategy_for(UnwrapScheme::PresharedAes, &StandardBase64).unwrap();
        assert_eq!(strategy.scheme(), UnwrapScheme::PresharedAes);
    }

    #[test]
    fn test_json_round_trip_never_exposes_master_key() {
        let json = r#"{
            "client": { "base_url": "https://api.example.com", "timeout_secs": 10 },
            "cache": { "directory": "/tmp/justo", "ttl_secs": 120 },
            "crypto": { "master_key_base64": "c2VjcmV0", "audio_scheme": "aes-gcm", "rsa_padding": "oaep_sha1" }
        }"#;
        let config = CoreConfig::from_json(json).unwrap();
        assert_eq!(config.client.timeout, Duration::from_secs(10));
        assert_eq!(config.cache.ttl, Duration::from_secs(120));
        assert_eq!(config.crypto.rsa_padding, RsaPadding::OaepSha1);
        assert_eq!(config.client.max_asset_bytes, 512 * 1024 * 1024);

        let serialized = serde_json::to_string(&config).unwrap();
        assert!(!serialized.contains("c2VjcmV0"));
        assert!(format!("{:?}", config).contains("[REDACTED]"));
    }
}

//! Justo DRM core
//!
//! Turns a protected asset reference into something the reader can render or
//! play: per-access RSA key pair, license request, content key unwrap,
//! encrypted body download, AES-256-GCM decryption and ephemeral local
//! storage. Native apps drive it through the C bridge in [`ffi`].

pub mod access;
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ffi;
pub mod file;

pub use access::{decrypt_body_to_base64, LibraryCore, OpenedAsset};
pub use api::{AssetKind, AssetReference, ClientConfig, InMemorySession, SessionStore};
pub use config::{CoreConfig, CryptoConfig};
pub use crypto::{KeyUnwrapStrategy, RsaPadding, UnwrapScheme};
pub use error::{DrmError, Result};
pub use file::{CacheConfig, EphemeralCache, LocalHandle};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `filter` takes `EnvFilter` directives; without one `RUST_LOG` is used,
/// falling back to `info`. Returns false when a subscriber was already set.
pub fn init_logging(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Some("justo_core=debug"));
        assert!(!init_logging(None));
    }
}

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


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use justo_core::crypto::{
    generate_key_pair, unwrap_preshared_to_base64, unwrap_rsa_to_hex, PublicKeyFormat, RsaPadding,
    StandardBase64,
};
use justo_core::{decrypt_body_to_base64, AssetKind, AssetReference, CoreConfig, InMemorySession, LibraryCore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "justo-cli")]
#[command(about = "Justo CLI - desktop testing tool for the DRM core", long_about = None)]
struct Cli {
    /// Log filter, e.g. "justo_core=debug"
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an RSA key pair like the one sent with a license request
    Keygen {
        #[arg(short, long, default_value_t = 2048)]
        bits: usize,
        /// spki or pkcs1
        #[arg(short, long, default_value = "spki", value_parser = parse_wire::<PublicKeyFormat>)]
        format: PublicKeyFormat,
    },
    /// Open an asset against a license server (configured through JUSTO_* variables)
    Open {
        /// Asset id sent as bookId
        id: String,
        /// book or audio
        #[arg(short, long, default_value = "book")]
        kind: AssetKind,
        /// Encrypted body location, absolute or relative to the API base URL
        #[arg(short = 'l', long)]
        body_location: String,
        /// Bearer token (defaults to JUSTO_TOKEN)
        #[arg(short, long, env = "JUSTO_TOKEN")]
        token: Option<String>,
        /// Override the API base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Override the cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Write books to the cache directory instead of keeping them in memory
        #[arg(long)]
        persist: bool,
    },
    /// Decrypt an envelope file with a known key
    Decrypt {
        /// JSON envelope or raw iv || authTag || ciphertext bytes
        envelope: PathBuf,
        /// 32-byte key as hex or base64
        #[arg(short, long)]
        key: String,
        /// Where to write the plaintext
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Unwrap an RSA-protected content key, printing it as hex
    UnwrapRsa {
        /// Base64 protected key from the license payload
        protected_key: String,
        /// PKCS#8 or PKCS#1 private key PEM file
        #[arg(long)]
        private_key: PathBuf,
        /// oaep_sha256, oaep_sha1 or pkcs1v15
        #[arg(short, long, default_value = "oaep_sha256", value_parser = parse_wire::<RsaPadding>)]
        padding: RsaPadding,
    },
    /// Unwrap a preshared-key protected content key, printing it as base64
    UnwrapPreshared {
        /// Base64 of iv(16) || authTag(16) || ciphertext
        protected_key: String,
        /// Base64 master key (defaults to JUSTO_MASTER_KEY)
        #[arg(long, env = "JUSTO_MASTER_KEY", hide_env_values = true)]
        master_key: String,
    },
    /// Delete decrypted files older than the cache TTL
    Purge,
    /// Delete every decrypted file in the cache directory
    ReleaseAll,
}

/// Parse a snake_case wire name the same way the JSON config does
fn parse_wire<T: serde::de::DeserializeOwned>(value: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    justo_core::init_logging(cli.log.as_deref());

    match cli.command {
        Commands::Keygen { bits, format } => {
            println!("Generating {}-bit RSA key pair...", bits);
            let key_pair = tokio::task::spawn_blocking(move || generate_key_pair(bits, format)).await??;
            println!("{}", key_pair.public_key_pem());
            println!("{}", key_pair.private_key_pem()?.as_str());
        }
        Commands::Open {
            id,
            kind,
            body_location,
            token,
            base_url,
            cache_dir,
            persist,
        } => {
            let mut config = CoreConfig::from_env()?;
            if let Some(base_url) = base_url {
                config.client.base_url = base_url;
            }
            if let Some(cache_dir) = cache_dir {
                config.cache.directory = std::path::absolute(&cache_dir)
                    .with_context(|| format!("Failed to resolve {}", cache_dir.display()))?;
            }
            config.cache.persist_books |= persist;

            let session = match token {
                Some(token) => InMemorySession::new(token),
                None => InMemorySession::anonymous(),
            };
            let core = LibraryCore::new(config, Arc::new(session))?;
            let asset = AssetReference::new(id, kind, body_location);

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("Cancelling...");
                    ctrl_c.cancel();
                }
            });

            let opened = core.open_asset(&asset, &cancel).await?;
            println!("Opened {} {} using {}", opened.asset.kind, opened.asset.id, opened.scheme.as_str());
            match (opened.handle.uri(), opened.handle.path()) {
                (Some(uri), Some(path)) => {
                    println!("  uri:  {}", uri);
                    println!("  path: {}", path.display());
                }
                _ => println!("  kept in memory"),
            }
            println!("  size: {} bytes", opened.handle.len());
        }
        Commands::Decrypt { envelope, key, output } => {
            let body = tokio::fs::read(&envelope)
                .await
                .with_context(|| format!("Failed to read {}", envelope.display()))?;
            let content_type = envelope
                .extension()
                .filter(|ext| ext.eq_ignore_ascii_case("json"))
                .map(|_| "application/json");

            let codec = StandardBase64;
            let plaintext_base64 = decrypt_body_to_base64(body, content_type, &key, &codec)?;
            let plaintext = justo_core::crypto::Base64Codec::decode(&codec, &plaintext_base64)?;
            tokio::fs::write(&output, &plaintext)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {} bytes to {}", plaintext.len(), output.display());
        }
        Commands::UnwrapRsa {
            protected_key,
            private_key,
            padding,
        } => {
            let pem = tokio::fs::read_to_string(&private_key)
                .await
                .with_context(|| format!("Failed to read {}", private_key.display()))?;
            let key_hex = unwrap_rsa_to_hex(&protected_key, &pem, padding, &StandardBase64)?;
            println!("{}", key_hex.as_str());
        }
        Commands::UnwrapPreshared {
            protected_key,
            master_key,
        } => {
            let key = unwrap_preshared_to_base64(&protected_key, &master_key, &StandardBase64)?;
            println!("{}", key.as_str());
        }
        Commands::Purge => {
            let config = CoreConfig::from_env()?;
            let cache = justo_core::EphemeralCache::new(config.cache);
            let removed = cache.purge_expired().await?;
            println!("Removed {} expired file(s) from {}", removed, cache.directory().display());
        }
        Commands::ReleaseAll => {
            let config = CoreConfig::from_env()?;
            let cache = justo_core::EphemeralCache::new(config.cache);
            let removed = cache.release_all().await?;
            println!("Removed {} file(s) from {}", removed, cache.directory().display());
        }
    }

    Ok(())
}

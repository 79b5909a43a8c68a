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


//! Ephemeral plaintext materialization
//!
//! Decrypted assets are exposed to the renderer or player in one of two ways:
//! - Books stay in memory and go straight to the reader's web view
//! - Audio is written to the app's private cache directory and played from there
//!
//! # Writing
//! A cache file is written through a hidden `.part` temp file created with
//! `create_new` (and mode `0600` on Unix), synced, then renamed into place.
//! If the write fails, or the future is dropped because the access was
//! cancelled, the temp file is removed.
//!
//! # Cleanup
//! The player owns a file once it has the handle. [`EphemeralCache::release`]
//! deletes one, [`EphemeralCache::release_all`] every file this crate wrote,
//! and [`EphemeralCache::purge_expired`] files older than the configured TTL.
//! Only names matching `file::paths` are ever touched.

use crate::api::asset::AssetKind;
use crate::crypto::gcm::PlaintextAsset;
use crate::error::{DrmError, Result};
use crate::file::paths::{
    cache_file_name, default_cache_directory, is_cache_file_name, is_partial_file_name, partial_file_name,
    path_from_reference, playable_uri,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Default lifetime of a cache file (24 hours)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Age after which a leftover `.part` file is considered orphaned
const PARTIAL_GRACE: Duration = Duration::from_secs(5 * 60);

/// Attempts at finding an unused file name
const MAX_NAME_ATTEMPTS: usize = 3;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// App-private cache directory, never shared or public storage
    pub directory: PathBuf,

    /// Age after which `purge_expired` removes a file
    #[serde(rename = "ttl_secs", with = "crate::config::duration_secs")]
    pub ttl: Duration,

    /// Write books to disk as well instead of keeping them in memory
    pub persist_books: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            persist_books: false,
        }
    }
}

/// Where a decrypted asset can be consumed from
pub enum LocalHandle {
    /// Plaintext kept in memory, zeroized when dropped
    Memory { kind: AssetKind, plaintext: PlaintextAsset },
    /// Plaintext written to a private cache file
    File {
        kind: AssetKind,
        path: PathBuf,
        /// Plain path on Android, `file://` URL elsewhere
        uri: String,
        size: u64,
    },
}

impl LocalHandle {
    pub fn kind(&self) -> AssetKind {
        match self {
            LocalHandle::Memory { kind, .. } | LocalHandle::File { kind, .. } => *kind,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LocalHandle::File { path, .. } => Some(path),
            LocalHandle::Memory { .. } => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match self {
            LocalHandle::File { uri, .. } => Some(uri),
            LocalHandle::Memory { .. } => None,
        }
    }

    pub fn plaintext(&self) -> Option<&PlaintextAsset> {
        match self {
            LocalHandle::Memory { plaintext, .. } => Some(plaintext),
            LocalHandle::File { .. } => None,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            LocalHandle::Memory { plaintext, .. } => plaintext.len() as u64,
            LocalHandle::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalHandle::Memory { kind, plaintext } => f
                .debug_struct("Memory")
                .field("kind", kind)
                .field("len", &plaintext.len())
                .finish(),
            LocalHandle::File { kind, path, size, .. } => f
                .debug_struct("File")
                .field("kind", kind)
                .field("path", path)
                .field("size", size)
                .finish(),
        }
    }
}

/// Removes a temp file unless disarmed; runs on error and on cancellation
struct PartialFileGuard {
    path: Option<PathBuf>,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed partial cache file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial cache file"),
            }
        }
    }
}

/// Materializer for decrypted assets
///
/// Holds no per-access state: concurrent accesses write disjoint file names.
#[derive(Debug, Clone)]
pub struct EphemeralCache {
    config: CacheConfig,
}

impl EphemeralCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Expose plaintext to the rendering or playback layer
    ///
    /// # Errors
    /// `Storage` if the cache directory cannot be created or written
    pub async fn materialize(&self, plaintext: PlaintextAsset, kind: AssetKind) -> Result<LocalHandle> {
        match kind {
            AssetKind::Book if !self.config.persist_books => {
                tracing::debug!(bytes = plaintext.len(), "Keeping book plaintext in memory");
                Ok(LocalHandle::Memory { kind, plaintext })
            }
            _ => self.write_file(&plaintext, kind).await,
        }
    }

    /// Write plaintext to a new cache file
    pub async fn write_file(&self, plaintext: &PlaintextAsset, kind: AssetKind) -> Result<LocalHandle> {
        let directory = self.directory();
        fs::create_dir_all(directory).await.map_err(|e| {
            DrmError::storage(format!("Failed to create cache directory: {}", e), Some(directory))
        })?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = cache_file_name(kind, chrono::Utc::now());
            let final_path = directory.join(&name);
            let partial_path = directory.join(partial_file_name(&name));

            if fs::try_exists(&final_path).await.unwrap_or(false) {
                continue;
            }

            let file = match open_private(&partial_path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(DrmError::storage(
                        format!("Failed to create cache file: {}", e),
                        Some(&partial_path),
                    ))
                }
            };
            commit_file(file, &partial_path, &final_path, plaintext).await?;

            let uri = match playable_uri(&final_path) {
                Ok(uri) => uri,
                Err(e) => {
                    let _ = std::fs::remove_file(&final_path);
                    return Err(e);
                }
            };

            tracing::info!(path = %final_path.display(), bytes = plaintext.len(), %kind, "Materialized asset");

            return Ok(LocalHandle::File {
                kind,
                path: final_path,
                uri,
                size: plaintext.len() as u64,
            });
        }

        Err(DrmError::storage(
            "Could not find an unused cache file name",
            Some(directory),
        ))
    }

    /// Delete the file behind a handle; in-memory handles need nothing
    ///
    /// Returns whether a file was removed.
    pub async fn release(&self, handle: &LocalHandle) -> Result<bool> {
        match handle.path() {
            Some(path) => self.release_path(path).await,
            None => Ok(false),
        }
    }

    /// Delete a cache file named by a path or `file://` URL
    pub async fn release_reference(&self, reference: &str) -> Result<bool> {
        let path = path_from_reference(reference)?;
        self.release_path(&path).await
    }

    /// Delete one cache file
    ///
    /// # Errors
    /// `InvalidInput` if the path is outside the cache directory or not a cache file
    pub async fn release_path(&self, path: &Path) -> Result<bool> {
        let owned = path.parent() == Some(self.directory())
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map(is_cache_file_name)
                .unwrap_or(false);
        if !owned {
            return Err(DrmError::invalid_input(format!(
                "Not a cache file of this library: {}",
                path.display()
            )));
        }

        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Released cache file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DrmError::storage(format!("Failed to delete cache file: {}", e), Some(path))),
        }
    }

    /// Delete every cache file, plus `.part` files left behind by earlier runs
    pub async fn release_all(&self) -> Result<usize> {
        let removed = self
            .sweep(|name, age| is_cache_file_name(name) || (is_partial_file_name(name) && age >= PARTIAL_GRACE))
            .await?;
        tracing::info!(removed, directory = %self.directory().display(), "Released all cache files");
        Ok(removed)
    }

    /// Delete cache files older than the TTL and orphaned `.part` files
    pub async fn purge_expired(&self) -> Result<usize> {
        let ttl = self.config.ttl;
        let removed = self
            .sweep(|name, age| {
                (is_cache_file_name(name) && age >= ttl)
                    || (is_partial_file_name(name) && age >= ttl.min(PARTIAL_GRACE))
            })
            .await?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired cache files");
        }
        Ok(removed)
    }

    /// Remove files whose name and age match; missing directory means nothing to do
    async fn sweep<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&str, Duration) -> bool,
    {
        let directory = self.directory();
        let mut entries = match fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(DrmError::storage(
                    format!("Failed to read cache directory: {}", e),
                    Some(directory),
                ))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            DrmError::storage(format!("Failed to read cache directory entry: {}", e), Some(directory))
        })? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);

            if matches(name, age) {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file"),
                }
            }
        }

        Ok(removed)
    }
}

/// Fill an open temp file and rename it into place
///
/// Nothing is awaited between the rename and the return, so a dropped future
/// either leaves no file behind or has already produced the final one.
async fn commit_file(
    mut file: fs::File,
    partial_path: &Path,
    final_path: &Path,
    plaintext: &PlaintextAsset,
) -> Result<()> {
    let mut guard = PartialFileGuard::new(partial_path.to_path_buf());

    let written = async {
        file.write_all(plaintext.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    written.map_err(|e| DrmError::storage(format!("Failed to write cache file: {}", e), Some(partial_path)))?;

    // Synchronous, so no await point separates the rename from disarm
    std::fs::rename(partial_path, final_path).map_err(|e| {
        DrmError::storage(format!("Failed to move cache file into place: {}", e), Some(final_path))
    })?;
    guard.disarm();
    Ok(())
}

async fn open_private(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

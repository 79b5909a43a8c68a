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


//! Cache file naming and playable references
//!
//! # Naming
//! - Final file: `decrypted_<unix-millis>_<8 hex>.<ext>`
//! - While writing: `.decrypted_<unix-millis>_<8 hex>.<ext>.part`
//!
//! The random suffix keeps two accesses started in the same millisecond
//! apart, so concurrent accesses never share a file and need no locking.
//!
//! # Playable References
//! The Android media player takes a plain path; every other platform gets a
//! `file://` URL.

use crate::api::asset::AssetKind;
use crate::error::{DrmError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use url::Url;

/// Prefix shared by every decrypted cache file
pub const CACHE_FILE_PREFIX: &str = "decrypted_";

/// Suffix of a cache file still being written
pub const PARTIAL_SUFFIX: &str = ".part";

/// Directory name used under the system temp dir when none is configured
const DEFAULT_CACHE_DIR_NAME: &str = "justo-cache";

#[cfg(target_os = "android")]
const USES_FILE_URLS: bool = false;
#[cfg(not(target_os = "android"))]
const USES_FILE_URLS: bool = true;

/// Unique cache file name for a new plaintext
pub fn cache_file_name(kind: AssetKind, now: DateTime<Utc>) -> String {
    format!(
        "{}{}_{:08x}.{}",
        CACHE_FILE_PREFIX,
        now.timestamp_millis(),
        rand::random::<u32>(),
        kind.file_extension()
    )
}

/// Name of the temp file a cache file is written through
pub fn partial_file_name(final_name: &str) -> String {
    format!(".{}{}", final_name, PARTIAL_SUFFIX)
}

/// Whether `name` is a finished cache file written by this crate
pub fn is_cache_file_name(name: &str) -> bool {
    name.starts_with(CACHE_FILE_PREFIX)
        && [AssetKind::Book, AssetKind::Audio]
            .iter()
            .any(|kind| name.ends_with(&format!(".{}", kind.file_extension())))
}

/// Whether `name` is a leftover temp file written by this crate
pub fn is_partial_file_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(PARTIAL_SUFFIX))
        .map(is_cache_file_name)
        .unwrap_or(false)
}

/// Fallback cache directory when the app does not pass its caches path
pub fn default_cache_directory() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

/// Reference handed to the playback layer for a cache file
///
/// # Errors
/// `Storage` if the path is relative and cannot form a `file://` URL
pub fn playable_uri(path: &Path) -> Result<String> {
    if !USES_FILE_URLS {
        return Ok(path.display().to_string());
    }
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .map_err(|_| DrmError::storage("Cache path is not absolute", Some(path)))
}

/// Turn a path or `file://` URL from the UI back into a path
pub fn path_from_reference(reference: &str) -> Result<PathBuf> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(DrmError::invalid_input("Empty file reference"));
    }
    if reference.starts_with("file://") {
        let url = Url::parse(reference)
            .map_err(|e| DrmError::invalid_input(format!("Invalid file URL: {}", e)))?;
        return url
            .to_file_path()
            .map_err(|_| DrmError::invalid_input(format!("Not a local file URL: {}", reference)));
    }
    Ok(PathBuf::from(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cache_file_name_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let name = cache_file_name(AssetKind::Audio, now);

        assert!(name.starts_with("decrypted_1700000000123_"));
        assert!(name.ends_with(".mp3"));
        let suffix = &name["decrypted_1700000000123_".len()..name.len() - 4];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_cache_file_name(&name));
    }

    #[test]
    fn test_same_millisecond_names_differ() {
        let now = Utc::now();
        let names: std::collections::HashSet<_> =
            (0..64).map(|_| cache_file_name(AssetKind::Audio, now)).collect();
        assert!(names.len() > 60);
    }

    #[test]
    fn test_partial_names() {
        let name = cache_file_name(AssetKind::Book, Utc::now());
        let partial = partial_file_name(&name);
        assert!(partial.starts_with(".decrypted_"));
        assert!(partial.ends_with(".epub.part"));
        assert!(is_partial_file_name(&partial));
        assert!(!is_cache_file_name(&partial));
        assert!(!is_partial_file_name(&name));
    }

    #[test]
    fn test_foreign_files_are_not_ours() {
        assert!(!is_cache_file_name("notes.mp3"));
        assert!(!is_cache_file_name("decrypted_123.txt"));
        assert!(!is_partial_file_name(".cache.part"));
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn test_playable_uri_is_file_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("decrypted_1_00000000.mp3");
        let uri = playable_uri(&path).unwrap();
        assert!(uri.starts_with("file://"));
        assert_eq!(path_from_reference(&uri).unwrap(), path);
    }

    #[test]
    fn test_path_from_plain_reference() {
        assert_eq!(
            path_from_reference("/data/cache/decrypted_1_00000000.mp3").unwrap(),
            PathBuf::from("/data/cache/decrypted_1_00000000.mp3")
        );
        assert!(path_from_reference("").is_err());
    }
}

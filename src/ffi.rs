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


//! C FFI bridge - exposes the licensing pipeline to the React Native app
//!
//! # Architecture
//! JavaScript (React Native) → native module (Swift / Kotlin) → C FFI → Rust
//!
//! # Design Patterns
//! 1. **JSON Communication**: configuration, asset references and results cross as JSON
//! 2. **Error Handling**: errors come back as JSON error responses, never as crashes
//! 3. **Async Runtime**: one lazily created Tokio runtime drives the async pipeline
//! 4. **No Panics**: panics are caught at the boundary
//! 5. **Memory Safety**: every returned string must be freed with `justo_free_string()`
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//! Or on error:
//! ```json
//! { "success": false, "error": "message", "retryable": false, "auth_error": true }
//! ```
//! `retryable` tells the UI whether offering "try again" makes sense;
//! `auth_error` means the session was rejected and the user must log in again.
//!
//! # Cancellation
//! `justo_open_asset` blocks the calling (background) thread until the access
//! finishes. Calling `justo_cancel_access` with the same access id from any
//! other thread makes it return `Cancelled` promptly.

use crate::access::{decrypt_body_to_base64, LibraryCore, OpenedAsset};
use crate::api::asset::AssetReference;
use crate::api::client::InMemorySession;
use crate::config::CoreConfig;
use crate::error::{DrmError, Result};
use crate::file::cache::LocalHandle;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;
use std::sync::{Arc, RwLock};

// Lazy static tokio runtime and library state shared by all bridge calls
lazy_static::lazy_static! {
    static ref RUNTIME: std::result::Result<tokio::runtime::Runtime, String> =
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("justo-core")
            .build()
            .map_err(|e| e.to_string());
    static ref SESSION: Arc<InMemorySession> = Arc::new(InMemorySession::anonymous());
    static ref CORE: RwLock<Option<Arc<LibraryCore>>> = RwLock::new(None);
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn runtime() -> Result<&'static tokio::runtime::Runtime> {
    RUNTIME
        .as_ref()
        .map_err(|e| DrmError::internal(format!("Failed to create Tokio runtime: {}", e)))
}

fn core() -> Result<Arc<LibraryCore>> {
    let guard = CORE.read().unwrap_or_else(|p| p.into_inner());
    guard
        .as_ref()
        .cloned()
        .ok_or_else(|| DrmError::InvalidConfiguration("justo_init has not been called".to_string()))
}

/// Safely convert C string pointer to Rust String
///
/// # Safety
/// Caller must ensure ptr is a valid null-terminated C string
fn c_str_to_string(ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(DrmError::invalid_input("Null pointer received"));
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| DrmError::invalid_input(format!("Invalid UTF-8: {}", e)))
    }
}

/// Like `c_str_to_string`, but null means "not given"
fn optional_c_str(ptr: *const c_char) -> Result<Option<String>> {
    if ptr.is_null() {
        return Ok(None);
    }
    c_str_to_string(ptr).map(|s| Some(s).filter(|s| !s.trim().is_empty()))
}

/// Convert Rust string to C string pointer
///
/// # Safety
/// Caller MUST free the returned pointer using `justo_free_string()`
fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => {
            let error_json = error_response("String contains null bytes");
            CString::new(error_json)
                .map(CString::into_raw)
                .unwrap_or(std::ptr::null_mut())
        }
    }
}

/// Create success response JSON
fn success_response<T: serde::Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

/// Create error response JSON for a bare message
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Create error response JSON with classification for the UI
fn drm_error_response(error: &DrmError) -> String {
    serde_json::json!({
        "success": false,
        "error": error.to_string(),
        "user_message": error.user_message(),
        "retryable": error.is_retryable(),
        "auth_error": error.is_auth_error(),
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> Result<String> + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => drm_error_response(&e),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

fn opened_asset_json(opened: &OpenedAsset, core: &LibraryCore) -> serde_json::Value {
    let (uri, path, content_base64) = match &opened.handle {
        LocalHandle::File { uri, path, .. } => (Some(uri.clone()), Some(path.display().to_string()), None),
        LocalHandle::Memory { plaintext, .. } => (None, None, Some(plaintext.to_base64(core.codec()))),
    };
    serde_json::json!({
        "access_id": opened.access_id,
        "asset_id": opened.asset.id,
        "kind": opened.asset.kind,
        "scheme": opened.scheme,
        "uri": uri,
        "path": path,
        "size": opened.handle.len(),
        "content_base64": content_base64,
    })
}

// ============================================================================
// SETUP
// ============================================================================

/// Initialize logging to stderr / logcat
///
/// # Arguments
/// * `filter` - `EnvFilter` directive such as `"justo_core=debug"`, or null for the default
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_init_logging(filter: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let filter = optional_c_str(filter)?;
        let installed = crate::init_logging(filter.as_deref());
        Ok(success_response(serde_json::json!({ "installed": installed })))
    });

    string_to_c_str(response)
}

/// Create (or replace) the library core
///
/// # Arguments
/// * `config_json` - `CoreConfig` as JSON; null or empty uses `JUSTO_*` environment defaults
/// * `session_token` - Bearer token of the logged-in user, may be null
///
/// # Returns
/// ```json
/// { "success": true, "data": { "cache_dir": "/data/.../cache" } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_init(config_json: *const c_char, session_token: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let config = match optional_c_str(config_json)? {
            Some(json) => CoreConfig::from_json(&json)?,
            None => CoreConfig::from_env()?,
        };

        match optional_c_str(session_token)? {
            Some(token) => SESSION.set_token(token),
            None => crate::api::client::SessionStore::invalidate(SESSION.as_ref()),
        }

        // Build inside the runtime so reqwest can pick up the reactor
        let core = runtime()?.block_on(async { LibraryCore::new(config, SESSION.clone()) })?;
        let cache_dir = core.cache().directory().display().to_string();

        *CORE.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(core));

        Ok(success_response(serde_json::json!({ "cache_dir": cache_dir })))
    });

    string_to_c_str(response)
}

/// Replace the bearer token after a (re-)login; null logs out
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_set_session_token(session_token: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        match optional_c_str(session_token)? {
            Some(token) => SESSION.set_token(token),
            None => crate::api::client::SessionStore::invalidate(SESSION.as_ref()),
        }
        Ok(success_response(serde_json::json!({})))
    });

    string_to_c_str(response)
}

// ============================================================================
// ASSET ACCESS
// ============================================================================

/// Open an asset: license, unwrap, fetch, decrypt, materialize
///
/// # Arguments
/// * `asset_json` - `{"id": "42", "kind": "audio", "bodyLocation": "/audio/42/body"}`
/// * `access_id` - Id for `justo_cancel_access`, or null to generate one
///
/// # Returns
/// ```json
/// {
///   "success": true,
///   "data": {
///     "access_id": "...",
///     "asset_id": "42",
///     "kind": "audio",
///     "scheme": "aes-gcm",
///     "uri": "file:///.../decrypted_1700000000000_1a2b3c4d.mp3",
///     "path": "/.../decrypted_1700000000000_1a2b3c4d.mp3",
///     "size": 1234567,
///     "content_base64": null
///   }
/// }
/// ```
/// Books kept in memory come back with `content_base64` set and no `uri`.
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_open_asset(asset_json: *const c_char, access_id: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let asset: AssetReference = serde_json::from_str(&c_str_to_string(asset_json)?)?;
        let access_id = optional_c_str(access_id)?.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let core = core()?;

        let opened = runtime()?.block_on(core.open_asset_tracked(&access_id, &asset))?;
        Ok(success_response(opened_asset_json(&opened, &core)))
    });

    string_to_c_str(response)
}

/// Cancel an in-flight `justo_open_asset`
///
/// # Returns
/// `{"success": true, "data": {"cancelled": true}}`; `cancelled` is false when
/// no access with that id is running
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_cancel_access(access_id: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let access_id = c_str_to_string(access_id)?;
        let cancelled = core()?.cancel_access(&access_id);
        Ok(success_response(serde_json::json!({ "cancelled": cancelled })))
    });

    string_to_c_str(response)
}

/// Decrypt an envelope with a known key and return the plaintext as base64
///
/// # Arguments
/// * `envelope` - JSON envelope text (`{"iv","authTag","content"}`) or base64 of `iv || authTag || ciphertext`
/// * `key` - 32-byte key as 64 hex characters or base64
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_decrypt_to_base64(envelope: *const c_char, key: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let envelope = c_str_to_string(envelope)?;
        let key = zeroize::Zeroizing::new(c_str_to_string(key)?);
        let codec = crate::crypto::encoding::StandardBase64;

        let (body, content_type) = if envelope.trim_start().starts_with('{') {
            (envelope.into_bytes(), Some("application/json"))
        } else {
            let bytes = crate::crypto::encoding::Base64Codec::decode(&codec, &envelope)
                .map_err(|e| DrmError::malformed_envelope(format!("envelope is not base64: {}", e)))?;
            (bytes, None)
        };

        let plaintext_base64 = decrypt_body_to_base64(body, content_type, &key, &codec)?;
        Ok(success_response(serde_json::json!({ "plaintext_base64": plaintext_base64 })))
    });

    string_to_c_str(response)
}

// ============================================================================
// CACHE MANAGEMENT
// ============================================================================

/// Delete one decrypted cache file, given its path or `file://` URI
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_release(reference: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let reference = c_str_to_string(reference)?;
        let core = core()?;
        let released = runtime()?.block_on(core.cache().release_reference(&reference))?;
        Ok(success_response(serde_json::json!({ "released": released })))
    });

    string_to_c_str(response)
}

/// Delete every decrypted cache file (logout, app start)
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_release_all() -> *mut c_char {
    let response = catch_panic(|| {
        let core = core()?;
        let removed = runtime()?.block_on(core.cache().release_all())?;
        Ok(success_response(serde_json::json!({ "removed": removed })))
    });

    string_to_c_str(response)
}

/// Delete decrypted cache files older than the configured TTL
///
/// # Safety
/// Caller must free the returned string with `justo_free_string()`
#[no_mangle]
pub extern "C" fn justo_purge_expired() -> *mut c_char {
    let response = catch_panic(|| {
        let core = core()?;
        let removed = runtime()?.block_on(core.cache().purge_expired())?;
        Ok(success_response(serde_json::json!({ "removed": removed })))
    });

    string_to_c_str(response)
}

/// Free a string returned by any `justo_*` function
///
/// # Safety
/// Must be called exactly once per returned string.
#[no_mangle]
pub extern "C" fn justo_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            // Take ownership and drop the CString
            let _ = CString::from_raw(ptr);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encoding::{Base64Codec, StandardBase64};
    use aes_gcm::aead::{AeadInPlace, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    fn call(ptr: *mut c_char) -> serde_json::Value {
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        justo_free_string(ptr);
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_success_response() {
        let response = success_response(serde_json::json!({"test": "data"}));
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("\"test\":\"data\""));
    }

    #[test]
    fn test_drm_error_response_classification() {
        let response = drm_error_response(&DrmError::LicenseDenied {
            status_code: 401,
            message: "jwt expired".to_string(),
        });
        let json: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["auth_error"], true);
        assert_eq!(json["retryable"], false);
        assert!(json["error"].as_str().unwrap().contains("jwt expired"));
    }

    #[test]
    fn test_catch_panic_with_panic() {
        let result = catch_panic(|| -> Result<String> {
            panic!("test panic");
        });
        assert!(result.contains("\"success\":false"));
        assert!(result.contains("test panic"));
    }

    #[test]
    fn test_null_pointer_handling() {
        assert!(c_str_to_string(std::ptr::null()).is_err());
        assert_eq!(optional_c_str(std::ptr::null()).unwrap(), None);

        let json = call(justo_cancel_access(std::ptr::null()));
        assert_eq!(json["success"], false);
    }

    #[test]
    fn test_decrypt_json_envelope_over_ffi() {
        let key = [0x17u8; 32];
        let iv = [0u8; 12];
        let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
        let mut buffer = b"HELLO WORLD".to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .unwrap();
        let envelope = serde_json::json!({
            "iv": StandardBase64.encode(&iv),
            "authTag": StandardBase64.encode(&tag),
            "content": StandardBase64.encode(&buffer),
        })
        .to_string();

        let envelope = CString::new(envelope).unwrap();
        let key_hex = CString::new(hex::encode(key)).unwrap();
        let json = call(justo_decrypt_to_base64(envelope.as_ptr(), key_hex.as_ptr()));

        assert_eq!(json["success"], true);
        let plaintext = StandardBase64
            .decode(json["data"]["plaintext_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(plaintext, b"HELLO WORLD");
    }

    #[test]
    fn test_decrypt_missing_auth_tag_over_ffi() {
        let envelope = CString::new(r#"{"iv":"AAAAAAAAAAAAAAAA","content":"AQID"}"#).unwrap();
        let key = CString::new(hex::encode([0u8; 32])).unwrap();
        let json = call(justo_decrypt_to_base64(envelope.as_ptr(), key.as_ptr()));

        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("missing authTag"));
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let config = CString::new(r#"{"crypto":{"key_bits":512}}"#).unwrap();
        let json = call(justo_init(config.as_ptr(), std::ptr::null()));
        assert_eq!(json["success"], false);
    }

    #[test]
    fn test_memory_safety() {
        let c_ptr = string_to_c_str("Memory test".to_string());
        assert!(!c_ptr.is_null());
        justo_free_string(c_ptr);
        justo_free_string(std::ptr::null_mut());
    }
}

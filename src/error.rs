//! Error types for the Justo DRM core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by pipeline stage (key generation, license, unwrap,
//! decryption, asset fetch, storage) so the UI layer can decide what to show
//! and whether offering a retry makes sense.
//!
//! ## Propagation
//!
//! Every stage fails fast and hands a typed error to its caller. Nothing in
//! this crate retries on its own and nothing substitutes fallback plaintext.
//! A retry always means running the whole access flow again from a fresh key
//! pair and a fresh license request.

use thiserror::Error;

/// Result type alias using our DrmError type
pub type Result<T> = std::result::Result<T, DrmError>;

/// Failures of the symmetric decryption engine
///
/// No variant ever carries partial plaintext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    /// GCM tag did not verify: tampered ciphertext or wrong key
    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,

    /// Envelope is missing a field or a field cannot be decoded
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Key is not an AES-256 key
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    KeyLengthInvalid { expected: usize, actual: usize },
}

/// Failures while recovering the symmetric key from a license
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwrapError {
    /// Preshared scheme selected but no master key is configured
    #[error("no master key configured for preshared unwrap")]
    MissingMasterKey,

    /// Protected key or master key is not valid base64
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Private key PEM could not be parsed
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// RSA decryption of the protected key failed
    #[error("RSA decryption failed: {0}")]
    RsaDecryptFailed(String),

    /// Preshared payload cannot hold iv(16) + authTag(16)
    #[error("payload too short: {actual} bytes, need at least {minimum}")]
    PayloadTooShort { minimum: usize, actual: usize },

    /// GCM tag on the wrapped key did not verify
    #[error("authentication of wrapped key failed")]
    AuthenticationFailed,

    /// Unwrapped key (or master key) is not 32 bytes
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    KeyLengthInvalid { expected: usize, actual: usize },
}

/// Main error type for the DRM core
#[derive(Error, Debug)]
pub enum DrmError {
    // ===== Key Generation =====

    /// RSA key pair generation failed (entropy or parameter failure)
    #[error("Key generation failed: {0}")]
    Keygen(String),

    // ===== License Errors =====

    /// License server answered with a non-2xx status
    #[error("License denied ({status_code}): {message}")]
    LicenseDenied {
        status_code: u16,
        /// `message` or `error` field of the response body when present
        message: String,
    },

    /// License server could not be reached or did not answer in time
    #[error("License server unreachable: {message}")]
    LicenseUnreachable {
        message: String,
        timed_out: bool,
    },

    /// License response lacks the expected fields
    #[error("Malformed license response: {message}")]
    LicenseMalformed {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    // ===== Crypto Errors =====

    /// Symmetric key could not be recovered from the license
    #[error("Key unwrap failed: {0}")]
    Unwrap(#[from] UnwrapError),

    /// Asset body could not be decrypted
    #[error("Decryption failed: {0}")]
    Decryption(#[from] DecryptionError),

    // ===== Asset Fetch Errors =====

    /// Encrypted asset body could not be fetched
    #[error("Asset fetch failed: {message}")]
    AssetFetchFailed {
        message: String,
        status_code: Option<u16>,
        /// Whether the UI may reasonably offer a retry
        is_transient: bool,
    },

    /// Asset body exceeds the configured size limit
    #[error("Asset body too large: {actual} bytes exceeds limit of {limit} bytes")]
    AssetTooLarge { limit: u64, actual: u64 },

    // ===== Storage Errors =====

    /// Cache directory unwritable, disk full, permission denied
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        path: Option<String>,
    },

    // ===== Configuration/General Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Access was abandoned by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    Internal(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

// Helper methods for creating common errors
impl DrmError {
    /// Create a Storage error for a path
    pub fn storage<S: Into<String>>(message: S, path: Option<&std::path::Path>) -> Self {
        DrmError::Storage {
            message: message.into(),
            path: path.map(|p| p.display().to_string()),
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        DrmError::InvalidInput(message.into())
    }

    /// Create an Internal error with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DrmError::Internal(message.into())
    }

    /// Create a LicenseMalformed error
    pub fn license_malformed<S: Into<String>>(message: S, response_body: Option<String>) -> Self {
        DrmError::LicenseMalformed {
            message: message.into(),
            response_body,
        }
    }

    /// Create a MalformedEnvelope decryption error
    pub fn malformed_envelope<S: Into<String>>(message: S) -> Self {
        DrmError::Decryption(DecryptionError::MalformedEnvelope(message.into()))
    }

    /// Check if the UI may offer the user a retry of the whole access flow
    ///
    /// Returns `true` for transient failures:
    /// - License server unreachable or timed out
    /// - License server 5xx
    /// - Transient asset fetch failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DrmError::LicenseUnreachable { .. }
                | DrmError::LicenseDenied { status_code: 500..=599, .. }
                | DrmError::AssetFetchFailed { is_transient: true, .. }
        )
    }

    /// Check if error means the session is invalid or the user lacks access
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            DrmError::LicenseDenied { status_code: 401 | 403, .. }
                | DrmError::AssetFetchFailed { status_code: Some(401 | 403), .. }
        )
    }

    /// Check if error is related to key handling or decryption
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            DrmError::Keygen(_) | DrmError::Unwrap(_) | DrmError::Decryption(_)
        )
    }

    /// Check if error reports a key that is not exactly 32 bytes
    pub fn is_key_length_invalid(&self) -> bool {
        matches!(
            self,
            DrmError::Decryption(DecryptionError::KeyLengthInvalid { .. })
                | DrmError::Unwrap(UnwrapError::KeyLengthInvalid { .. })
        )
    }

    /// Check if error is a GCM authentication failure (tampering or wrong key)
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            DrmError::Decryption(DecryptionError::AuthenticationFailed)
                | DrmError::Unwrap(UnwrapError::AuthenticationFailed)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            DrmError::LicenseDenied { status_code: 401, .. } => {
                "Your session has expired. Please log in again.".to_string()
            }
            DrmError::LicenseDenied { status_code: 403, message } => {
                format!("You do not have access to this title: {}", message)
            }
            DrmError::LicenseDenied { message, .. } => {
                format!("The license could not be issued: {}", message)
            }
            DrmError::LicenseUnreachable { timed_out: true, .. } => {
                "The license server did not respond in time. Please try again.".to_string()
            }
            DrmError::LicenseUnreachable { .. } => {
                "Could not reach the license server. Check your connection and try again.".to_string()
            }
            DrmError::AssetFetchFailed { is_transient: true, .. } => {
                "Downloading the title failed. Please try again.".to_string()
            }
            DrmError::Decryption(DecryptionError::AuthenticationFailed)
            | DrmError::Unwrap(UnwrapError::AuthenticationFailed) => {
                "This title could not be verified and was not opened.".to_string()
            }
            DrmError::Storage { .. } => {
                "Not enough space or no permission to prepare this title for playback.".to_string()
            }
            DrmError::Cancelled => "Cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DrmError::LicenseUnreachable {
            message: "timeout".to_string(),
            timed_out: true
        }
        .is_retryable());
        assert!(DrmError::LicenseDenied {
            status_code: 503,
            message: "busy".to_string()
        }
        .is_retryable());
        assert!(!DrmError::LicenseDenied {
            status_code: 403,
            message: "not owned".to_string()
        }
        .is_retryable());
        assert!(!DrmError::Decryption(DecryptionError::AuthenticationFailed).is_retryable());
        assert!(!DrmError::Cancelled.is_retryable());
    }

    #[test]
    fn test_auth_error_classification() {
        let denied = DrmError::LicenseDenied {
            status_code: 401,
            message: "jwt expired".to_string(),
        };
        assert!(denied.is_auth_error());
        assert!(denied.user_message().contains("session has expired"));

        let fetch = DrmError::AssetFetchFailed {
            message: "forbidden".to_string(),
            status_code: Some(403),
            is_transient: false,
        };
        assert!(fetch.is_auth_error());
    }

    #[test]
    fn test_key_length_invalid_from_both_stages() {
        let from_unwrap: DrmError = UnwrapError::KeyLengthInvalid {
            expected: 32,
            actual: 16,
        }
        .into();
        let from_decrypt: DrmError = DecryptionError::KeyLengthInvalid {
            expected: 32,
            actual: 31,
        }
        .into();

        assert!(from_unwrap.is_key_length_invalid());
        assert!(from_decrypt.is_key_length_invalid());
        assert!(from_unwrap.is_crypto_error());
    }

    #[test]
    fn test_authentication_failure_message_hides_detail() {
        let err = DrmError::Decryption(DecryptionError::AuthenticationFailed);
        assert!(err.is_authentication_failure());
        assert_eq!(
            err.user_message(),
            "This title could not be verified and was not opened."
        );
    }
}

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


//! HTTP client for the Justo API
//!
//! Thin wrapper around `reqwest::Client` shared by the license request and
//! the asset body fetch:
//! - Bearer token from a [`SessionStore`] on every request
//! - Session invalidation on any 401
//! - One bounded timeout (30 s by default) per request
//! - No retries: a failed request is reported and the UI decides
//!
//! # Architecture
//!
//! The session token lives outside this crate (the app persists it after
//! login). [`SessionStore`] is the seam: the app hands in its own store, tests
//! and the CLI use [`InMemorySession`].
//!
//! Transport failures are mapped per [`Endpoint`], so a timeout on the
//! license endpoint becomes `LicenseUnreachable` while the same timeout on an
//! asset body becomes a transient `AssetFetchFailed`.

use crate::error::{DrmError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for an encrypted asset body (512 MiB)
pub const DEFAULT_MAX_ASSET_BYTES: u64 = 512 * 1024 * 1024;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:4000/api";

/// Source of the bearer token attached to license and asset requests
pub trait SessionStore: Send + Sync {
    /// Current bearer token, `None` when logged out
    fn bearer_token(&self) -> Option<String>;

    /// Called after the server answered 401; the stored token must be dropped
    fn invalidate(&self);
}

/// Session store kept in process memory
#[derive(Debug, Default)]
pub struct InMemorySession {
    token: RwLock<Option<String>>,
}

impl InMemorySession {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set_token<S: Into<String>>(&self, token: S) {
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token.into()),
            Err(poisoned) => *poisoned.into_inner() = Some(token.into()),
        }
    }
}

impl SessionStore for InMemorySession {
    fn bearer_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn invalidate(&self) {
        match self.token.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Configuration for [`HttpClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL, e.g. `https://api.justo.example/api`
    pub base_url: String,
    /// Per-request timeout
    #[serde(rename = "timeout_secs", with = "crate::config::duration_secs")]
    pub timeout: Duration,
    pub user_agent: String,
    /// Largest encrypted asset body accepted
    pub max_asset_bytes: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("justo-core/{}", env!("CARGO_PKG_VERSION")),
            max_asset_bytes: DEFAULT_MAX_ASSET_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn max_asset_bytes(mut self, max_asset_bytes: u64) -> Self {
        self.config.max_asset_bytes = max_asset_bytes;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Which endpoint a request went to; decides how transport failures are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    License,
    Asset,
}

/// HTTP client shared by all accesses of one [`crate::access::LibraryCore`]
///
/// Cloning is cheap; clones share the connection pool and session store.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    session: Arc<dyn SessionStore>,
}

impl HttpClient {
    /// Create a client
    ///
    /// # Errors
    /// `InvalidConfiguration` if the user agent is not a valid header value or
    /// the TLS backend cannot be initialised
    pub fn new(config: ClientConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| DrmError::InvalidConfiguration(format!("Invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| DrmError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Full URL for an API path such as `/license`
    ///
    /// The path is appended to the base URL as-is.
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        Url::parse(&joined).map_err(|e| DrmError::invalid_input(format!("Invalid URL '{}': {}", joined, e)))
    }

    /// Resolve an asset body location
    ///
    /// Absolute `http(s)` URLs are used unchanged, anything else is treated as
    /// a path under the API base URL.
    pub fn resolve_location(&self, location: &str) -> Result<Url> {
        let location = location.trim();
        if location.is_empty() {
            return Err(DrmError::invalid_input("Asset body location is empty"));
        }
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
            Ok(url) => Err(DrmError::invalid_input(format!(
                "Unsupported asset URL scheme '{}'",
                url.scheme()
            ))),
            Err(_) => self.endpoint_url(location),
        }
    }

    /// POST a JSON body to an API path
    pub async fn post_json<B>(&self, endpoint: Endpoint, path: &str, body: &B) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(path)?;
        tracing::debug!(%url, "POST");
        let request = self
            .client
            .post(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(body);
        self.send(endpoint, request).await
    }

    /// GET an absolute URL
    pub async fn get(&self, endpoint: Endpoint, url: Url) -> Result<Response> {
        tracing::debug!(%url, "GET");
        let request = self.client.get(url);
        self.send(endpoint, request).await
    }

    /// Attach the bearer token, send, and invalidate the session on 401
    ///
    /// Non-2xx responses are returned to the caller, which owns the mapping
    /// of statuses to errors.
    async fn send(&self, endpoint: Endpoint, request: RequestBuilder) -> Result<Response> {
        let request = match self.session.bearer_token() {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| DrmError::invalid_input("Session token is not a valid header value"))?;
                value.set_sensitive(true);
                request.header(AUTHORIZATION, value)
            }
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(?endpoint, "Server rejected session token, invalidating session");
            self.session.invalidate();
        }

        Ok(response)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").field("config", &self.config).finish()
    }
}

/// Map a reqwest failure to the error for the given endpoint
pub(crate) fn transport_error(endpoint: Endpoint, error: &reqwest::Error) -> DrmError {
    let timed_out = error.is_timeout();
    match endpoint {
        Endpoint::License => DrmError::LicenseUnreachable {
            message: error.to_string(),
            timed_out,
        },
        Endpoint::Asset => DrmError::AssetFetchFailed {
            message: format!("Asset request failed: {}", error),
            status_code: None,
            is_transient: timed_out || error.is_connect() || error.is_body(),
        },
    }
}

// ===== TESTS =====

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


//! Justo API client
//!
//! License requests and encrypted asset downloads. Login, catalog listing and
//! every other API call belong to the app and are not part of this crate.

pub mod asset;
pub mod client;
pub mod license;

// Re-export commonly used types
pub use asset::{fetch_encrypted_body, AssetKind, AssetReference, EncryptedBody};
pub use client::{ClientConfig, ClientConfigBuilder, HttpClient, InMemorySession, SessionStore};
pub use license::{request_license, LicenseRequest, LicenseResponse};

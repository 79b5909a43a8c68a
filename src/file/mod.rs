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


//! File management for decrypted assets
//!
//! Plaintext only ever lands in the app-private cache directory, never in
//! shared or public storage.

pub mod cache;
pub mod paths;

pub use cache::{CacheConfig, EphemeralCache, LocalHandle};
pub use paths::{playable_uri, CACHE_FILE_PREFIX};

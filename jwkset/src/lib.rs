//! Multi-source JSON Web Key Set resolution
//!
//! Resolves JWKs by key ID across one local key store and any number of
//! remote key sets, with rate-limited refresh when an unknown key ID shows
//! up, and exports the merged set as a single snapshot.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


pub mod client;
pub mod error;
pub mod http;
pub mod jwk;
pub mod memory;
pub mod rate_limiter;
pub mod store;

pub use client::{KeySetClient, KeySetClientOptions};
pub use error::{KeyError, KeyResult, RateLimitError};
pub use http::{HttpKeyStore, HttpKeyStoreOptions, RefreshErrorHandler};
pub use jwk::{Jwk, JwkSet, KeyOp, KeyType, KeyUse, MarshalOptions, ValidateOptions};
pub use memory::MemoryKeyStore;
pub use rate_limiter::RateLimiter;
pub use store::{KeyStore, RemoteKeyStore};
pub use tokio_util::sync::CancellationToken;

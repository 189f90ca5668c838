//! Key store interface shared by every key source
//!
//! This module provides a trait-based interface that is implemented by:
//! - In-memory storage ([`crate::memory::MemoryKeyStore`])
//! - Remote HTTP key sets ([`crate::http::HttpKeyStore`])
//! - The multi-source client ([`crate::client::KeySetClient`])
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


use crate::error::{KeyError, KeyResult};
use crate::jwk::{Jwk, JwkSet, MarshalOptions, ValidateOptions};
use async_trait::async_trait;
use serde_json::Value;

/// Trait for JWK Set storage backends
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Delete a key by ID. Returns false if no key had that ID.
    async fn key_delete(&self, key_id: &str) -> KeyResult<bool>;

    /// Read a key by ID. A missing key is [`KeyError::NotFound`].
    async fn key_read(&self, key_id: &str) -> KeyResult<Jwk>;

    /// Snapshot every key
    async fn key_read_all(&self) -> KeyResult<Vec<Jwk>>;

    /// Write a key
    async fn key_write(&self, jwk: Jwk) -> KeyResult<()>;

    /// Export the full key set, private members included
    async fn json(&self) -> KeyResult<Value> {
        self.json_with_options(MarshalOptions::private(), ValidateOptions::default())
            .await
    }

    /// Export only public key material
    async fn json_public(&self) -> KeyResult<Value> {
        self.json_with_options(MarshalOptions::public(), ValidateOptions::default())
            .await
    }

    /// Export with private key material
    async fn json_private(&self) -> KeyResult<Value> {
        self.json_with_options(MarshalOptions::private(), ValidateOptions::default())
            .await
    }

    async fn json_with_options(
        &self,
        marshal: MarshalOptions,
        validate: ValidateOptions,
    ) -> KeyResult<Value> {
        let set = self.marshal_with_options(marshal, validate).await?;
        Ok(serde_json::to_value(set)?)
    }

    async fn marshal(&self) -> KeyResult<JwkSet> {
        self.marshal_with_options(MarshalOptions::private(), ValidateOptions::default())
            .await
    }

    /// Marshal every key with the given options
    ///
    /// Keys that have no representation under `marshal` (symmetric keys in a
    /// public export) are skipped. Any other failure aborts the export.
    async fn marshal_with_options(
        &self,
        marshal: MarshalOptions,
        validate: ValidateOptions,
    ) -> KeyResult<JwkSet> {
        let mut keys = Vec::new();
        for jwk in self.key_read_all().await? {
            match jwk.marshal(marshal, validate) {
                Ok(marshaled) => keys.push(marshaled),
                Err(KeyError::InvalidOptions(_)) => continue,
                Err(e) => {
                    return Err(KeyError::wrap(
                        format!("failed to marshal key with ID {:?}", jwk.kid()),
                        e,
                    ))
                }
            }
        }
        Ok(JwkSet { keys })
    }
}

/// A key store backed by a remote key set that can be re-fetched on demand
#[async_trait]
pub trait RemoteKeyStore: KeyStore {
    /// Re-fetch the remote key set and atomically replace the local copy
    async fn refresh(&self) -> KeyResult<()>;

    /// Report a failed refresh to this store's configured error handler
    fn report_refresh_error(&self, _error: &KeyError) {}
}

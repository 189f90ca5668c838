//! In-memory key storage implementation
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
use crate::jwk::Jwk;
use crate::store::KeyStore;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory JWK Set
///
/// Keys keep their insertion order. Writing a key whose ID is already
/// present replaces it in place.
#[derive(Default)]
pub struct MemoryKeyStore {
    set: RwLock<Vec<Jwk>>,
}

impl MemoryKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given keys, later duplicates winning
    pub fn with_keys(keys: impl IntoIterator<Item = Jwk>) -> Self {
        let mut set: Vec<Jwk> = Vec::new();
        for jwk in keys {
            upsert(&mut set, jwk);
        }
        Self {
            set: RwLock::new(set),
        }
    }

    /// Atomically replace the whole key set, later duplicates winning
    pub async fn replace_all(&self, keys: Vec<Jwk>) {
        let mut fresh = Vec::with_capacity(keys.len());
        for jwk in keys {
            upsert(&mut fresh, jwk);
        }
        let mut set = self.set.write().await;
        *set = fresh;
        debug!(keys = set.len(), "Replaced in-memory key set");
    }

    /// Number of keys held
    pub async fn len(&self) -> usize {
        self.set.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.set.read().await.is_empty()
    }
}

fn upsert(set: &mut Vec<Jwk>, jwk: Jwk) {
    match set.iter_mut().find(|existing| existing.kid == jwk.kid) {
        Some(existing) => *existing = jwk,
        None => set.push(jwk),
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn key_delete(&self, key_id: &str) -> KeyResult<bool> {
        let mut set = self.set.write().await;
        match set.iter().position(|jwk| jwk.kid() == key_id) {
            Some(index) => {
                set.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn key_read(&self, key_id: &str) -> KeyResult<Jwk> {
        let set = self.set.read().await;
        set.iter()
            .find(|jwk| jwk.kid() == key_id)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }

    async fn key_read_all(&self) -> KeyResult<Vec<Jwk>> {
        Ok(self.set.read().await.clone())
    }

    async fn key_write(&self, jwk: Jwk) -> KeyResult<()> {
        let mut set = self.set.write().await;
        upsert(&mut set, jwk);
        Ok(())
    }
}

//! Multi-source JWK Set client
//!
//! [`KeySetClient`] merges one local key store with any number of remote
//! key sets and presents them as a single [`KeyStore`].
//!
//! # Lookup order
//!
//! ```text
//! key_read(kid) → local (unless remote is prioritized)
//!               → each remote, ascending canonical URL
//!               → local (if remote is prioritized)
//!               → miss? wait on refresh rate limiter
//!                       → refresh each remote, re-read from it
//!               → NotFound(kid)
//! ```
//!
//! Not-found answers move the lookup on to the next source. Any other
//! failure ends the lookup, except a failed forced refresh, which is handed
//! to that remote's error handler before moving on.
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


use crate::error::{found, KeyError, KeyResult};
use crate::http::{HttpKeyStore, HttpKeyStoreOptions, RefreshErrorHandler};
use crate::jwk::{Jwk, JwkSet, MarshalOptions, ValidateOptions};
use crate::memory::MemoryKeyStore;
use crate::rate_limiter::RateLimiter;
use crate::store::{KeyStore, RemoteKeyStore};
use async_trait::async_trait;
use jwkset_config::ClientConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

/// Options for building a [`KeySetClient`]
#[derive(Default)]
pub struct KeySetClientOptions {
    /// Keys known from outside any remote resource. An empty in-memory
    /// store is used when absent.
    pub given: Option<Arc<dyn KeyStore>>,
    /// Remote key set URLs. A `None` store is built as an
    /// [`HttpKeyStore`] from the URL using `http_options`.
    pub remotes: BTreeMap<String, Option<Arc<dyn RemoteKeyStore>>>,
    /// Consult remote key sets before the given store
    pub prioritize_remote: bool,
    /// Longest a lookup waits for refresh permission. Zero is unbounded.
    pub rate_limit_wait_max: Duration,
    /// Enables refreshing remotes when an unknown key ID is read
    pub refresh_unknown_kid: Option<RateLimiter>,
    /// Options for remote stores built from bare URLs
    pub http_options: HttpKeyStoreOptions,
}

/// A key store that resolves keys across a local store and remote key sets
pub struct KeySetClient {
    given: Arc<dyn KeyStore>,
    remotes: BTreeMap<String, Arc<dyn RemoteKeyStore>>,
    prioritize_remote: bool,
    rate_limit_wait_max: Duration,
    refresh_unknown_kid: Option<RateLimiter>,
}

/// Canonical form of a remote identifier
fn canonical_url(raw: &str) -> Result<Url, KeyError> {
    Url::parse(raw).map_err(|source| KeyError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

impl KeySetClient {
    /// Create a new client from its options
    ///
    /// Fails if there is neither a given store nor any remote, or if a URL
    /// without a pre-built store does not parse.
    pub async fn new(options: KeySetClientOptions) -> KeyResult<Self> {
        if options.given.is_none() && options.remotes.is_empty() {
            return Err(KeyError::Construction(
                "no given keys or remote URLs".to_string(),
            ));
        }

        let mut remotes: BTreeMap<String, Arc<dyn RemoteKeyStore>> = BTreeMap::new();
        for (raw, store) in options.remotes {
            let (id, store) = match store {
                Some(store) => {
                    let id = match Url::parse(&raw) {
                        Ok(url) => url.to_string(),
                        Err(_) => raw,
                    };
                    (id, store)
                }
                None => {
                    let url = canonical_url(&raw)?;
                    let id = url.to_string();
                    let store = HttpKeyStore::new(url, options.http_options.clone())
                        .await
                        .map_err(|e| {
                            KeyError::wrap(
                                format!("failed to create HTTP client storage for {:?}", id),
                                e,
                            )
                        })?;
                    (id, Arc::new(store) as Arc<dyn RemoteKeyStore>)
                }
            };
            if remotes.contains_key(&id) {
                return Err(KeyError::Construction(format!(
                    "remote URL {:?} configured more than once",
                    id
                )));
            }
            remotes.insert(id, store);
        }

        let given = options
            .given
            .unwrap_or_else(|| Arc::new(MemoryKeyStore::new()));

        info!(
            remotes = remotes.len(),
            prioritize_remote = options.prioritize_remote,
            refresh_unknown_kid = options.refresh_unknown_kid.is_some(),
            "Created JWK Set client"
        );

        Ok(Self {
            given,
            remotes,
            prioritize_remote: options.prioritize_remote,
            rate_limit_wait_max: options.rate_limit_wait_max,
            refresh_unknown_kid: options.refresh_unknown_kid,
        })
    }

    /// Create a client for the given URLs with default behavior:
    ///
    /// 1. Refresh remote key sets every hour.
    /// 2. Prefer keys from remote key sets over the given store.
    /// 3. Refresh remotes when an unknown key ID is read, at most once every
    ///    five minutes, waiting up to a minute for permission.
    /// 4. Log failed refreshes with `tracing`.
    ///
    /// `cancel` ends every background refresh task.
    pub async fn new_default<I, S>(urls: I, cancel: CancellationToken) -> KeyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new_default_with(urls, cancel, |_, _| {}).await
    }

    /// Like [`KeySetClient::new_default`], with `customize` applied to the
    /// options of each remote before it is built
    ///
    /// `customize` receives the canonical URL of the remote.
    ///
    /// ```no_run
    /// # async fn run() -> jwkset::KeyResult<()> {
    /// use jwkset::{CancellationToken, KeySetClient};
    /// use std::time::Duration;
    ///
    /// let client = KeySetClient::new_default_with(
    ///     ["https://issuer.example/.well-known/jwks.json"],
    ///     CancellationToken::new(),
    ///     |_url, options| options.http_timeout = Duration::from_secs(2),
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new_default_with<I, S, F>(
        urls: I,
        cancel: CancellationToken,
        customize: F,
    ) -> KeyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str, &mut HttpKeyStoreOptions),
    {
        let config = ClientConfig::with_urls(urls.into_iter().map(|u| u.as_ref().to_string()));
        Self::from_config_with(&config, cancel, customize).await
    }

    /// Create a client from loaded configuration
    pub async fn from_config(config: &ClientConfig, cancel: CancellationToken) -> KeyResult<Self> {
        Self::from_config_with(config, cancel, |_, _| {}).await
    }

    /// Create a client from loaded configuration, with `customize` applied
    /// to each remote's options
    pub async fn from_config_with<F>(
        config: &ClientConfig,
        cancel: CancellationToken,
        customize: F,
    ) -> KeyResult<Self>
    where
        F: Fn(&str, &mut HttpKeyStoreOptions),
    {
        let client = reqwest::Client::new();
        let mut remotes: BTreeMap<String, Option<Arc<dyn RemoteKeyStore>>> = BTreeMap::new();

        for raw in &config.urls {
            let url = canonical_url(raw)?;
            let id = url.to_string();
            if remotes.contains_key(&id) {
                return Err(KeyError::Construction(format!(
                    "remote URL {:?} configured more than once",
                    id
                )));
            }
            let mut options = HttpKeyStoreOptions {
                client: client.clone(),
                http_timeout: config.http_timeout,
                refresh_interval: Some(config.refresh_interval),
                refresh_error_handler: Some(logging_refresh_handler(id.clone())),
                no_error_return_first_request: true,
                validate: ValidateOptions::default(),
                cancel: cancel.clone(),
            };
            customize(&id, &mut options);
            let store = HttpKeyStore::new(url, options).await.map_err(|e| {
                KeyError::wrap(
                    format!("failed to create HTTP client storage for {:?}", id),
                    e,
                )
            })?;
            let store: Arc<dyn RemoteKeyStore> = Arc::new(store);
            remotes.insert(id, Some(store));
        }

        let refresh_unknown_kid = config
            .refresh_unknown_kid_interval
            .map(|interval| RateLimiter::every(interval, config.refresh_unknown_kid_burst));

        Self::new(KeySetClientOptions {
            given: None,
            remotes,
            prioritize_remote: config.prioritize_remote,
            rate_limit_wait_max: config.rate_limit_wait_max,
            refresh_unknown_kid,
            http_options: HttpKeyStoreOptions::default(),
        })
        .await
    }

    /// Canonical URLs of the remote key sets, in lookup order
    pub fn remote_urls(&self) -> impl Iterator<Item = &str> {
        self.remotes.keys().map(String::as_str)
    }

    async fn read_given(&self, key_id: &str) -> KeyResult<Option<Jwk>> {
        found(self.given.key_read(key_id).await).map_err(|e| {
            KeyError::wrap(
                format!("failed to find JWT key with ID {:?} in given storage", key_id),
                e,
            )
        })
    }

    async fn read_remote(
        &self,
        url: &str,
        store: &dyn RemoteKeyStore,
        key_id: &str,
    ) -> KeyResult<Option<Jwk>> {
        found(store.key_read(key_id).await).map_err(|e| {
            KeyError::wrap(
                format!("failed to find JWT key with ID {:?} in HTTP storage {}", key_id, url),
                e,
            )
        })
    }

    /// Read a key, honouring `cancel` while waiting on the refresh rate
    /// limiter
    pub async fn key_read_with_cancel(
        &self,
        key_id: &str,
        cancel: &CancellationToken,
    ) -> KeyResult<Jwk> {
        if !self.prioritize_remote {
            if let Some(jwk) = self.read_given(key_id).await? {
                return Ok(jwk);
            }
        }

        for (url, store) in &self.remotes {
            if let Some(jwk) = self.read_remote(url, store.as_ref(), key_id).await? {
                return Ok(jwk);
            }
        }

        if self.prioritize_remote {
            if let Some(jwk) = self.read_given(key_id).await? {
                return Ok(jwk);
            }
        }

        if let Some(limiter) = &self.refresh_unknown_kid {
            if let Some(jwk) = self.refresh_and_read(limiter, key_id, cancel).await? {
                return Ok(jwk);
            }
        }

        Err(KeyError::NotFound(key_id.to_string()))
    }

    async fn refresh_and_read(
        &self,
        limiter: &RateLimiter,
        key_id: &str,
        cancel: &CancellationToken,
    ) -> KeyResult<Option<Jwk>> {
        let max_wait = Some(self.rate_limit_wait_max).filter(|max| !max.is_zero());
        limiter.wait(cancel, max_wait).await?;

        debug!(key_id, "Refreshing remote JWK Sets for unknown key ID");
        for (url, store) in &self.remotes {
            if cancel.is_cancelled() {
                return Err(KeyError::Cancelled);
            }
            if let Err(e) = store.refresh().await {
                debug!(url = %url, "Forced JWK Set refresh failed");
                store.report_refresh_error(&e);
                continue;
            }
            if let Some(jwk) = self.read_remote(url, store.as_ref(), key_id).await? {
                return Ok(Some(jwk));
            }
        }
        Ok(None)
    }

    /// Snapshot every source into one in-memory store
    ///
    /// Keys are written in [`KeyStore::key_read_all`] order, so when two
    /// sources share a key ID the later source wins.
    pub async fn combine(&self) -> KeyResult<MemoryKeyStore> {
        let keys = self
            .key_read_all()
            .await
            .map_err(|e| KeyError::wrap("failed to snapshot keys", e))?;

        let combined = MemoryKeyStore::new();
        for jwk in keys {
            combined
                .key_write(jwk)
                .await
                .map_err(|e| KeyError::wrap("failed to write key to memory storage", e))?;
        }
        Ok(combined)
    }

    async fn combined(&self) -> KeyResult<MemoryKeyStore> {
        self.combine()
            .await
            .map_err(|e| KeyError::wrap("failed to combine storage", e))
    }
}

/// Refresh error handler that logs with the remote's URL
pub fn logging_refresh_handler(url: String) -> RefreshErrorHandler {
    Arc::new(move |e: &KeyError| {
        error!(
            url = %url,
            error = %e,
            "Failed to refresh HTTP JWK Set from remote HTTP resource"
        );
    })
}

#[async_trait]
impl KeyStore for KeySetClient {
    async fn key_delete(&self, key_id: &str) -> KeyResult<bool> {
        let deleted = found(self.given.key_delete(key_id).await).map_err(|e| {
            KeyError::wrap(
                format!("failed to delete key with ID {:?} from given storage", key_id),
                e,
            )
        })?;
        if deleted == Some(true) {
            return Ok(true);
        }

        for (url, store) in &self.remotes {
            let deleted = found(store.key_delete(key_id).await).map_err(|e| {
                KeyError::wrap(
                    format!("failed to delete key with ID {:?} from HTTP storage {}", key_id, url),
                    e,
                )
            })?;
            if deleted == Some(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn key_read(&self, key_id: &str) -> KeyResult<Jwk> {
        self.key_read_with_cancel(key_id, &CancellationToken::new())
            .await
    }

    /// Every key from every source, given store first
    ///
    /// Keys are not de-duplicated: a key ID present in several sources
    /// appears once per source.
    async fn key_read_all(&self) -> KeyResult<Vec<Jwk>> {
        let mut keys = self
            .given
            .key_read_all()
            .await
            .map_err(|e| KeyError::wrap("failed to snapshot given keys", e))?;

        for (url, store) in &self.remotes {
            let remote_keys = store.key_read_all().await.map_err(|e| {
                KeyError::wrap(format!("failed to snapshot HTTP keys from {:?}", url), e)
            })?;
            keys.extend(remote_keys);
        }
        Ok(keys)
    }

    async fn key_write(&self, jwk: Jwk) -> KeyResult<()> {
        self.given.key_write(jwk).await
    }

    async fn json(&self) -> KeyResult<Value> {
        self.combined().await?.json().await
    }

    async fn json_public(&self) -> KeyResult<Value> {
        self.combined().await?.json_public().await
    }

    async fn json_private(&self) -> KeyResult<Value> {
        self.combined().await?.json_private().await
    }

    async fn json_with_options(
        &self,
        marshal: MarshalOptions,
        validate: ValidateOptions,
    ) -> KeyResult<Value> {
        self.combined()
            .await?
            .json_with_options(marshal, validate)
            .await
    }

    async fn marshal(&self) -> KeyResult<JwkSet> {
        self.combined().await?.marshal().await
    }

    async fn marshal_with_options(
        &self,
        marshal: MarshalOptions,
        validate: ValidateOptions,
    ) -> KeyResult<JwkSet> {
        self.combined()
            .await?
            .marshal_with_options(marshal, validate)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::KeyType;

    fn ec(kid: &str, x: &str) -> Jwk {
        Jwk {
            crv: Some("P-256".to_string()),
            x: Some(x.to_string()),
            y: Some("x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0".to_string()),
            ..Jwk::new(KeyType::Ec, kid)
        }
    }

    #[tokio::test]
    async fn test_requires_a_source() {
        let err = KeySetClient::new(KeySetClientOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KeyError::Construction(_)));
    }

    #[tokio::test]
    async fn test_malformed_url_names_the_url() {
        let mut remotes = BTreeMap::new();
        remotes.insert("not a url".to_string(), None);
        let err = KeySetClient::new(KeySetClientOptions {
            remotes,
            ..Default::default()
        })
        .await
        .err()
        .unwrap();

        assert!(matches!(err, KeyError::InvalidUrl { .. }));
        assert!(err.to_string().contains("not a url"));
    }

    #[tokio::test]
    async fn test_write_then_read_from_given_store() {
        let client = KeySetClient::new(KeySetClientOptions {
            given: Some(Arc::new(MemoryKeyStore::new())),
            ..Default::default()
        })
        .await
        .unwrap();

        client.key_write(ec("a", "one")).await.unwrap();
        assert_eq!(client.key_read("a").await.unwrap(), ec("a", "one"));
        assert_eq!(client.remote_urls().count(), 0);
    }

    #[tokio::test]
    async fn test_combine_is_last_write_wins() {
        let given: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::with_keys(vec![ec("a", "given")]));
        let client = KeySetClient::new(KeySetClientOptions {
            given: Some(Arc::clone(&given)),
            ..Default::default()
        })
        .await
        .unwrap();

        let combined = client.combine().await.unwrap();
        assert_eq!(combined.len().await, 1);
        assert_eq!(combined.key_read("a").await.unwrap().x.as_deref(), Some("given"));
    }
}

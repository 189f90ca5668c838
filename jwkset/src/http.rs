//! Remote JWK Set storage fetched over HTTP
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
use crate::jwk::{Jwk, JwkSet, ValidateOptions};
use crate::memory::MemoryKeyStore;
use crate::store::{KeyStore, RemoteKeyStore};
use async_trait::async_trait;
use jwkset_config::{DEFAULT_HTTP_TIMEOUT, MAX_DURATION};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Callback invoked when a refresh fails
pub type RefreshErrorHandler = Arc<dyn Fn(&KeyError) + Send + Sync>;

/// Options for an [`HttpKeyStore`]
#[derive(Clone)]
pub struct HttpKeyStoreOptions {
    /// HTTP client used for every request
    pub client: reqwest::Client,
    /// Timeout for a single request
    pub http_timeout: Duration,
    /// Background refresh period, capped at one year. `None` disables
    /// background refresh.
    pub refresh_interval: Option<Duration>,
    /// Called with every failed refresh, background or forced
    pub refresh_error_handler: Option<RefreshErrorHandler>,
    /// Report a failed first request to the handler instead of failing
    /// construction
    pub no_error_return_first_request: bool,
    /// Validation applied to every fetched key
    pub validate: ValidateOptions,
    /// Ends the background refresh task when cancelled
    pub cancel: CancellationToken,
}

impl Default for HttpKeyStoreOptions {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            refresh_interval: None,
            refresh_error_handler: None,
            no_error_return_first_request: false,
            validate: ValidateOptions::default(),
            cancel: CancellationToken::new(),
        }
    }
}

struct Remote {
    url: Url,
    client: reqwest::Client,
    http_timeout: Duration,
    validate: ValidateOptions,
    refresh_error_handler: Option<RefreshErrorHandler>,
    keys: MemoryKeyStore,
}

impl Remote {
    async fn refresh(&self) -> KeyResult<()> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.http_timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(KeyError::UnexpectedStatus {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let set: JwkSet = response.json().await?;
        for jwk in &set.keys {
            jwk.validate(&self.validate).map_err(|e| {
                KeyError::wrap(
                    format!("invalid key with ID {:?} from {}", jwk.kid(), self.url),
                    e,
                )
            })?;
        }

        let count = set.keys.len();
        self.keys.replace_all(set.keys).await;
        info!(url = %self.url, keys = count, "Refreshed JWK Set");
        Ok(())
    }

    fn report(&self, error: &KeyError) {
        if let Some(handler) = &self.refresh_error_handler {
            handler(error);
        }
    }
}

/// A JWK Set fetched from a remote HTTP resource
///
/// Keys are held in memory and replaced wholesale on every successful
/// refresh. Local writes and deletes only last until the next refresh.
pub struct HttpKeyStore {
    remote: Arc<Remote>,
    shutdown: CancellationToken,
}

impl HttpKeyStore {
    /// Fetch the key set at `url` and, if configured, start refreshing it
    /// in the background
    pub async fn new(url: Url, options: HttpKeyStoreOptions) -> KeyResult<Self> {
        let remote = Arc::new(Remote {
            url,
            client: options.client,
            http_timeout: options.http_timeout,
            validate: options.validate,
            refresh_error_handler: options.refresh_error_handler,
            keys: MemoryKeyStore::new(),
        });

        if let Err(e) = remote.refresh().await {
            if !options.no_error_return_first_request {
                return Err(KeyError::wrap(
                    format!("failed to perform first HTTP request for JWK Set from {}", remote.url),
                    e,
                ));
            }
            remote.report(&e);
        }

        let shutdown = options.cancel.child_token();
        if let Some(interval) = options.refresh_interval.filter(|i| !i.is_zero()) {
            spawn_refresh(Arc::clone(&remote), interval, shutdown.clone());
        }

        Ok(Self { remote, shutdown })
    }

    /// The endpoint this store fetches from
    pub fn url(&self) -> &Url {
        &self.remote.url
    }
}

fn spawn_refresh(remote: Arc<Remote>, interval: Duration, shutdown: CancellationToken) {
    let interval = interval.min(MAX_DURATION);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(url = %remote.url, "Stopping JWK Set background refresh");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = remote.refresh().await {
                        remote.report(&e);
                    }
                }
            }
        }
    });
}

impl Drop for HttpKeyStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl KeyStore for HttpKeyStore {
    async fn key_delete(&self, key_id: &str) -> KeyResult<bool> {
        self.remote.keys.key_delete(key_id).await
    }

    async fn key_read(&self, key_id: &str) -> KeyResult<Jwk> {
        self.remote.keys.key_read(key_id).await
    }

    async fn key_read_all(&self) -> KeyResult<Vec<Jwk>> {
        self.remote.keys.key_read_all().await
    }

    async fn key_write(&self, jwk: Jwk) -> KeyResult<()> {
        self.remote.keys.key_write(jwk).await
    }
}

#[async_trait]
impl RemoteKeyStore for HttpKeyStore {
    async fn refresh(&self) -> KeyResult<()> {
        self.remote.refresh().await
    }

    fn report_refresh_error(&self, error: &KeyError) {
        self.remote.report(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key_set(kids: &[&str]) -> serde_json::Value {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({"kty": "OKP", "kid": kid, "crv": "Ed25519", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}))
            .collect();
        json!({ "keys": keys })
    }

    fn jwks_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/jwks.json", server.uri())).unwrap()
    }

    fn counting_handler() -> (RefreshErrorHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: RefreshErrorHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn test_fetches_keys_on_construction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["a", "b"])))
            .mount(&server)
            .await;

        let store = HttpKeyStore::new(jwks_url(&server), HttpKeyStoreOptions::default())
            .await
            .unwrap();

        assert_eq!(store.key_read_all().await.unwrap().len(), 2);
        assert_eq!(store.key_read("b").await.unwrap().kid(), "b");
    }

    #[tokio::test]
    async fn test_first_request_error_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = HttpKeyStore::new(jwks_url(&server), HttpKeyStoreOptions::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("unexpected HTTP status 500"));
    }

    #[tokio::test]
    async fn test_first_request_error_can_be_suppressed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (handler, count) = counting_handler();
        let options = HttpKeyStoreOptions {
            refresh_error_handler: Some(handler),
            no_error_return_first_request: true,
            ..Default::default()
        };
        let store = HttpKeyStore::new(jwks_url(&server), options).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(store.key_read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_key_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["old"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["new"])))
            .mount(&server)
            .await;

        let store = HttpKeyStore::new(jwks_url(&server), HttpKeyStoreOptions::default())
            .await
            .unwrap();
        assert!(store.key_read("old").await.is_ok());

        store.refresh().await.unwrap();
        assert!(store.key_read("old").await.unwrap_err().is_not_found());
        assert!(store.key_read("new").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_key_fails_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"keys": [{"kty": "RSA", "kid": "broken"}]})),
            )
            .mount(&server)
            .await;

        let err = HttpKeyStore::new(jwks_url(&server), HttpKeyStoreOptions::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_background_refresh_picks_up_new_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["a"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["a", "b"])))
            .mount(&server)
            .await;

        let options = HttpKeyStoreOptions {
            refresh_interval: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let store = HttpKeyStore::new(jwks_url(&server), options).await.unwrap();
        assert!(store.key_read("b").await.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.key_read("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_refresh_interval_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["a"])))
            .expect(1)
            .mount(&server)
            .await;

        let options = HttpKeyStoreOptions {
            refresh_interval: Some(Duration::MAX),
            ..Default::default()
        };
        let store = HttpKeyStore::new(jwks_url(&server), options).await.unwrap();

        // Give the background task a chance to run; it must neither panic
        // nor fetch again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.key_read("a").await.is_ok());
        assert_eq!(store.url().path(), "/jwks.json");
    }
}

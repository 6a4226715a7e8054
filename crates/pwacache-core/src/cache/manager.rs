use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::PrecacheError;
use crate::models::{CacheName, LifecycleCommand, Request, Response};
use crate::net::Network;

use super::{CacheStorage, StoredResponse};

/// What happened during installation. Never an error: installation always
/// completes, even when manifest population did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Every manifest resource was stored.
    Precached(usize),
    /// Manifest population failed and nothing from it was stored.
    PrecacheFailed,
}

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Synthesized because the network could not be reached.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: ResponseSource,
}

/// The cache-aside worker for one deployment version.
///
/// Reads go to the current store first and fall back to the network;
/// eligible network responses are written back in the background.
/// Every failure is logged and absorbed: caching never prevents a
/// response from being returned.
pub struct CacheManager {
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    /// Background cache writes still in flight. Each `settle` swaps in a
    /// fresh tracker and waits on the one it took out.
    pending: Mutex<TaskTracker>,
    skip_waiting: AtomicBool,
}

impl CacheManager {
    pub fn new(config: WorkerConfig, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            storage,
            network,
            pending: Mutex::new(TaskTracker::new()),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn cache_name(&self) -> &CacheName {
        &self.config.cache_name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    /// Whether a skip-waiting message has been received.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    // ===== Install =====

    /// Open the current store and populate it from the install manifest.
    pub async fn on_install(&self) -> InstallOutcome {
        let name = self.cache_name().as_str();
        info!(cache = name, "Service worker installing");

        if let Err(e) = self.storage.open(name).await {
            error!(cache = name, error = %e, "Cache installation failed");
            return InstallOutcome::PrecacheFailed;
        }
        debug!(cache = name, "Opened cache");

        match self.precache().await {
            Ok(count) => {
                info!(cache = name, resources = count, "Precached install manifest");
                InstallOutcome::Precached(count)
            }
            Err(PrecacheError::Storage(e)) => {
                error!(cache = name, error = %e, "Cache installation failed: storage rejected manifest");
                InstallOutcome::PrecacheFailed
            }
            Err(e) => {
                error!(cache = name, error = %e, "Cache installation failed: manifest resource unavailable");
                InstallOutcome::PrecacheFailed
            }
        }
    }

    /// Fetch every manifest resource, then store them as one batch.
    /// Any failure aborts the batch.
    async fn precache(&self) -> Result<usize, PrecacheError> {
        let fetches = self.config.precache.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|source| {
                    debug!(url = %url, offline = source.is_offline(), "Manifest fetch failed");
                    PrecacheError::Unreachable {
                        url: url.to_string(),
                        source,
                    }
                })?;
            if !response.is_ok() {
                return Err(PrecacheError::BadStatus {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            Ok((request.key(), StoredResponse::for_request(&request, response)))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.storage.put_all(self.cache_name().as_str(), entries).await?;
        Ok(count)
    }

    // ===== Activate =====

    /// Delete every store not named after the current version.
    ///
    /// Deletions run concurrently and are all awaited before returning.
    /// Returns the names of the deleted stores.
    pub async fn on_activate(&self) -> Vec<String> {
        let current = self.cache_name();
        info!(cache = %current, "Service worker activating");

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list caches during activation");
                return Vec::new();
            }
        };

        let deletions = names
            .into_iter()
            .filter(|name| current != name)
            .map(|name| async move {
                info!(cache = %name, "Deleting old cache");
                match self.storage.delete(&name).await {
                    Ok(true) => Some(name),
                    Ok(false) => None,
                    Err(e) => {
                        warn!(cache = %name, error = %e, "Failed to delete old cache");
                        None
                    }
                }
            });

        join_all(deletions).await.into_iter().flatten().collect()
    }

    // ===== Fetch =====

    /// Serve a request cache-first.
    ///
    /// - hit: the stored response, no network call
    /// - miss: the live response; a same-origin 200 is also written to the
    ///   current store in the background
    /// - network failure: a 408 plain-text fallback
    pub async fn on_fetch(&self, request: &Request) -> FetchOutcome {
        if let Some(stored) = self.lookup(request).await {
            debug!(url = %request.url, "Serving from cache");
            return FetchOutcome {
                response: stored.into_response(),
                source: ResponseSource::Cache,
            };
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.cache_in_background(request, response.clone());
                } else {
                    debug!(url = %request.url, status = response.status, kind = ?response.response_type, "Response not cacheable");
                }
                FetchOutcome {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(e) => {
                warn!(url = %request.url, offline = e.is_offline(), error = %e, "Network fetch failed, serving fallback");
                FetchOutcome {
                    response: Response::network_error(),
                    source: ResponseSource::Fallback,
                }
            }
        }
    }

    /// Look the request up in the current store. Lookup errors count as a miss,
    /// as does an entry whose `Vary` headers differ from the request's.
    async fn lookup(&self, request: &Request) -> Option<StoredResponse> {
        // Only GET requests ever match
        if !request.is_get() {
            return None;
        }
        let name = self.cache_name().as_str();
        match self.storage.lookup(name, &request.key()).await {
            Ok(Some(stored)) if stored.matches(request) => Some(stored),
            Ok(Some(_)) => {
                debug!(cache = name, url = %request.url, "Cached entry varies from request");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(cache = name, url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    fn cache_in_background(&self, request: &Request, response: Response) {
        let storage = Arc::clone(&self.storage);
        let name = self.cache_name().clone();
        let key = request.key();
        let stored = StoredResponse::for_request(request, response);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(async move {
                if let Err(e) = storage.put(name.as_str(), key, stored).await {
                    debug!(cache = %name, error = %e, "Failed to cache response");
                }
            });
    }

    /// Wait for every background cache write started before this call.
    ///
    /// Writes started while waiting go to a fresh tracker, so concurrent
    /// callers never hold each other up.
    pub async fn settle(&self) {
        let tracker = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        tracker.close();
        tracker.wait().await;
    }

    // ===== Message =====

    /// Handle a message posted to the worker. A skip-waiting request is
    /// remembered and handed back for the registration to act on.
    pub fn on_message(&self, message: &Value) -> Option<LifecycleCommand> {
        let command = LifecycleCommand::from_message(message);
        match command {
            Some(LifecycleCommand::SkipWaiting) => {
                debug!(cache = %self.cache_name(), "Skip waiting requested");
                self.skip_waiting.store(true, Ordering::SeqCst);
            }
            _ => debug!("Ignoring message"),
        }
        command
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::models::ResponseType;
    use crate::net::NetworkError;
    use async_trait::async_trait;
    use reqwest::header::{self, HeaderValue};
    use reqwest::{Method, Url};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// A mock network serving canned responses and recording every call.
    #[derive(Default)]
    struct MockNetwork {
        routes: Mutex<HashMap<String, Response>>,
        calls: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl MockNetwork {
        fn route(&self, path: &str, response: Response) {
            self.routes.lock().unwrap().insert(url(path).to_string(), response);
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Network for MockNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            self.calls.lock().unwrap().push(request.url.to_string());
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Offline("mock offline".to_string()));
            }
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| Response::new(404, "not found")))
        }
    }

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000")
            .and_then(|base| base.join(path))
            .expect("test URL should parse")
    }

    fn get(path: &str) -> Request {
        Request::get(url(path))
    }

    fn manager(name: &str, precache: &[&str]) -> (CacheManager, Arc<MemoryStorage>, Arc<MockNetwork>) {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(MockNetwork::default());
        let config = WorkerConfig::new(CacheName::from(name))
            .with_precache(precache.iter().map(|p| url(p)).collect());
        let manager = CacheManager::new(config, storage.clone(), network.clone());
        (manager, storage, network)
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let (manager, storage, network) = manager("app-v1", &["/", "/app.js"]);
        network.route("/", Response::new(200, "index"));
        network.route("/app.js", Response::new(200, "js"));

        assert_eq!(manager.on_install().await, InstallOutcome::Precached(2));
        assert_eq!(storage.entries("app-v1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_install_failure_stores_nothing_but_completes() {
        let (manager, storage, network) = manager("app-v1", &["/", "/missing.png"]);
        network.route("/", Response::new(200, "index"));

        assert_eq!(manager.on_install().await, InstallOutcome::PrecacheFailed);
        // Store was still created, but holds nothing from the failed batch
        assert!(storage.has("app-v1").await.unwrap());
        assert!(storage.entries("app-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_offline() {
        let (manager, storage, network) = manager("app-v1", &["/"]);
        network.go_offline();
        assert_eq!(manager.on_install().await, InstallOutcome::PrecacheFailed);
        assert!(storage.has("app-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_quota_exceeded() {
        let storage = Arc::new(MemoryStorage::with_quota(3));
        let network = Arc::new(MockNetwork::default());
        network.route("/", Response::new(200, "too large"));
        let config = WorkerConfig::new(CacheName::from("app-v1")).with_precache(vec![url("/")]);
        let manager = CacheManager::new(config, storage.clone(), network);

        assert_eq!(manager.on_install().await, InstallOutcome::PrecacheFailed);
        assert!(storage.entries("app-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_precached_entry_serves_requests_with_headers() {
        let (manager, _storage, network) = manager("app-v1", &["/"]);
        network.route("/", Response::new(200, "shell"));
        assert_eq!(manager.on_install().await, InstallOutcome::Precached(1));
        network.go_offline();

        let request = get("/").with_header(header::ACCEPT, HeaderValue::from_static("text/html"));
        let outcome = manager.on_fetch(&request).await;
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.text(), "shell");
    }

    #[tokio::test]
    async fn test_vary_header_limits_hits() {
        let (manager, _storage, network) = manager("app-v1", &[]);
        network.route("/data", Response::new(200, "{}").with_header("Vary", "Accept"));
        let json = get("/data").with_header(header::ACCEPT, HeaderValue::from_static("application/json"));
        let html = get("/data").with_header(header::ACCEPT, HeaderValue::from_static("text/html"));

        manager.on_fetch(&json).await;
        manager.settle().await;
        assert_eq!(manager.on_fetch(&json).await.source, ResponseSource::Cache);
        assert_eq!(manager.on_fetch(&html).await.source, ResponseSource::Network);
        assert_eq!(network.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_hit_skips_network() {
        let (manager, storage, network) = manager("app-v1", &[]);
        storage
            .put("app-v1", get("/a.png").key(), StoredResponse::new(Response::new(200, "cached")))
            .await
            .unwrap();

        let outcome = manager.on_fetch(&get("/a.png")).await;
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.text(), "cached");
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_miss_populates_cache() {
        let (manager, _storage, network) = manager("app-v1", &[]);
        network.route("/a.png", Response::new(200, "fresh"));

        let first = manager.on_fetch(&get("/a.png")).await;
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(first.response.text(), "fresh");
        manager.settle().await;

        let second = manager.on_fetch(&get("/a.png")).await;
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.text(), "fresh");
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_responses_not_cached() {
        let (manager, storage, network) = manager("app-v1", &[]);
        network.route("/missing", Response::new(404, "nope"));
        network.route("/created", Response::new(201, "made"));
        network.route("/cdn.js", Response::new(200, "lib").with_type(ResponseType::Cors));
        network.route("/opaque", Response::new(0, "").with_type(ResponseType::Opaque));

        for path in ["/missing", "/created", "/cdn.js", "/opaque"] {
            let outcome = manager.on_fetch(&get(path)).await;
            assert_eq!(outcome.source, ResponseSource::Network);
        }
        manager.settle().await;

        assert!(storage.entries("app-v1").await.unwrap().is_empty());
        // Returned unmodified
        let outcome = manager.on_fetch(&get("/cdn.js")).await;
        assert_eq!(outcome.response.response_type, ResponseType::Cors);
        assert_eq!(outcome.response.text(), "lib");
    }

    #[tokio::test]
    async fn test_non_get_goes_to_network_and_is_not_cached() {
        let (manager, storage, network) = manager("app-v1", &[]);
        network.route("/api", Response::new(200, "posted"));
        let post = Request::new(Method::POST, url("/api"));

        assert_eq!(manager.on_fetch(&post).await.source, ResponseSource::Network);
        manager.settle().await;
        assert_eq!(manager.on_fetch(&post).await.source, ResponseSource::Network);
        assert_eq!(network.calls(), 2);
        assert!(storage.entries("app-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_settles_both_return() {
        let (manager, storage, network) = manager("app-v1", &[]);
        network.route("/a.png", Response::new(200, "a"));
        network.route("/b.png", Response::new(200, "b"));
        manager.on_fetch(&get("/a.png")).await;

        let overlapping = async {
            tokio::join!(manager.settle(), async {
                manager.on_fetch(&get("/b.png")).await;
                manager.settle().await;
            })
        };
        tokio::time::timeout(Duration::from_secs(5), overlapping)
            .await
            .expect("settles should not wait on each other");
        assert_eq!(storage.entries("app-v1").await.unwrap().len(), 2);

        // A later settle with nothing pending returns at once
        tokio::time::timeout(Duration::from_secs(5), manager.settle())
            .await
            .expect("idle settle should return");
    }

    #[tokio::test]
    async fn test_offline_fallback() {
        let (manager, _storage, network) = manager("app-v1", &[]);
        network.go_offline();

        let outcome = manager.on_fetch(&get("/page")).await;
        assert_eq!(outcome.source, ResponseSource::Fallback);
        assert_eq!(outcome.response.status, 408);
        assert_eq!(outcome.response.header("Content-Type"), Some("text/plain"));
        assert_eq!(outcome.response.text(), "Network error happened");
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_affect_response() {
        let storage = Arc::new(MemoryStorage::with_quota(1));
        let network = Arc::new(MockNetwork::default());
        network.route("/big", Response::new(200, "larger than quota"));
        let manager = CacheManager::new(WorkerConfig::new(CacheName::from("app-v1")), storage.clone(), network);

        let outcome = manager.on_fetch(&get("/big")).await;
        manager.settle().await;
        assert_eq!(outcome.response.text(), "larger than quota");
        assert!(storage.entries("app-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_deletes_other_stores() {
        let (manager, storage, _network) = manager("app-v2", &[]);
        storage.open("app-v1").await.unwrap();
        storage.open("app-v0").await.unwrap();
        storage.open("app-v2").await.unwrap();

        let mut deleted = manager.on_activate().await;
        deleted.sort();
        assert_eq!(deleted, vec!["app-v0", "app-v1"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["app-v2"]);
    }

    #[tokio::test]
    async fn test_message_skip_waiting() {
        let (manager, _storage, _network) = manager("app-v1", &[]);
        assert_eq!(manager.on_message(&json!({"type": "PING"})), None);
        assert!(!manager.skip_waiting_requested());

        assert_eq!(
            manager.on_message(&json!({"type": "SKIP_WAITING"})),
            Some(LifecycleCommand::SkipWaiting)
        );
        assert!(manager.skip_waiting_requested());
    }
}

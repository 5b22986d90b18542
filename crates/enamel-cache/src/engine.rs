//! Cache policy engine
//!
//! Intercepts requests, routes them to a bucket and answers them with the
//! bucket's strategy. Every request that reaches a strategy is answered:
//! network failures fall back to the cache and then to the offline page.

use crate::config::{BucketConfig, BucketKind, EngineConfig, Strategy};
use crate::error::{CacheError, Result};
use crate::network::{HttpConfig, HttpNetwork, Network};
use crate::offline::offline_page;
use crate::request::{now_millis, Destination, Request, Response};
use crate::route::{Route, Router};
use crate::store::{CacheStorage, CacheStore};
use futures::future::join_all;
use reqwest::Method;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not yet activated; requests pass through
    Installing,
    Idle,
    /// At least one request is being answered
    HandlingRequest,
}

/// What to do with an intercepted request
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Let the platform handle the request untouched
    Passthrough,
    /// Answer with this response
    Respond(Response),
}

impl FetchOutcome {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond(response) => Some(response),
        }
    }
}

/// Result of precaching during install
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Cache keys stored
    pub cached: Vec<String>,
    /// Paths that could not be stored, with the reason
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    /// Whether every precache path was stored
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Requests answered by a strategy
    pub requests: u64,
    /// Requests left to the platform
    pub passthrough: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_fetches: u64,
    /// Fetches that failed in transport
    pub network_failures: u64,
    /// Expired or tolerably stale entries served because the network failed
    pub stale_served: u64,
    pub offline_fallbacks: u64,
    pub evictions: u64,
    /// Cache writes that failed; the response was still served
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    requests: AtomicU64,
    passthrough: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    stale_served: AtomicU64,
    offline_fallbacks: AtomicU64,
    evictions: AtomicU64,
    write_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Marks the engine busy for the lifetime of a request
struct Handling<'a>(&'a AtomicUsize);

impl<'a> Handling<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Handling<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Routes intercepted requests through versioned cache buckets
pub struct CachePolicyEngine {
    config: EngineConfig,
    router: Router,
    /// Cache key of the site root, served to offline navigations
    root_key: String,
    storage: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    activated: AtomicBool,
    handling: AtomicUsize,
    refreshes: Mutex<JoinSet<()>>,
    stats: Arc<StatsInner>,
}

impl CachePolicyEngine {
    /// Create an engine over a storage and a network
    pub fn new(
        config: EngineConfig,
        storage: Arc<CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self> {
        config.validate()?;
        let root_key = config.origin_url()?.join("/")?.to_string();
        let router = Router::new(&config);

        Ok(Self {
            config,
            router,
            root_key,
            storage,
            network,
            activated: AtomicBool::new(false),
            handling: AtomicUsize::new(0),
            refreshes: Mutex::new(JoinSet::new()),
            stats: Arc::new(StatsInner::default()),
        })
    }

    /// Create an engine that fetches over HTTP
    pub fn with_http(config: EngineConfig, storage: Arc<CacheStorage>) -> Result<Self> {
        let network = HttpNetwork::new(HttpConfig::from(&config))?;
        Self::new(config, storage, Arc::new(network))
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        if !self.activated.load(Ordering::Acquire) {
            EngineState::Installing
        } else if self.handling.load(Ordering::Acquire) > 0 {
            EngineState::HandlingRequest
        } else {
            EngineState::Idle
        }
    }

    /// Fetch and store every precache path in the critical bucket
    ///
    /// Best effort: a path that fails is reported and the rest are still stored.
    pub async fn install(&self) -> InstallReport {
        info!("Installing cache {}", self.config.cache_name());

        let max_entries = self
            .config
            .bucket(BucketKind::Critical)
            .map_or(usize::MAX, |b| b.max_entries);
        let store = self.bucket_store(BucketKind::Critical);

        let results = join_all(self.config.precache.iter().map(|path| {
            let store = store.clone();
            async move {
                let url = self.origin_join(path)?;
                let request = Request::get(url);
                let response = fetch_and_store(
                    self.network.as_ref(),
                    &store,
                    &self.stats,
                    &request,
                    max_entries,
                )
                .await?;
                if !response.is_ok() {
                    return Err(CacheError::Http {
                        status: response.status.as_u16(),
                        message: format!("precache of {} not stored", path),
                    });
                }
                Ok::<_, CacheError>(request.cache_key())
            }
        }))
        .await;

        let mut report = InstallReport::default();
        for (path, result) in self.config.precache.iter().zip(results) {
            match result {
                Ok(key) => report.cached.push(key),
                Err(e) => {
                    warn!(path = %path, "Precache failed: {}", e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        self.persist().await;
        info!(
            "Precached {}/{} resources",
            report.cached.len(),
            self.config.precache.len()
        );
        report
    }

    /// Delete this cache's buckets of other versions and start handling requests
    ///
    /// Returns the deleted bucket names.
    pub async fn activate(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in self.storage.names() {
            if !self.config.is_outdated(&name) {
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!("Deleting old cache: {}", name);
                    deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(bucket = %name, "Failed to delete old cache: {}", e),
            }
        }

        self.activated.store(true, Ordering::Release);
        self.persist().await;
        info!("Cache {} active", self.config.cache_name());
        deleted
    }

    /// Decide how an intercepted request is answered
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET || !request.is_http() {
            trace!("Passing through {} {}", request.method, request.url);
            bump(&self.stats.passthrough);
            return FetchOutcome::Passthrough;
        }
        if !self.activated.load(Ordering::Acquire) {
            bump(&self.stats.passthrough);
            return FetchOutcome::Passthrough;
        }

        bump(&self.stats.requests);
        let _handling = Handling::enter(&self.handling);
        FetchOutcome::Respond(self.respond(request).await)
    }

    /// Answer a request with its route's strategy, never failing
    pub async fn respond(&self, request: &Request) -> Response {
        match self.try_respond(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_network() {
                    warn!(url = %request.url, "Request handling failed: {}", e);
                } else {
                    error!(url = %request.url, "Request handling failed: {}", e);
                }
                self.offline_fallback(request).await
            }
        }
    }

    async fn try_respond(&self, request: &Request) -> Result<Response> {
        let route = self.route(request);
        let bucket = self.config.bucket(route.bucket).ok_or_else(|| {
            CacheError::Configuration(format!("no policy for bucket '{}'", route.bucket.suffix()))
        })?;
        let store = self.bucket_store(route.bucket);
        debug!(
            url = %request.url,
            class = ?route.class,
            strategy = ?route.strategy,
            "Routing request"
        );

        match route.strategy {
            Strategy::CacheFirst => self.cache_first(request, &store, bucket).await,
            Strategy::NetworkFirst => self.network_first(request, &store, bucket).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, &store, bucket).await
            }
        }
    }

    async fn cache_first(
        &self,
        request: &Request,
        store: &Arc<CacheStore>,
        bucket: &BucketConfig,
    ) -> Result<Response> {
        let cached = store.lookup(&request.cache_key()).await;
        if let Some(hit) = &cached {
            if hit.is_within(bucket.max_age, now_millis()) {
                bump(&self.stats.cache_hits);
                return Ok(hit.clone());
            }
        }
        bump(&self.stats.cache_misses);

        match fetch_and_store(
            self.network.as_ref(),
            store,
            &self.stats,
            request,
            bucket.max_entries,
        )
        .await
        {
            Ok(response) => Ok(response),
            Err(e) => match cached {
                Some(stale) => {
                    warn!(url = %request.url, "Network failed, serving expired entry: {}", e);
                    bump(&self.stats.stale_served);
                    Ok(stale)
                }
                None => {
                    warn!(url = %request.url, "Network failed with nothing cached: {}", e);
                    Ok(self.offline_fallback(request).await)
                }
            },
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        store: &Arc<CacheStore>,
        bucket: &BucketConfig,
    ) -> Result<Response> {
        let error = match fetch_and_store(
            self.network.as_ref(),
            store,
            &self.stats,
            request,
            bucket.max_entries,
        )
        .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let window = bucket
            .max_age
            .checked_mul(self.config.offline_tolerance)
            .unwrap_or(std::time::Duration::MAX);
        match store.lookup(&request.cache_key()).await {
            Some(cached) if cached.is_within(window, now_millis()) => {
                debug!(url = %request.url, "Network failed, serving cached entry: {}", error);
                bump(&self.stats.stale_served);
                Ok(cached)
            }
            _ => {
                warn!(url = %request.url, "Network failed, no usable cache: {}", error);
                Ok(self.offline_fallback(request).await)
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        store: &Arc<CacheStore>,
        bucket: &BucketConfig,
    ) -> Result<Response> {
        match store.lookup(&request.cache_key()).await {
            Some(cached) => {
                bump(&self.stats.cache_hits);
                self.spawn_refresh(request.clone(), store.clone(), bucket.max_entries);
                Ok(cached)
            }
            None => {
                bump(&self.stats.cache_misses);
                match fetch_and_store(
                    self.network.as_ref(),
                    store,
                    &self.stats,
                    request,
                    bucket.max_entries,
                )
                .await
                {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        warn!(url = %request.url, "Network failed with nothing cached: {}", e);
                        Ok(self.offline_fallback(request).await)
                    }
                }
            }
        }
    }

    /// Refresh an entry in the background; failures are only logged
    fn spawn_refresh(&self, request: Request, store: Arc<CacheStore>, max_entries: usize) {
        let network = self.network.clone();
        let stats = self.stats.clone();
        let task = async move {
            if let Err(e) =
                fetch_and_store(network.as_ref(), &store, &stats, &request, max_entries).await
            {
                debug!(url = %request.url, "Background refresh failed: {}", e);
            }
        };

        let mut refreshes = self
            .refreshes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while refreshes.try_join_next().is_some() {}
        refreshes.spawn(task);
    }

    /// Wait for outstanding background refreshes
    pub async fn settle(&self) {
        loop {
            let mut pending = {
                let mut refreshes = self
                    .refreshes
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *refreshes)
            };
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    error!("Background refresh task failed: {}", e);
                }
            }
        }
    }

    /// Response used when neither network nor cache can answer
    ///
    /// Navigations get the cached site root if there is one.
    pub async fn offline_fallback(&self, request: &Request) -> Response {
        bump(&self.stats.offline_fallbacks);
        if request.destination == Destination::Document {
            let store = self.bucket_store(BucketKind::Critical);
            if let Some(root) = store.lookup(&self.root_key).await {
                return root;
            }
        }
        offline_page()
    }

    /// Route a request would take
    pub fn route(&self, request: &Request) -> Route {
        self.router.route(request.path())
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let s = &self.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStats {
            requests: load(&s.requests),
            passthrough: load(&s.passthrough),
            cache_hits: load(&s.cache_hits),
            cache_misses: load(&s.cache_misses),
            network_fetches: load(&s.network_fetches),
            network_failures: load(&s.network_failures),
            stale_served: load(&s.stale_served),
            offline_fallbacks: load(&s.offline_fallbacks),
            evictions: load(&s.evictions),
            write_failures: load(&s.write_failures),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Bucket of the current version
    pub fn bucket_store(&self, kind: BucketKind) -> Arc<CacheStore> {
        self.storage.open_store(&self.config.bucket_name(kind))
    }

    fn origin_join(&self, path: &str) -> Result<url::Url> {
        Ok(self.config.origin_url()?.join(path)?)
    }

    async fn persist(&self) {
        if let Err(e) = self.storage.sync().await {
            warn!("Failed to persist cache storage: {}", e);
        }
    }
}

/// Fetch from the network and store 2xx responses
///
/// Write failures are counted and logged; the response is returned regardless.
/// Only transport and HTTP errors count as network failures.
async fn fetch_and_store(
    network: &dyn Network,
    store: &CacheStore,
    stats: &StatsInner,
    request: &Request,
    max_entries: usize,
) -> Result<Response> {
    bump(&stats.network_fetches);
    let response = network
        .fetch(request)
        .await
        .inspect_err(|e| {
            if e.is_network() {
                bump(&stats.network_failures);
            } else {
                error!(url = %request.url, "Network backend error: {}", e);
            }
        })?;

    if response.is_ok() {
        let stamped = response.stamped(now_millis());
        match store
            .put_bounded(&request.cache_key(), stamped, max_entries)
            .await
        {
            Ok(evicted) => {
                stats
                    .evictions
                    .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            }
            Err(e) if e.is_write() => {
                warn!(bucket = %store.name(), url = %request.url, "Cache write failed: {}", e);
                bump(&stats.write_failures);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;

    struct Unreachable;

    #[async_trait]
    impl Network for Unreachable {
        async fn fetch(&self, _request: &Request) -> Result<Response> {
            Err(CacheError::Connection("offline".into()))
        }
    }

    fn engine() -> CachePolicyEngine {
        CachePolicyEngine::new(
            EngineConfig::default().with_origin("https://clinic.example/"),
            Arc::new(CacheStorage::in_memory()),
            Arc::new(Unreachable),
        )
        .unwrap()
    }

    fn url(path: &str) -> Url {
        Url::parse("https://clinic.example/").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_before_activation() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Installing);
        let outcome = engine.handle_fetch(&Request::get(url("/"))).await;
        assert!(outcome.is_passthrough());

        engine.activate().await;
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_passthrough_non_get_and_foreign_scheme() {
        let engine = engine();
        engine.activate().await;

        let post = Request::new(Method::POST, url("/api/contact"));
        assert!(engine.handle_fetch(&post).await.is_passthrough());

        let ext = Request::get(Url::parse("chrome-extension://abcdef/inject.js").unwrap());
        assert!(engine.handle_fetch(&ext).await.is_passthrough());

        let stats = engine.stats();
        assert_eq!(stats.passthrough, 2);
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.network_fetches, 0);
    }

    #[tokio::test]
    async fn test_install_reports_failures() {
        let engine = engine();
        let report = engine.install().await;
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 7);
        assert!(report.cached.is_empty());
        assert!(engine.bucket_store(BucketKind::Critical).is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_navigation_without_cached_root() {
        let engine = engine();
        engine.activate().await;

        let response = engine
            .handle_fetch(&Request::navigate(url("/en/services")))
            .await
            .into_response()
            .unwrap();
        assert!(response.text().contains(crate::offline::OFFLINE_HEADING));
        assert_eq!(engine.stats().offline_fallbacks, 1);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    struct Misconfigured;

    #[async_trait]
    impl Network for Misconfigured {
        async fn fetch(&self, _request: &Request) -> Result<Response> {
            Err(CacheError::InvalidUrl("relative URL without a base".into()))
        }
    }

    #[tokio::test]
    async fn test_backend_error_is_not_a_network_failure() {
        let engine = CachePolicyEngine::new(
            EngineConfig::default().with_origin("https://clinic.example/"),
            Arc::new(CacheStorage::in_memory()),
            Arc::new(Misconfigured),
        )
        .unwrap();
        engine.activate().await;

        let response = engine
            .handle_fetch(&Request::get(url("/api/services")))
            .await
            .into_response()
            .unwrap();
        assert!(response.text().contains(crate::offline::OFFLINE_HEADING));

        let stats = engine.stats();
        assert_eq!(stats.network_fetches, 1);
        assert_eq!(stats.network_failures, 0);
        assert_eq!(stats.offline_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_unreachable_counts_network_failure() {
        let engine = engine();
        engine.activate().await;
        engine.handle_fetch(&Request::get(url("/js/app.js"))).await;
        assert_eq!(engine.stats().network_failures, 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = CachePolicyEngine::new(
            EngineConfig::default().with_origin("::"),
            Arc::new(CacheStorage::in_memory()),
            Arc::new(Unreachable),
        );
        assert!(result.is_err());
    }
}

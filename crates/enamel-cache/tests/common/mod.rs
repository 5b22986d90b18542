//! Shared fixtures for engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use enamel_cache::{
    CacheError, CachePolicyEngine, CacheStorage, EngineConfig, Network, Request, Response, Result,
};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const ORIGIN: &str = "https://clinic.example/";

/// Network answering from a fixed table keyed by path
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    latency: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn serve(&self, path: &str, response: Response) {
        self.routes.lock().unwrap().insert(path.to_string(), response);
    }

    pub fn serve_text(&self, path: &str, body: &str) {
        self.serve(path, Response::ok(body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Paths requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.lock().unwrap().push(request.url.path().to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("network unreachable".into()));
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "not found")))
    }
}

pub fn config() -> EngineConfig {
    EngineConfig::default().with_origin(ORIGIN)
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Activated engine over in-memory storage
pub async fn engine(config: EngineConfig, network: Arc<ScriptedNetwork>) -> CachePolicyEngine {
    let engine =
        CachePolicyEngine::new(config, Arc::new(CacheStorage::in_memory()), network).unwrap();
    engine.activate().await;
    engine
}

/// GET a path and unwrap the engine's response
pub async fn get(engine: &CachePolicyEngine, path: &str) -> Response {
    engine
        .handle_fetch(&Request::get(url(path)))
        .await
        .into_response()
        .expect("request should be answered")
}

pub fn is_offline_page(response: &Response) -> bool {
    response.text().contains(enamel_cache::OFFLINE_HEADING)
}

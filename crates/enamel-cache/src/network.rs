//! Network access for cache misses and refreshes

use crate::config::EngineConfig;
use crate::error::{CacheError, Result};
use crate::request::{Request, Response};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Something that can perform a request against the network
///
/// Any response the server produced, including non-2xx statuses, is `Ok`.
/// `Err` means no response was obtained.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Configuration for the HTTP network
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// User agent
    pub user_agent: String,
}

impl From<&EngineConfig> for HttpConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Network backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Create a new HTTP network
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!("Fetching: {} {}", request.method, request.url);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

//! Module sources: the side-effecting half of a module load

use crate::{LoaderError, ModuleDescriptor, Result, StyleDocument, StyleElement};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

/// Outcome of applying a module to the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedModule {
    /// Payload size in bytes
    pub bytes: usize,
}

/// Capability that fetches a module and applies its effect
///
/// The loader only sequences calls to this trait; what "applying" means is
/// up to the implementation.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Fetch and apply a module
    async fn load(&self, module: &ModuleDescriptor) -> Result<AppliedModule>;

    /// Whether the module's marker is already present in the page
    fn is_installed(&self, _module: &ModuleDescriptor) -> bool {
        false
    }
}

/// Fetches raw stylesheet payloads
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    /// Fetch a module's payload
    async fn fetch(&self, module: &ModuleDescriptor) -> Result<Bytes>;
}

/// Payloads bundled with the page
#[derive(Debug, Clone, Default)]
pub struct StaticPayloads {
    payloads: HashMap<String, Bytes>,
}

impl StaticPayloads {
    /// Create an empty payload set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload
    pub fn with(mut self, module_id: impl Into<String>, css: impl Into<Bytes>) -> Self {
        self.payloads.insert(module_id.into(), css.into());
        self
    }

    /// Register a payload in place
    pub fn insert(&mut self, module_id: impl Into<String>, css: impl Into<Bytes>) {
        self.payloads.insert(module_id.into(), css.into());
    }
}

#[async_trait]
impl PayloadFetcher for StaticPayloads {
    async fn fetch(&self, module: &ModuleDescriptor) -> Result<Bytes> {
        self.payloads
            .get(&module.id)
            .cloned()
            .ok_or_else(|| LoaderError::module_load(&module.id, "no payload registered"))
    }
}

/// Configuration for fetching payloads over HTTP
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Maximum concurrent requests
    pub max_connections: usize,
    /// User agent
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_connections: 6,
            user_agent: format!("enamel-loader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Fetches payloads from an origin over HTTP
pub struct HttpPayloadFetcher {
    client: Client,
    base: Url,
    semaphore: Arc<Semaphore>,
}

impl HttpPayloadFetcher {
    /// Create a fetcher rooted at `base`
    pub fn new(base: Url, config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| LoaderError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base,
            semaphore: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// URL a module's payload is fetched from
    pub fn url_for(&self, module: &ModuleDescriptor) -> Result<Url> {
        let path = module
            .file
            .clone()
            .unwrap_or_else(|| format!("/{}.css", module.id));
        self.base.join(&path).map_err(|e| LoaderError::Fetch {
            module_id: module.id.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PayloadFetcher for HttpPayloadFetcher {
    async fn fetch(&self, module: &ModuleDescriptor) -> Result<Bytes> {
        let fetch_error = |message: String| LoaderError::Fetch {
            module_id: module.id.clone(),
            message,
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let url = self.url_for(module)?;
        debug!("Fetching stylesheet {}: {}", module.id, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response.bytes().await.map_err(|e| fetch_error(e.to_string())),
            status => Err(fetch_error(format!("HTTP {}", status.as_u16()))),
        }
    }
}

/// Injects fetched stylesheets into a [`StyleDocument`]
pub struct StyleSheetSource<F> {
    fetcher: F,
    document: Arc<StyleDocument>,
}

impl<F: PayloadFetcher> StyleSheetSource<F> {
    /// Create a source writing into `document`
    pub fn new(fetcher: F, document: Arc<StyleDocument>) -> Self {
        Self { fetcher, document }
    }

    /// The document being written to
    pub fn document(&self) -> &Arc<StyleDocument> {
        &self.document
    }
}

#[async_trait]
impl<F: PayloadFetcher> ModuleSource for StyleSheetSource<F> {
    async fn load(&self, module: &ModuleDescriptor) -> Result<AppliedModule> {
        let payload = self.fetcher.fetch(module).await?;
        let bytes = payload.len();
        let element = StyleElement::new(module.marker(), String::from_utf8_lossy(&payload));

        // Critical styles go first so later sheets can override them.
        let inserted = if module.critical {
            self.document.prepend(element)
        } else {
            self.document.append(element)
        };

        if !inserted {
            debug!("{}: marker already present, payload discarded", module.id);
        }

        Ok(AppliedModule { bytes })
    }

    fn is_installed(&self, module: &ModuleDescriptor) -> bool {
        self.document.contains(&module.marker())
    }
}

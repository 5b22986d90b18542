//! Engine configuration
//!
//! Bucket policies, routing tables and the precache list. The defaults are the
//! production values of the clinic site.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// How a request is satisfied from the cache and the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve a fresh cached entry, otherwise fetch and store
    CacheFirst,
    /// Fetch and store, fall back to a tolerably stale entry
    NetworkFirst,
    /// Serve whatever is cached and refresh it in the background
    StaleWhileRevalidate,
}

/// Named cache bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    Critical,
    Images,
    Api,
    Static,
}

impl BucketKind {
    /// All buckets the engine manages
    pub const ALL: [BucketKind; 4] = [
        BucketKind::Critical,
        BucketKind::Images,
        BucketKind::Api,
        BucketKind::Static,
    ];

    /// Suffix appended to the versioned cache name
    pub fn suffix(self) -> &'static str {
        match self {
            BucketKind::Critical => "critical",
            BucketKind::Images => "images",
            BucketKind::Api => "api",
            BucketKind::Static => "static",
        }
    }
}

/// Policy for a single bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub kind: BucketKind,
    pub strategy: Strategy,
    /// Freshness window of a stored entry
    pub max_age: Duration,
    /// Entry bound enforced after every write
    pub max_entries: usize,
}

impl BucketConfig {
    pub fn new(kind: BucketKind, strategy: Strategy, max_age: Duration, max_entries: usize) -> Self {
        Self {
            kind,
            strategy,
            max_age,
            max_entries,
        }
    }
}

/// Cache policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix shared by every cache this engine creates
    pub cache_prefix: String,
    /// Version tag; buckets of other versions are removed on activation
    pub version: String,
    /// Origin precache paths are resolved against
    pub origin: String,
    /// Per-bucket policies
    pub buckets: Vec<BucketConfig>,
    /// Paths fetched and stored during install
    pub precache: Vec<String>,
    /// Path prefixes routed to the API bucket
    pub api_endpoints: Vec<String>,
    /// File extensions routed to the images bucket
    pub image_extensions: Vec<String>,
    /// Path fragments routed to the images bucket
    pub image_dirs: Vec<String>,
    /// File extensions routed to the static bucket
    pub static_extensions: Vec<String>,
    /// Path prefixes routed to the static bucket
    pub static_prefixes: Vec<String>,
    /// Strategy for requests that match no other route
    pub page_strategy: Strategy,
    /// Network-first serves cached entries up to `max_age * offline_tolerance` old
    pub offline_tolerance: u32,
    /// Total request timeout for the HTTP network
    pub request_timeout: Duration,
    /// Connect timeout for the HTTP network
    pub connect_timeout: Duration,
    /// User agent for the HTTP network
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            cache_prefix: "dr-islam-dental-".to_string(),
            version: "v1.2.0".to_string(),
            origin: "http://localhost/".to_string(),
            buckets: vec![
                BucketConfig::new(
                    BucketKind::Critical,
                    Strategy::CacheFirst,
                    Duration::from_secs(DAY),
                    50,
                ),
                BucketConfig::new(
                    BucketKind::Images,
                    Strategy::StaleWhileRevalidate,
                    Duration::from_secs(7 * DAY),
                    100,
                ),
                BucketConfig::new(
                    BucketKind::Api,
                    Strategy::NetworkFirst,
                    Duration::from_secs(5 * 60),
                    25,
                ),
                BucketConfig::new(
                    BucketKind::Static,
                    Strategy::CacheFirst,
                    Duration::from_secs(30 * DAY),
                    75,
                ),
            ],
            precache: strings(&[
                "/",
                "/css/critical.css",
                "/js/core-utils.js",
                "/js/ui-components.js",
                "/optimized-images/logo-80w.webp",
                "/optimized-images/hero-1920w.webp",
                "/manifest.json",
            ]),
            api_endpoints: strings(&[
                "/api/availability",
                "/api/services",
                "/api/contact",
                "/api/gallery/public",
                "/api/",
            ]),
            image_extensions: strings(&["jpg", "jpeg", "png", "gif", "webp", "avif", "svg"]),
            image_dirs: strings(&["/optimized-images/"]),
            static_extensions: strings(&["js", "css", "woff", "woff2", "ttf", "eot"]),
            static_prefixes: strings(&["/js/chunks/", "/css/"]),
            page_strategy: Strategy::NetworkFirst,
            offline_tolerance: 5,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("enamel-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Versioned cache name, e.g. `dr-islam-dental-v1.2.0`
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.version)
    }

    /// Storage name of a bucket, e.g. `dr-islam-dental-v1.2.0-images`
    pub fn bucket_name(&self, kind: BucketKind) -> String {
        format!("{}-{}", self.cache_name(), kind.suffix())
    }

    /// Whether a storage name belongs to the current version
    pub fn is_current(&self, name: &str) -> bool {
        name.strip_prefix(&self.cache_name())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Whether a storage name is a bucket of another version of this cache
    ///
    /// Names without the cache prefix belong to someone else and are left alone.
    pub fn is_outdated(&self, name: &str) -> bool {
        name.starts_with(&self.cache_prefix) && !self.is_current(name)
    }

    /// Policy of a bucket
    pub fn bucket(&self, kind: BucketKind) -> Option<&BucketConfig> {
        self.buckets.iter().find(|b| b.kind == kind)
    }

    /// Parsed origin
    pub fn origin_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.origin)?)
    }

    /// Check the configuration is usable by the engine
    pub fn validate(&self) -> Result<()> {
        self.origin_url()?;
        for kind in BucketKind::ALL {
            let bucket = self.bucket(kind).ok_or_else(|| {
                CacheError::Configuration(format!("missing policy for bucket '{}'", kind.suffix()))
            })?;
            if bucket.max_entries == 0 {
                return Err(CacheError::Configuration(format!(
                    "bucket '{}' must allow at least one entry",
                    kind.suffix()
                )));
            }
        }
        if self.offline_tolerance == 0 {
            return Err(CacheError::Configuration(
                "offline tolerance must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_precache(mut self, paths: Vec<String>) -> Self {
        self.precache = paths;
        self
    }

    /// Replace the policy of one bucket
    pub fn with_bucket(mut self, bucket: BucketConfig) -> Self {
        self.buckets.retain(|b| b.kind != bucket.kind);
        self.buckets.push(bucket);
        self
    }

    pub fn with_offline_tolerance(mut self, factor: u32) -> Self {
        self.offline_tolerance = factor;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

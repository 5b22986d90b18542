//! Error types for request caching

use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while handling requests
///
/// None of these cross the engine's public request boundary: network errors
/// are recovered from the cache or the offline page, write errors are logged
/// and the network response is still served.
#[derive(Error, Debug)]
pub enum CacheError {
    /// HTTP request failed
    #[error("HTTP error: {status} - {message}")]
    Http {
        status: u16,
        message: String,
    },

    /// Network connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Write would exceed the storage quota
    #[error("Storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded {
        needed: u64,
        available: u64,
    },

    /// Persisted data could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether this is a network fetch failure
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CacheError::Http { .. } | CacheError::Connection(_) | CacheError::Timeout(_)
        )
    }

    /// Whether this is a cache write failure
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            CacheError::QuotaExceeded { .. }
                | CacheError::Serialization(_)
                | CacheError::Io(_)
        )
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CacheError::Timeout(e.to_string())
        } else if e.is_connect() {
            CacheError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            CacheError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            CacheError::Connection(e.to_string())
        }
    }
}

impl From<url::ParseError> for CacheError {
    fn from(e: url::ParseError) -> Self {
        CacheError::InvalidUrl(e.to_string())
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Configuration(e.to_string())
    }
}

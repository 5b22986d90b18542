//! Request Caching Policies
//!
//! This crate answers intercepted requests from versioned cache buckets:
//!
//! - **Routing**: API, image, static and precached paths map to their own bucket
//! - **Strategies**: cache-first, network-first and stale-while-revalidate
//! - **Bounded Buckets**: every write trims the bucket to its entry limit,
//!   oldest entries first
//! - **Versioning**: install precaches the critical set, activation drops
//!   buckets of other versions
//! - **Offline Fallback**: a cached site root or a fixed offline page when
//!   nothing else can answer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CachePolicyEngine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │   Request    │ -> │    Router    │ -> │   Strategy   │      │
//! │  │ (GET, http)  │    │ (path class) │    │ (per bucket) │      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │                                            ↓          ↓        │
//! │                                   ┌──────────────┐ ┌─────────┐ │
//! │                                   │ CacheStorage │ │ Network │ │
//! │                                   │  (buckets)   │ │ (HTTP)  │ │
//! │                                   └──────────────┘ └─────────┘ │
//! │                                            ↓                    │
//! │                                   ┌──────────────┐              │
//! │                                   │   Offline    │              │
//! │                                   │   Fallback   │              │
//! │                                   └──────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod engine;
mod error;
mod network;
mod offline;
mod request;
mod route;
mod store;

pub use config::{BucketConfig, BucketKind, EngineConfig, Strategy};
pub use engine::{CachePolicyEngine, EngineState, EngineStats, FetchOutcome, InstallReport};
pub use error::{CacheError, Result};
pub use network::{HttpConfig, HttpNetwork, Network};
pub use offline::{offline_page, EMERGENCY_PHONE, OFFLINE_HEADING};
pub use request::{now_millis, Destination, Request, Response, CACHE_TIME_HEADER};
pub use route::{ResourceClass, Route, Router};
pub use store::{CacheStorage, CacheStore, StoreStats};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        CachePolicyEngine, CacheStorage, EngineConfig, FetchOutcome, Network, Request, Response,
        Result, Strategy,
    };
}

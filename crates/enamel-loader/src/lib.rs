//! Progressive Stylesheet Loading
//!
//! This crate sequences the loading of a page's stylesheet modules:
//!
//! - **Critical First**: one critical module is applied before anything else
//! - **Priority Tiers**: modules sharing a priority load concurrently, tiers
//!   load in ascending order
//! - **Dependencies**: a module starts only once its dependencies are loaded,
//!   with a bounded wait so cycles fail instead of hanging
//! - **Coalescing**: concurrent requests for one module share a single load
//! - **Timing Report**: per-module timings and rule-based recommendations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ResourceLoader                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │   Module     │ -> │  Tier Loop   │ -> │ ModuleSource │      │
//! │  │   Registry   │    │ (join tier)  │    │ (fetch+apply)│      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │                             ↑                   ↓              │
//! │                      Dependency Wait      ┌──────────────┐      │
//! │                      (watch, bounded)     │ StyleDocument│      │
//! │                             ↑             └──────────────┘      │
//! │                      ┌──────────────┐                           │
//! │                      │   Outcomes   │ -> events, metrics,       │
//! │                      │ (loaded set) │    performance report     │
//! │                      └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod descriptor;
mod document;
mod error;
mod events;
mod loader;
mod metrics;
mod source;

pub use config::{LoaderConfig, ReportThresholds};
pub use descriptor::{marker_for, ModuleDescriptor, ModuleRegistry};
pub use document::{StyleDocument, StyleElement};
pub use error::{LoaderError, Result};
pub use events::{LoaderEvent, SessionPhase};
pub use loader::{ModuleState, ResourceLoader};
pub use metrics::{LoadMetrics, ModuleTiming, PerformanceReport, CRITICAL_KEY, TOTAL_KEY};
pub use source::{
    AppliedModule, FetcherConfig, HttpPayloadFetcher, ModuleSource, PayloadFetcher,
    StaticPayloads, StyleSheetSource,
};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        LoaderConfig, LoaderEvent, ModuleDescriptor, ModuleRegistry, ModuleSource,
        PerformanceReport, ResourceLoader, Result, StyleDocument,
    };
}

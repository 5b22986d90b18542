//! Loader notifications

use crate::{LoadMetrics, LoaderError};
use std::time::Duration;

/// Notification emitted during a loading session
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// The critical module has been applied
    CriticalLoaded { module_id: String, load_time: Duration },
    /// A non-critical module has been applied
    ModuleLoaded {
        module_id: String,
        load_time: Duration,
        /// Payload size in bytes
        size: usize,
        /// Size hint from the descriptor
        size_hint: Option<String>,
    },
    /// A module failed; other modules are unaffected
    ModuleFailed { module_id: String, error: LoaderError },
    /// Every tier has been processed
    AllLoaded { total_time: Duration, metrics: LoadMetrics },
}

impl LoaderEvent {
    /// Module this event is about, if any
    pub fn module_id(&self) -> Option<&str> {
        match self {
            LoaderEvent::CriticalLoaded { module_id, .. }
            | LoaderEvent::ModuleLoaded { module_id, .. }
            | LoaderEvent::ModuleFailed { module_id, .. } => Some(module_id),
            LoaderEvent::AllLoaded { .. } => None,
        }
    }
}

/// Progress of a loading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    /// Nothing started
    Idle,
    /// Critical module in progress
    Critical,
    /// Non-critical tiers in progress
    Loading,
    /// All tiers processed
    Complete,
}

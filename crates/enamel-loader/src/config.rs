//! Loader configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds used to derive performance recommendations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportThresholds {
    /// Critical stylesheet budget (ms)
    pub critical_ms: f64,
    /// Whole session budget (ms)
    pub total_ms: f64,
    /// Per-module budget (ms)
    pub slow_module_ms: f64,
}

impl Default for ReportThresholds {
    fn default() -> Self {
        Self {
            critical_ms: 50.0,
            total_ms: 500.0,
            slow_module_ms: 100.0,
        }
    }
}

/// Resource loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Upper bound on how long a module waits for its dependencies
    pub dependency_timeout: Duration,
    /// Recommendation thresholds
    pub thresholds: ReportThresholds,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(5),
            thresholds: ReportThresholds::default(),
            event_capacity: 64,
        }
    }
}

impl LoaderConfig {
    /// Set the dependency wait ceiling
    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Override recommendation thresholds
    pub fn with_thresholds(mut self, thresholds: ReportThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

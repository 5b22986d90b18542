//! Load timing metrics and the performance report

use crate::ReportThresholds;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Key under which the critical path time is reported
pub const CRITICAL_KEY: &str = "critical";

/// Key under which the whole session time is reported
pub const TOTAL_KEY: &str = "total";

/// Per-session load timings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadMetrics {
    /// Id of the critical module, once it has loaded
    pub critical_module: Option<String>,
    /// Critical module load time
    pub critical: Option<Duration>,
    /// Session start to last tier completion
    pub total: Option<Duration>,
    /// Non-critical module load times, keyed by module id
    pub modules: BTreeMap<String, Duration>,
}

impl LoadMetrics {
    /// Record the critical module's load time
    pub fn record_critical(&mut self, module_id: &str, elapsed: Duration) {
        self.critical_module = Some(module_id.to_string());
        self.critical = Some(elapsed);
    }

    /// Record a non-critical module's load time
    pub fn record_module(&mut self, module_id: &str, elapsed: Duration) {
        self.modules.insert(module_id.to_string(), elapsed);
    }

    /// Record the session total
    pub fn record_total(&mut self, elapsed: Duration) {
        self.total = Some(elapsed);
    }

    /// Flat id -> milliseconds view, with the `critical` and `total` sentinels
    pub fn as_millis(&self) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> = self
            .modules
            .iter()
            .map(|(id, d)| (id.clone(), millis(*d)))
            .collect();
        if let Some(critical) = self.critical {
            map.insert(CRITICAL_KEY.to_string(), millis(critical));
        }
        if let Some(total) = self.total {
            map.insert(TOTAL_KEY.to_string(), millis(total));
        }
        map
    }

    /// Every loaded module's timing, critical included, slowest first
    pub fn module_timings(&self) -> Vec<ModuleTiming> {
        let mut timings: Vec<ModuleTiming> = self
            .modules
            .iter()
            .map(|(id, d)| ModuleTiming {
                module: id.clone(),
                load_time_ms: millis(*d),
            })
            .collect();

        if let (Some(id), Some(critical)) = (&self.critical_module, self.critical) {
            timings.push(ModuleTiming {
                module: id.clone(),
                load_time_ms: millis(critical),
            });
        }

        timings.sort_by(|a, b| b.load_time_ms.total_cmp(&a.load_time_ms));
        timings
    }

    /// Build the performance report
    pub fn report(&self, thresholds: &ReportThresholds) -> PerformanceReport {
        let total = self.total.map(millis).unwrap_or(0.0);
        let critical = self.critical.map(millis).unwrap_or(0.0);
        let modules = self.module_timings();

        let mut recommendations = Vec::new();
        if critical > thresholds.critical_ms {
            recommendations.push(format!(
                "Critical load time {critical:.2}ms exceeds {}ms - consider reducing critical payload size",
                thresholds.critical_ms
            ));
        }
        if total > thresholds.total_ms {
            recommendations.push(format!(
                "Total load time {total:.2}ms exceeds {}ms - consider preloading key modules",
                thresholds.total_ms
            ));
        }

        let slow: Vec<&str> = modules
            .iter()
            .filter(|t| t.load_time_ms > thresholds.slow_module_ms)
            .map(|t| t.module.as_str())
            .collect();
        if !slow.is_empty() {
            recommendations.push(format!(
                "Slow loading modules detected: {} - consider optimization",
                slow.join(", ")
            ));
        }

        PerformanceReport {
            total_load_time_ms: total,
            critical_path_ms: critical,
            modules,
            recommendations,
        }
    }
}

/// Load time of one module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleTiming {
    /// Module id
    pub module: String,
    /// Load time (ms)
    pub load_time_ms: f64,
}

/// Summary produced once every tier has been processed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Session total (ms)
    pub total_load_time_ms: f64,
    /// Critical module load time (ms)
    pub critical_path_ms: f64,
    /// Module timings, slowest first
    pub modules: Vec<ModuleTiming>,
    /// Rule-based suggestions
    pub recommendations: Vec<String>,
}

impl PerformanceReport {
    /// Emit the report through `tracing`
    pub fn log(&self) {
        info!(
            total_ms = self.total_load_time_ms,
            critical_ms = self.critical_path_ms,
            modules = self.modules.len(),
            "Module loading performance report"
        );
        for timing in &self.modules {
            info!("  {}: {:.2}ms", timing.module, timing.load_time_ms);
        }
        for recommendation in &self.recommendations {
            warn!("Recommendation: {}", recommendation);
        }
    }

    /// Serialize as JSON for posting to an analytics endpoint
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LoadMetrics {
        let mut metrics = LoadMetrics::default();
        metrics.record_critical("critical", Duration::from_millis(12));
        metrics.record_module("layout", Duration::from_millis(80));
        metrics.record_module("components", Duration::from_millis(160));
        metrics.record_total(Duration::from_millis(420));
        metrics
    }

    #[test]
    fn test_millis_map_has_sentinels() {
        let map = sample().as_millis();
        assert_eq!(map["critical"], 12.0);
        assert_eq!(map["total"], 420.0);
        assert_eq!(map["layout"], 80.0);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_report_sorted_descending() {
        let report = sample().report(&ReportThresholds::default());
        let order: Vec<&str> = report.modules.iter().map(|m| m.module.as_str()).collect();
        assert_eq!(order, vec!["components", "layout", "critical"]);
        assert_eq!(report.critical_path_ms, 12.0);
    }

    #[test]
    fn test_recommendations() {
        let report = sample().report(&ReportThresholds::default());
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("components"));

        let mut slow = sample();
        slow.record_critical("critical", Duration::from_millis(75));
        slow.record_total(Duration::from_millis(900));
        let report = slow.report(&ReportThresholds::default());
        assert_eq!(report.recommendations.len(), 3);
        assert!(report.recommendations[0].starts_with("Critical load time"));
        assert!(report.recommendations[1].starts_with("Total load time"));
    }

    #[test]
    fn test_thresholds_are_overridable() {
        let thresholds = ReportThresholds {
            slow_module_ms: 500.0,
            ..Default::default()
        };
        assert!(sample().report(&thresholds).recommendations.is_empty());
    }

    #[test]
    fn test_report_json() {
        let json = sample().report(&ReportThresholds::default()).to_json();
        assert!(json.contains("\"critical_path_ms\":12.0"));
    }
}

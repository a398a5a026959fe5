//! Observability infrastructure for the tuning agent
//!
//! Provides:
//! - Prometheus metrics (table growth, search and snapshot latency, inference outcomes)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
];

static GLOBAL_METRICS: OnceLock<TunerMetricsInner> = OnceLock::new();

struct TunerMetricsInner {
    table_entries: IntGauge,
    table_capacity: IntGauge,
    insertions: IntCounter,
    duplicate_keys: IntCounter,
    search_misses: IntCounter,
    search_latency_seconds: Histogram,
    snapshot_latency_seconds: Histogram,
    snapshot_errors: IntCounter,
    inference_evaluations: IntCounter,
    inference_matches: IntCounter,
    current_score: Gauge,
    settings_applied: IntCounter,
    apply_errors: IntCounter,
    stats_errors: IntCounter,
}

impl TunerMetricsInner {
    fn new() -> Self {
        Self {
            table_entries: register_int_gauge!(
                "tuner_table_entries",
                "Number of profiles in the table"
            )
            .expect("Failed to register table_entries"),

            table_capacity: register_int_gauge!(
                "tuner_table_capacity",
                "Maximum number of profiles the table can hold"
            )
            .expect("Failed to register table_capacity"),

            insertions: register_int_counter!(
                "tuner_insertions_total",
                "Profiles synthesized and inserted into the table"
            )
            .expect("Failed to register insertions"),

            duplicate_keys: register_int_counter!(
                "tuner_duplicate_keys_total",
                "Insertions rejected because the transfer rate was already present"
            )
            .expect("Failed to register duplicate_keys"),

            search_misses: register_int_counter!(
                "tuner_search_misses_total",
                "Searches that found no profile within tolerance"
            )
            .expect("Failed to register search_misses"),

            search_latency_seconds: register_histogram!(
                "tuner_search_latency_seconds",
                "Time spent searching the profile table",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register search_latency_seconds"),

            snapshot_latency_seconds: register_histogram!(
                "tuner_snapshot_latency_seconds",
                "Time spent writing a table snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_latency_seconds"),

            snapshot_errors: register_int_counter!(
                "tuner_snapshot_errors_total",
                "Table snapshots that could not be written"
            )
            .expect("Failed to register snapshot_errors"),

            inference_evaluations: register_int_counter!(
                "tuner_inference_evaluations_total",
                "Inference ticks that searched the table"
            )
            .expect("Failed to register inference_evaluations"),

            inference_matches: register_int_counter!(
                "tuner_inference_matches_total",
                "Inference searches that found a profile"
            )
            .expect("Failed to register inference_matches"),

            current_score: register_gauge!(
                "tuner_current_score",
                "Weighted score of the last live sample"
            )
            .expect("Failed to register current_score"),

            settings_applied: register_int_counter!(
                "tuner_settings_applied_total",
                "Profiles handed to the settings applier"
            )
            .expect("Failed to register settings_applied"),

            apply_errors: register_int_counter!(
                "tuner_apply_errors_total",
                "Commands that failed while applying a profile"
            )
            .expect("Failed to register apply_errors"),

            stats_errors: register_int_counter!(
                "tuner_stats_errors_total",
                "Failed reads of interface or CPU statistics"
            )
            .expect("Failed to register stats_errors"),
        }
    }
}

/// Handle to the process-wide tuner metrics.
///
/// Clones share the same underlying Prometheus collectors.
#[derive(Clone)]
pub struct TunerMetrics {
    _private: (),
}

impl Default for TunerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TunerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TunerMetricsInner {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new)
    }

    pub fn set_table_size(&self, entries: usize, capacity: usize) {
        self.inner().table_entries.set(entries as i64);
        self.inner().table_capacity.set(capacity as i64);
    }

    pub fn inc_insertions(&self) {
        self.inner().insertions.inc();
    }

    pub fn inc_duplicate_keys(&self) {
        self.inner().duplicate_keys.inc();
    }

    pub fn inc_search_misses(&self) {
        self.inner().search_misses.inc();
    }

    pub fn observe_search_latency(&self, duration_secs: f64) {
        self.inner().search_latency_seconds.observe(duration_secs);
    }

    pub fn observe_snapshot_latency(&self, duration_secs: f64) {
        self.inner().snapshot_latency_seconds.observe(duration_secs);
    }

    pub fn inc_snapshot_errors(&self) {
        self.inner().snapshot_errors.inc();
    }

    pub fn inc_inference_evaluations(&self) {
        self.inner().inference_evaluations.inc();
    }

    pub fn inc_inference_matches(&self) {
        self.inner().inference_matches.inc();
    }

    pub fn set_current_score(&self, score: f64) {
        self.inner().current_score.set(score);
    }

    pub fn inc_settings_applied(&self) {
        self.inner().settings_applied.inc();
    }

    pub fn inc_apply_errors(&self) {
        self.inner().apply_errors.inc();
    }

    pub fn inc_stats_errors(&self) {
        self.inner().stats_errors.inc();
    }
}

/// Structured logger for agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    interface: String,
}

impl StructuredLogger {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str, entries: usize) {
        info!(
            event = "agent_started",
            interface = %self.interface,
            agent_version = %version,
            mode = %mode,
            entries = entries,
            "Tuning agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            interface = %self.interface,
            reason = %reason,
            "Tuning agent shutting down"
        );
    }

    pub fn log_settings_applied(&self, transfer_rate: u64, score: f64, dry_run: bool) {
        info!(
            event = "settings_applied",
            interface = %self.interface,
            transfer_rate = transfer_rate,
            score = score,
            dry_run = dry_run,
            "Applied tuning profile"
        );
    }

    pub fn log_snapshot(&self, path: &Path, rows: usize, elapsed_ms: u128) {
        info!(
            event = "snapshot_written",
            path = %path.display(),
            rows = rows,
            elapsed_ms = elapsed_ms as u64,
            "Table snapshot written"
        );
    }

    pub fn log_snapshot_failed(&self, path: &Path, error: &str) {
        warn!(
            event = "snapshot_failed",
            path = %path.display(),
            error = %error,
            "Table snapshot failed, training continues"
        );
    }

    pub fn log_capacity_reached(&self, entries: usize) {
        info!(
            event = "capacity_reached",
            interface = %self.interface,
            entries = entries,
            "Profile table is full"
        );
    }

    pub fn log_reload(&self, success: bool, detail: &str) {
        if success {
            info!(
                event = "settings_reloaded",
                detail = %detail,
                "Settings reloaded"
            );
        } else {
            warn!(
                event = "settings_reload_failed",
                detail = %detail,
                "Settings reload failed, keeping previous settings"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuner_metrics_handles_share_registry() {
        let metrics = TunerMetrics::new();
        let other = metrics.clone();

        metrics.set_table_size(10, 100);
        metrics.inc_insertions();
        other.inc_insertions();
        metrics.observe_search_latency(0.0001);
        metrics.observe_snapshot_latency(0.02);
        metrics.set_current_score(404.1);

        assert!(GLOBAL_METRICS.get().unwrap().insertions.get() >= 2);
        assert_eq!(GLOBAL_METRICS.get().unwrap().table_capacity.get(), 100);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("eth0");
        assert_eq!(logger.interface, "eth0");
        logger.log_shutdown("test");
    }
}

//! Control loops driving the profile table
//!
//! - Training: parallel blocking workers synthesize profiles for random keys
//! - Live training: one task learns from the live operating point
//! - Inference: periodic lookup of the live operating point and hand-off to
//!   the settings applier
//!
//! All loops share a [`ControlContext`]; the table write lock covers one
//! whole capacity check, search and insertion.

mod inference;
mod live_training;
mod training;

#[cfg(test)]
mod tests;

pub use inference::{
    decide, Decision, InferenceController, InferenceCounters, InferenceOutcome, InferenceReport,
    REPORT_EVERY,
};
pub use live_training::run_live_training;
pub use training::{
    draw_key, run_training, run_training_worker, training_step, TrainingStep,
    MAX_CONSECUTIVE_MISSES,
};

use crate::config::Settings;
use crate::engine::{
    find_closest, relative_precision, sample_score, tolerance, SearchOutcome, SharedTable,
    ValueTable,
};
use crate::models::{LoadSample, TuningProfile, WeightsReference};
use crate::observability::{StructuredLogger, TunerMetrics};
use crate::persistence::write_profiles;
use crate::stats::SharedStats;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared by every control loop of a session
#[derive(Clone)]
pub struct ControlContext {
    pub table: SharedTable,
    pub settings: Arc<ArcSwap<Settings>>,
    pub stats: Arc<SharedStats>,
    pub metrics: TunerMetrics,
    pub logger: StructuredLogger,
}

impl ControlContext {
    pub fn new(
        table: SharedTable,
        settings: Arc<ArcSwap<Settings>>,
        stats: Arc<SharedStats>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            table,
            settings,
            stats,
            metrics: TunerMetrics::new(),
            logger,
        }
    }

    /// Exclusive access to the table; a poisoned lock is taken over as is
    pub fn write_table(&self) -> RwLockWriteGuard<'_, ValueTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read_table(&self) -> RwLockReadGuard<'_, ValueTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_table_size(&self, table: &ValueTable) {
        self.metrics.set_table_size(table.len(), table.capacity());
    }

    /// Write `rows` to `path`, logging instead of failing
    pub fn write_snapshot(&self, path: &Path, rows: &[TuningProfile]) -> Option<usize> {
        let start = Instant::now();
        match write_profiles(path, rows) {
            Ok(written) => {
                let elapsed = start.elapsed();
                self.metrics.observe_snapshot_latency(elapsed.as_secs_f64());
                self.logger.log_snapshot(path, written, elapsed.as_millis());
                Some(written)
            }
            Err(e) => {
                self.metrics.inc_snapshot_errors();
                self.logger.log_snapshot_failed(path, &e.to_string());
                None
            }
        }
    }
}

/// Score, relative precision and tolerance of one operating point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchParams {
    pub score: f64,
    pub epsilon: f64,
    pub tolerance: f64,
}

impl SearchParams {
    pub fn for_score(score: f64, settings: &Settings) -> Self {
        let epsilon = relative_precision(score, settings.accuracy);
        Self {
            score,
            epsilon,
            tolerance: tolerance(score, epsilon, settings.approx_function),
        }
    }

    pub fn for_sample(sample: &LoadSample, settings: &Settings) -> Self {
        Self::for_score(sample_score(sample, &settings.weights), settings)
    }

    /// Search the whole table for an entry within tolerance
    pub fn search(
        &self,
        table: &ValueTable,
        weights: &WeightsReference,
        metrics: &TunerMetrics,
    ) -> SearchOutcome {
        let start = Instant::now();
        let outcome = find_closest(table.as_slice(), self.score, self.tolerance, weights);
        metrics.observe_search_latency(start.elapsed().as_secs_f64());
        if outcome.found().is_none() {
            metrics.inc_search_misses();
        }
        outcome
    }
}

/// Result of one training run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    pub inserted: u64,
    pub duplicates: u64,
    pub misses: u64,
    /// Occupied entries when the run ended
    pub entries: usize,
    /// True when the run ended because the table filled up
    pub full: bool,
    /// True when a worker gave up after too many draws in a row without an insertion
    pub stalled: bool,
}

impl TrainingSummary {
    pub fn merge(self, other: TrainingSummary) -> TrainingSummary {
        TrainingSummary {
            inserted: self.inserted + other.inserted,
            duplicates: self.duplicates + other.duplicates,
            misses: self.misses + other.misses,
            entries: self.entries.max(other.entries),
            full: self.full || other.full,
            stalled: self.stalled || other.stalled,
        }
    }

    pub(crate) fn record(&mut self, step: &TrainingStep) {
        match step {
            TrainingStep::Inserted { .. } => self.inserted += 1,
            TrainingStep::Duplicate(_) => self.duplicates += 1,
            TrainingStep::Miss { .. } => self.misses += 1,
            TrainingStep::Full => self.full = true,
        }
    }
}

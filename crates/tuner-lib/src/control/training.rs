//! Offline training with synthetic operating points

use super::{ControlContext, SearchParams, TrainingSummary};
use crate::config::Settings;
use crate::engine::{augment, weighted_score, TableError, ValueTable};
use crate::models::LoadSample;
use crate::observability::TunerMetrics;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Draws in a row without an insertion after which a worker gives up
pub const MAX_CONSECUTIVE_MISSES: u64 = 100_000;

/// Outcome of one locked training iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStep {
    Inserted { index: usize, key: u64 },
    Duplicate(u64),
    Miss { key: u64, closest: Option<usize> },
    Full,
}

/// Draw a synthetic key in `[0, max key)`; zero is replaced by the smallest key.
///
/// Returns `None` when the table has no positive key to draw below.
pub fn draw_key<R: Rng + ?Sized>(rng: &mut R, table: &ValueTable) -> Option<u64> {
    let max = table.max_key().filter(|max| *max > 0)?;
    match rng.gen_range(0..max) {
        0 => table.min_key(),
        key => Some(key),
    }
}

/// Search for `key` and, on a match, synthesize and insert a profile.
///
/// The caller holds the table write lock for the whole call. `live` selects
/// live-mode augmentation.
pub fn training_step(
    table: &mut ValueTable,
    key: u64,
    params: &SearchParams,
    settings: &Settings,
    metrics: &TunerMetrics,
    live: Option<&LoadSample>,
) -> TrainingStep {
    if table.is_full() {
        return TrainingStep::Full;
    }

    let outcome = params.search(table, &settings.weights, metrics);
    let Some(reference) = outcome.found() else {
        let closest_key = outcome
            .closest
            .and_then(|i| table.get(i))
            .map(|p| p.transfer_rate);
        debug!(
            key = key,
            closest_index = ?outcome.closest,
            closest_key = ?closest_key,
            tolerance = params.tolerance,
            "No match for synthetic key"
        );
        return TrainingStep::Miss {
            key,
            closest: outcome.closest,
        };
    };

    match augment(
        table,
        reference,
        key,
        params.epsilon,
        settings.approx_function,
        live,
    ) {
        Ok(index) => {
            metrics.inc_insertions();
            TrainingStep::Inserted { index, key }
        }
        Err(TableError::DuplicateKey(key)) => {
            metrics.inc_duplicate_keys();
            debug!(key = key, "Duplicate key not inserted");
            TrainingStep::Duplicate(key)
        }
        Err(TableError::CapacityExhausted { .. }) => TrainingStep::Full,
        Err(e) => {
            warn!(key = key, error = %e, "Augmentation rejected");
            TrainingStep::Miss {
                key,
                closest: outcome.closest,
            }
        }
    }
}

/// Run one training worker until the table is full, shutdown is signalled
/// or [`MAX_CONSECUTIVE_MISSES`] draws in a row insert nothing.
///
/// Blocking: meant for `spawn_blocking`.
pub fn run_training_worker<R: Rng + ?Sized>(
    ctx: &ControlContext,
    snapshot: &Path,
    worker: usize,
    rng: &mut R,
    shutdown: &mut broadcast::Receiver<()>,
) -> TrainingSummary {
    let mut summary = TrainingSummary::default();
    let mut misses_in_row = 0u64;
    debug!(worker = worker, "Training worker started");

    loop {
        if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
            info!(worker = worker, "Training worker stopping on shutdown");
            break;
        }

        let settings = ctx.settings.load();
        let companions = ctx.stats.sample();

        let (step, rows) = {
            let mut table = ctx.write_table();
            let Some(key) = draw_key(rng, &table) else {
                warn!(worker = worker, "Table has no keys to train from");
                break;
            };

            let score = weighted_score(
                key,
                companions.drop_rate,
                companions.errors_rate,
                companions.fifo_errors_rate,
                &settings.weights,
            );
            let params = SearchParams::for_score(score, &settings);
            let step = training_step(&mut table, key, &params, &settings, &ctx.metrics, None);

            let due = table.len() as u64 % settings.saving_loop.max(1) == 0;
            let rows = match step {
                TrainingStep::Inserted { .. } if due => Some(table.snapshot()),
                _ => None,
            };
            ctx.record_table_size(&table);
            (step, rows)
        };

        summary.record(&step);
        if let Some(rows) = rows {
            ctx.write_snapshot(snapshot, &rows);
        }
        match step {
            TrainingStep::Full => break,
            TrainingStep::Inserted { .. } => misses_in_row = 0,
            TrainingStep::Miss { .. } | TrainingStep::Duplicate(_) => {
                misses_in_row += 1;
                if misses_in_row >= MAX_CONSECUTIVE_MISSES {
                    warn!(
                        worker = worker,
                        draws = misses_in_row,
                        "No synthetic key matched the table, stopping worker"
                    );
                    summary.stalled = true;
                    break;
                }
            }
        }
    }

    debug!(
        worker = worker,
        inserted = summary.inserted,
        misses = summary.misses,
        "Training worker finished"
    );
    summary
}

/// Train with `threads` workers sharing the table
pub async fn run_training(
    ctx: ControlContext,
    snapshot: PathBuf,
    threads: usize,
    shutdown: &broadcast::Sender<()>,
) -> Result<TrainingSummary> {
    let threads = threads.max(1);
    info!(threads = threads, snapshot = %snapshot.display(), "Starting training");

    let mut handles = Vec::with_capacity(threads);
    for worker in 0..threads {
        let ctx = ctx.clone();
        let snapshot = snapshot.clone();
        let mut shutdown = shutdown.subscribe();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::from_entropy();
            run_training_worker(&ctx, &snapshot, worker, &mut rng, &mut shutdown)
        }));
    }

    let mut summary = TrainingSummary::default();
    for handle in handles {
        let worker_summary = handle.await.context("Training worker panicked")?;
        summary = summary.merge(worker_summary);
    }
    summary.entries = ctx.read_table().len();

    if summary.full {
        ctx.logger.log_capacity_reached(summary.entries);
    }
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        misses = summary.misses,
        entries = summary.entries,
        stalled = summary.stalled,
        "Training finished"
    );
    Ok(summary)
}

//! Training from the live operating point

use super::training::{training_step, TrainingStep};
use super::{ControlContext, SearchParams, TrainingSummary};
use std::path::Path;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Learn from live statistics until the table is full or shutdown is signalled.
///
/// Ticks at the stats collection period. Idle samples are skipped.
pub async fn run_live_training(
    ctx: ControlContext,
    snapshot: &Path,
    mut shutdown: broadcast::Receiver<()>,
) -> TrainingSummary {
    let period = ctx.settings.load().stats_collection_period;
    info!(
        period_ms = period.as_millis() as u64,
        snapshot = %snapshot.display(),
        "Starting live training"
    );

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary = TrainingSummary::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sample = ctx.stats.sample();
                if sample.is_idle() {
                    debug!("Idle sample, skipping live training tick");
                    continue;
                }

                let settings = ctx.settings.load_full();
                let params = SearchParams::for_sample(&sample, &settings);
                let (step, rows) = {
                    let mut table = ctx.write_table();
                    let step = training_step(
                        &mut table,
                        sample.transfer_rate,
                        &params,
                        &settings,
                        &ctx.metrics,
                        Some(&sample),
                    );
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
                if step == TrainingStep::Full {
                    ctx.logger.log_capacity_reached(ctx.read_table().len());
                    break;
                }
            }
            _ = shutdown.recv() => {
                info!("Live training stopping on shutdown");
                break;
            }
        }
    }

    summary.entries = ctx.read_table().len();
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        misses = summary.misses,
        entries = summary.entries,
        "Live training finished"
    );
    summary
}

//! Inference: keep the applied profile matched to the live operating point

use super::{ControlContext, SearchParams};
use crate::apply::{ApplyOutcome, SettingsApplier};
use crate::health::{components, HealthRegistry};
use crate::models::{LoadSample, TuningProfile};
use crate::stats::Watermarks;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Searches between two periodic reports, and skipped ticks between two
/// skip messages
pub const REPORT_EVERY: u64 = 10;

/// What an inference tick does with a live score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The score moved less than the tolerance since the last change
    SkipSmallDelta { delta: f64, tolerance: f64 },
    /// The score dropped, but the last change is younger than the grace period
    SkipGracePeriod { since_change: Duration },
    Search,
}

/// Decide whether a live `score` warrants a new search.
///
/// `baseline` is the score of the last applied profile.
pub fn decide(
    score: f64,
    baseline: f64,
    tolerance: f64,
    since_change: Duration,
    grace_period: Duration,
) -> Decision {
    let delta = (score - baseline).abs();
    if delta < tolerance {
        return Decision::SkipSmallDelta { delta, tolerance };
    }
    if score < baseline && since_change <= grace_period {
        return Decision::SkipGracePeriod { since_change };
    }
    Decision::Search
}

/// Search counters shared with reporting
#[derive(Debug, Default)]
pub struct InferenceCounters {
    loops: AtomicU64,
    matches: AtomicU64,
}

impl InferenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, matched: bool) {
        self.loops.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn loops(&self) -> u64 {
        self.loops.load(Ordering::Relaxed)
    }

    pub fn matches(&self) -> u64 {
        self.matches.load(Ordering::Relaxed)
    }

    pub fn report(&self, watermarks: Watermarks) -> InferenceReport {
        let loops = self.loops();
        let matches = self.matches();
        let success_rate = if loops == 0 {
            0.0
        } else {
            matches as f64 / loops as f64 * 100.0
        };
        InferenceReport {
            loops,
            matches,
            success_rate,
            min_transfer_rate: watermarks.min_transfer_rate,
            max_transfer_rate: watermarks.max_transfer_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceReport {
    pub loops: u64,
    pub matches: u64,
    /// Percentage of searches that found a profile
    pub success_rate: f64,
    pub min_transfer_rate: Option<u64>,
    pub max_transfer_rate: Option<u64>,
}

/// Result of one inference tick
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// All counters were zero
    Idle,
    Skipped(Decision),
    Applied {
        index: usize,
        transfer_rate: u64,
        outcome: Option<ApplyOutcome>,
    },
    Missed {
        closest_key: Option<u64>,
    },
}

/// Periodic inference over the shared table
pub struct InferenceController {
    ctx: ControlContext,
    applier: Arc<dyn SettingsApplier>,
    interface: String,
    counters: Arc<InferenceCounters>,
    health: Option<HealthRegistry>,
    baseline: f64,
    since_change: Duration,
    quiet_ticks: u64,
}

impl InferenceController {
    pub fn new(
        ctx: ControlContext,
        applier: Arc<dyn SettingsApplier>,
        interface: impl Into<String>,
        counters: Arc<InferenceCounters>,
    ) -> Self {
        Self {
            ctx,
            applier,
            interface: interface.into(),
            counters,
            health: None,
            baseline: 0.0,
            since_change: Duration::ZERO,
            quiet_ticks: 0,
        }
    }

    /// Report applier failures to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Score of the last applied profile
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Run until a shutdown message arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.ctx.settings.load().inference_loop_period;
        info!(
            interface = %self.interface,
            period_ms = period.as_millis() as u64,
            "Inference running"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last;
                    last = now;
                    let sample = self.ctx.stats.sample();
                    self.evaluate(&sample, elapsed).await;
                }
                _ = shutdown.recv() => {
                    info!("Inference stopping on shutdown");
                    break;
                }
            }
        }

        self.log_report();
    }

    /// Evaluate one live sample taken `elapsed` after the previous one
    pub async fn evaluate(&mut self, sample: &LoadSample, elapsed: Duration) -> InferenceOutcome {
        self.since_change += elapsed;
        if sample.is_idle() {
            return InferenceOutcome::Idle;
        }

        let settings = self.ctx.settings.load_full();
        let params = SearchParams::for_sample(sample, &settings);
        self.ctx.metrics.set_current_score(params.score);
        self.quiet_ticks += 1;

        let decision = decide(
            params.score,
            self.baseline,
            params.tolerance,
            self.since_change,
            settings.grace_period,
        );
        if decision != Decision::Search {
            if self.quiet_ticks % REPORT_EVERY == 0 {
                info!(
                    score = params.score,
                    baseline = self.baseline,
                    decision = ?decision,
                    "Keeping current settings"
                );
                self.quiet_ticks = 0;
            }
            return InferenceOutcome::Skipped(decision);
        }

        info!(
            score = params.score,
            baseline = self.baseline,
            tolerance = params.tolerance,
            "Searching for operating point"
        );
        if self.counters.loops() % REPORT_EVERY == 0 {
            self.log_report();
        }
        self.ctx.metrics.inc_inference_evaluations();

        let (hit, closest_key) = {
            let table = self.ctx.read_table();
            let outcome = params.search(&table, &settings.weights, &self.ctx.metrics);
            let hit = outcome
                .found()
                .and_then(|i| table.get(i).map(|p| (i, p.clone())));
            let closest_key = outcome
                .closest
                .and_then(|i| table.get(i))
                .map(|p| p.transfer_rate);
            (hit, closest_key)
        };

        match hit {
            Some((index, profile)) => {
                self.counters.record(true);
                self.ctx.metrics.inc_inference_matches();
                debug!(
                    index = index,
                    transfer_rate = profile.transfer_rate,
                    live_rate = sample.transfer_rate,
                    "Match found"
                );

                let outcome = self.apply(&profile, params.score).await;
                self.since_change = Duration::ZERO;
                self.quiet_ticks = 0;
                self.baseline = params.score;

                InferenceOutcome::Applied {
                    index,
                    transfer_rate: profile.transfer_rate,
                    outcome,
                }
            }
            None => {
                self.counters.record(false);
                info!(
                    transfer_rate = sample.transfer_rate,
                    closest_key = ?closest_key,
                    tolerance = params.tolerance,
                    "No profile matches the live operating point"
                );
                InferenceOutcome::Missed { closest_key }
            }
        }
    }

    async fn apply(&self, profile: &TuningProfile, score: f64) -> Option<ApplyOutcome> {
        match self.applier.apply(&self.interface, profile).await {
            Ok(outcome) => {
                self.ctx.metrics.inc_settings_applied();
                self.ctx.logger.log_settings_applied(
                    profile.transfer_rate,
                    score,
                    outcome.is_dry_run(),
                );
                if let Some(health) = &self.health {
                    health.set_healthy(components::APPLIER).await;
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, transfer_rate = profile.transfer_rate, "Failed to apply settings");
                self.ctx.metrics.inc_apply_errors();
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::APPLIER, e.to_string())
                        .await;
                }
                None
            }
        }
    }

    pub fn report(&self) -> InferenceReport {
        self.counters.report(self.ctx.stats.watermarks())
    }

    fn log_report(&self) {
        let report = self.report();
        info!(
            event = "inference_report",
            loops = report.loops,
            matches = report.matches,
            success_rate = report.success_rate,
            min_transfer_rate = ?report.min_transfer_rate,
            max_transfer_rate = ?report.max_transfer_rate,
            "Inference report"
        );
    }
}

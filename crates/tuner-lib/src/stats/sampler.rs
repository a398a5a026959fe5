//! Statistics sampling loop
//!
//! Drives one [`StatsSource`] at a fixed period until shutdown. A failed
//! read zeroes what the source publishes, so consumers skip the tick.

use super::{SharedStats, StatsSource};
use crate::health::{components, HealthRegistry};
use crate::observability::TunerMetrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic sampler for one statistics source
pub struct SamplerLoop {
    source: Box<dyn StatsSource>,
    stats: Arc<SharedStats>,
    period: Duration,
    health: Option<HealthRegistry>,
    metrics: TunerMetrics,
}

impl SamplerLoop {
    pub fn new(source: Box<dyn StatsSource>, stats: Arc<SharedStats>, period: Duration) -> Self {
        Self {
            source,
            stats,
            period,
            health: None,
            metrics: TunerMetrics::new(),
        }
    }

    /// Run until a shutdown message arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            source = self.source.name(),
            period_ms = self.period.as_millis() as u64,
            "Starting stats sampler"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick().await {
                        if consecutive_errors > 0 {
                            info!(source = self.source.name(), "Stats source recovered");
                            self.report_healthy().await;
                        }
                        consecutive_errors = 0;
                    } else {
                        consecutive_errors += 1;
                        if consecutive_errors == 1 {
                            self.report_degraded().await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(source = self.source.name(), "Shutting down stats sampler");
                    break;
                }
            }
        }
    }

    /// Take one sample; returns false when the source could not be read
    pub async fn tick(&mut self) -> bool {
        match self.source.sample(&self.stats).await {
            Ok(()) => {
                debug!(source = self.source.name(), "Sample taken");
                true
            }
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Stats unavailable");
                self.metrics.inc_stats_errors();
                self.source.on_error(&self.stats);
                false
            }
        }
    }

    async fn report_degraded(&self) {
        if let Some(health) = &self.health {
            health
                .set_degraded(components::STATS_SAMPLER, format!("{} unavailable", self.source.name()))
                .await;
        }
    }

    async fn report_healthy(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::STATS_SAMPLER).await;
        }
    }
}

/// Builder for a [`SamplerLoop`]
pub struct SamplerLoopBuilder {
    source: Option<Box<dyn StatsSource>>,
    stats: Option<Arc<SharedStats>>,
    period: Duration,
    health: Option<HealthRegistry>,
}

impl SamplerLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            stats: None,
            period: Duration::from_secs(1),
            health: None,
        }
    }

    pub fn source(mut self, source: Box<dyn StatsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn stats(mut self, stats: Arc<SharedStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Report read failures to the health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<SamplerLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Stats source is required"))?;
        let stats = self
            .stats
            .ok_or_else(|| anyhow::anyhow!("Shared stats are required"))?;
        if self.period.is_zero() {
            anyhow::bail!("Sampling period must be positive");
        }

        let mut sampler = SamplerLoop::new(source, stats, self.period);
        sampler.health = self.health;
        Ok(sampler)
    }
}

impl Default for SamplerLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

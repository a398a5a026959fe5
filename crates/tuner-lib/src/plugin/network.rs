//! Network stack tuning plugin

use super::{PluginContext, PluginReport, TuningPlugin};
use crate::control::{
    run_live_training, run_training, InferenceController, InferenceCounters, TrainingSummary,
};
use crate::persistence::snapshot_path;
use crate::stats::{
    CpuSource, InterfaceSource, ProcStatReader, SamplerLoopBuilder, SysfsInterfaceReader,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tunes one interface from the interface and CPU statistics
pub struct NetworkPlugin {
    ctx: Option<PluginContext>,
    counters: Arc<InferenceCounters>,
    samplers: Mutex<Vec<JoinHandle<()>>>,
    /// Subscribed at init so a shutdown sent before the loop starts is not lost
    shutdown_rx: Mutex<Option<broadcast::Receiver<()>>>,
}

impl Default for NetworkPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkPlugin {
    pub fn new() -> Self {
        Self {
            ctx: None,
            counters: Arc::new(InferenceCounters::new()),
            samplers: Mutex::new(Vec::new()),
            shutdown_rx: Mutex::new(None),
        }
    }

    fn context(&self) -> Result<&PluginContext> {
        self.ctx
            .as_ref()
            .context("Network plugin used before init")
    }

    fn shutdown_receiver(&self, ctx: &PluginContext) -> broadcast::Receiver<()> {
        self.shutdown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| ctx.shutdown.subscribe())
    }
}

#[async_trait]
impl TuningPlugin for NetworkPlugin {
    fn name(&self) -> &'static str {
        "network"
    }

    fn version(&self) -> &'static str {
        "0.1"
    }

    /// Start the interface and CPU samplers
    async fn init(&mut self, ctx: PluginContext) -> Result<()> {
        let period = ctx.control.settings.load().stats_collection_period;

        let interface = SamplerLoopBuilder::new()
            .source(Box::new(InterfaceSource::new(SysfsInterfaceReader::with_root(
                &ctx.stats_paths.net_class,
                &ctx.interface,
            ))))
            .stats(ctx.control.stats.clone())
            .period(period)
            .health(ctx.health.clone())
            .build()?;
        let cpu = SamplerLoopBuilder::new()
            .source(Box::new(CpuSource::new(ProcStatReader::new(
                &ctx.stats_paths.proc_stat,
            ))))
            .stats(ctx.control.stats.clone())
            .period(period)
            .health(ctx.health.clone())
            .build()?;

        let handles = vec![
            tokio::spawn(interface.run(ctx.shutdown.subscribe())),
            tokio::spawn(cpu.run(ctx.shutdown.subscribe())),
        ];
        self.samplers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        *self
            .shutdown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ctx.shutdown.subscribe());

        info!(interface = %ctx.interface, "Network plugin initialized");
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn train(&self, input: &Path) -> Result<TrainingSummary> {
        let ctx = self.context()?;
        run_training(
            ctx.control.clone(),
            snapshot_path(input),
            ctx.threads,
            &ctx.shutdown,
        )
        .await
    }

    async fn live_train(&self, input: &Path) -> Result<TrainingSummary> {
        let ctx = self.context()?;
        let snapshot = snapshot_path(input);
        let shutdown = self.shutdown_receiver(ctx);
        Ok(run_live_training(ctx.control.clone(), &snapshot, shutdown).await)
    }

    async fn run_inference(&self) -> Result<()> {
        let ctx = self.context()?;
        InferenceController::new(
            ctx.control.clone(),
            ctx.applier.clone(),
            ctx.interface.clone(),
            self.counters.clone(),
        )
        .with_health(ctx.health.clone())
        .run(self.shutdown_receiver(ctx))
        .await;
        Ok(())
    }

    /// Wait for the samplers; the session has already signalled shutdown
    async fn shutdown(&self) -> Result<()> {
        let handles: Vec<_> = self
            .samplers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.await.context("Sampler task panicked")?;
        }
        debug!("Network plugin stopped");
        Ok(())
    }

    fn report(&self) -> PluginReport {
        let (entries, capacity, watermarks) = match &self.ctx {
            Some(ctx) => {
                let table = ctx.control.read_table();
                (table.len(), table.capacity(), ctx.control.stats.watermarks())
            }
            None => (0, 0, Default::default()),
        };
        PluginReport {
            name: self.name().to_string(),
            version: self.version().to_string(),
            entries,
            capacity,
            inference: Some(self.counters.report(watermarks)),
        }
    }
}

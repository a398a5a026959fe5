//! Tuning plugins
//!
//! A plugin owns one tuning domain. The session drives every registered
//! plugin through the same lifecycle: `init`, then one of `train`,
//! `live_train` or `run_inference`, then `shutdown`. Plugins are compiled in
//! and listed by [`PluginRegistry::builtin`].

mod network;

pub use network::NetworkPlugin;

use crate::apply::SettingsApplier;
use crate::control::{ControlContext, InferenceReport, TrainingSummary};
use crate::health::HealthRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Where statistics samplers read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsPaths {
    /// Directory holding one entry per interface, `/sys/class/net`
    pub net_class: PathBuf,
    pub proc_stat: PathBuf,
}

impl Default for StatsPaths {
    fn default() -> Self {
        Self {
            net_class: PathBuf::from("/sys/class/net"),
            proc_stat: PathBuf::from("/proc/stat"),
        }
    }
}

/// Everything a plugin needs from the session
#[derive(Clone)]
pub struct PluginContext {
    pub control: ControlContext,
    pub interface: String,
    pub applier: Arc<dyn SettingsApplier>,
    pub health: HealthRegistry,
    pub shutdown: broadcast::Sender<()>,
    /// Training workers
    pub threads: usize,
    pub stats_paths: StatsPaths,
}

/// Point-in-time state of one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginReport {
    pub name: String,
    pub version: String,
    pub entries: usize,
    pub capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<InferenceReport>,
}

#[async_trait]
pub trait TuningPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    async fn init(&mut self, ctx: PluginContext) -> Result<()>;

    /// Train offline, snapshotting next to `input`
    async fn train(&self, input: &Path) -> Result<TrainingSummary>;

    async fn live_train(&self, input: &Path) -> Result<TrainingSummary>;

    /// Run until shutdown
    async fn run_inference(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    fn report(&self) -> PluginReport;
}

/// Initialized plugins of a session
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn TuningPlugin>>,
}

impl PluginRegistry {
    /// Plugins compiled into the agent
    pub fn builtin() -> Vec<Box<dyn TuningPlugin>> {
        vec![Box::new(NetworkPlugin::new())]
    }

    /// Initialize every plugin with its own copy of `ctx`
    pub async fn initialize(
        plugins: Vec<Box<dyn TuningPlugin>>,
        ctx: PluginContext,
    ) -> Result<Self> {
        if plugins.is_empty() {
            anyhow::bail!("No plugins were registered");
        }

        let mut initialized: Vec<Arc<dyn TuningPlugin>> = Vec::with_capacity(plugins.len());
        for mut plugin in plugins {
            plugin
                .init(ctx.clone())
                .await
                .with_context(|| format!("Failed to initialize plugin {}", plugin.name()))?;
            info!(
                plugin = plugin.name(),
                version = plugin.version(),
                "Plugin registered"
            );
            initialized.push(Arc::from(plugin));
        }

        Ok(Self {
            plugins: initialized,
        })
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn train_all(&self, input: &Path) -> Result<TrainingSummary> {
        let mut summary = TrainingSummary::default();
        for plugin in &self.plugins {
            let result = plugin
                .train(input)
                .await
                .with_context(|| format!("Training failed in plugin {}", plugin.name()))?;
            summary = summary.merge(result);
        }
        Ok(summary)
    }

    pub async fn live_train_all(&self, input: &Path) -> Result<TrainingSummary> {
        let mut summary = TrainingSummary::default();
        for plugin in &self.plugins {
            let result = plugin
                .live_train(input)
                .await
                .with_context(|| format!("Live training failed in plugin {}", plugin.name()))?;
            summary = summary.merge(result);
        }
        Ok(summary)
    }

    /// One inference task per plugin; returns when all of them stop
    pub async fn run_inference_all(&self) -> Result<()> {
        let handles: Vec<_> = self
            .plugins
            .iter()
            .map(|plugin| {
                let plugin = Arc::clone(plugin);
                tokio::spawn(async move {
                    let name = plugin.name();
                    (name, plugin.run_inference().await)
                })
            })
            .collect();

        for handle in handles {
            let (name, result) = handle.await.context("Inference task panicked")?;
            result.with_context(|| format!("Inference failed in plugin {}", name))?;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.shutdown().await {
                warn!(plugin = plugin.name(), error = %e, "Plugin shutdown failed");
            }
        }
    }

    pub fn reports(&self) -> Vec<PluginReport> {
        self.plugins.iter().map(|p| p.report()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_plugin_refuses_work() {
        let plugin = NetworkPlugin::new();
        assert!(plugin.run_inference().await.is_err());
        assert!(plugin.train(Path::new("table.csv")).await.is_err());

        let report = plugin.report();
        assert_eq!(report.name, "network");
        assert_eq!(report.entries, 0);
    }

    #[test]
    fn test_builtin_plugins() {
        let plugins = PluginRegistry::builtin();
        let names: Vec<_> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["network"]);
    }

    #[test]
    fn test_report_serializes_without_inference() {
        let report = PluginReport {
            name: "network".to_string(),
            version: "0.1".to_string(),
            entries: 3,
            capacity: 10,
            inference: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"], 3);
        assert!(json.get("inference").is_none());
    }
}

//! Agent session
//!
//! A session owns everything one agent run needs: the validated settings
//! (swappable on reload), the profile table, the live statistics and the
//! initialized plugins. Outside events such as signals reach it only as
//! [`SessionCommand`] messages.

use crate::apply::{CommandApplier, SettingsApplier, SystemSettingsReader, UpgradeGuard};
use crate::config::{Settings, DEFAULT_SETTINGS_PATH};
use crate::control::{ControlContext, TrainingSummary};
use crate::engine::{shared, SharedTable, ValueTable};
use crate::health::{components, HealthRegistry};
use crate::models::Labels;
use crate::observability::StructuredLogger;
use crate::persistence::{load_table, snapshot_path};
use crate::plugin::{PluginContext, PluginRegistry, PluginReport, StatsPaths};
use crate::stats::SharedStats;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// Operational mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Training,
    LiveTraining,
    Inference,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Training => "training",
            Mode::LiveTraining => "live-training",
            Mode::Inference => "inference",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Mode::Training),
            "live-training" => Ok(Mode::LiveTraining),
            "inference" => Ok(Mode::Inference),
            other => Err(format!(
                "unknown mode {other:?}, expected training, live-training or inference"
            )),
        }
    }
}

/// Requests delivered to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Re-read the settings file and swap it in
    ReloadSettings,
    /// Log the plugin reports
    Report,
    Shutdown,
}

/// Startup parameters of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub csv_path: PathBuf,
    pub settings_path: PathBuf,
    pub interface: String,
    pub mode: Mode,
    /// Training workers
    pub threads: usize,
    /// Execute settings commands instead of logging them
    pub apply: bool,
    /// Refuse profiles that lower current system settings
    pub upgrade_only: bool,
    pub stats_paths: StatsPaths,
    pub proc_sys: PathBuf,
}

impl SessionConfig {
    pub fn new(csv_path: impl Into<PathBuf>, interface: impl Into<String>, mode: Mode) -> Self {
        Self {
            csv_path: csv_path.into(),
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            interface: interface.into(),
            mode,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            apply: false,
            upgrade_only: false,
            stats_paths: StatsPaths::default(),
            proc_sys: PathBuf::from("/proc/sys"),
        }
    }
}

/// Session state exposed to the report endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub mode: Mode,
    pub interface: String,
    pub labels: Labels,
    pub plugins: Vec<PluginReport>,
}

/// Cheap handle producing [`SessionReport`]s while the session runs
#[derive(Clone)]
pub struct ReportHandle {
    plugins: Arc<PluginRegistry>,
    settings: Arc<ArcSwap<Settings>>,
    mode: Mode,
    interface: String,
}

impl ReportHandle {
    pub fn report(&self) -> SessionReport {
        SessionReport {
            mode: self.mode,
            interface: self.interface.clone(),
            labels: self.settings.load().labels.clone(),
            plugins: self.plugins.reports(),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub mode: Mode,
    pub training: Option<TrainingSummary>,
    pub entries: usize,
    /// Rows in the final snapshot, when one was written
    pub snapshot_rows: Option<usize>,
}

pub struct Session {
    config: SessionConfig,
    settings: Arc<ArcSwap<Settings>>,
    control: ControlContext,
    plugins: Arc<PluginRegistry>,
    shutdown: broadcast::Sender<()>,
    commands: mpsc::Receiver<SessionCommand>,
    command_tx: mpsc::Sender<SessionCommand>,
    logger: StructuredLogger,
}

impl Session {
    /// Load settings and the profile table, then initialize the plugins.
    ///
    /// Failing to read either file is fatal.
    pub async fn open(config: SessionConfig, health: HealthRegistry) -> Result<Self> {
        let settings = Settings::load(&config.settings_path).with_context(|| {
            format!(
                "Failed to load settings from {}",
                config.settings_path.display()
            )
        })?;
        let table = load_table(&config.csv_path, settings.max_learning_values)
            .with_context(|| format!("Failed to load table from {}", config.csv_path.display()))?;

        Self::with_parts(config, settings, table, health).await
    }

    /// Build a session around already loaded settings and table
    pub async fn with_parts(
        config: SessionConfig,
        settings: Settings,
        table: ValueTable,
        health: HealthRegistry,
    ) -> Result<Self> {
        let logger = StructuredLogger::new(&config.interface);
        let settings = Arc::new(ArcSwap::from_pointee(settings));
        let control = ControlContext::new(
            shared(table),
            settings.clone(),
            Arc::new(SharedStats::new()),
            logger.clone(),
        );
        control.record_table_size(&control.read_table());
        health.set_healthy(components::TABLE).await;

        let (shutdown, _) = broadcast::channel(16);
        let plugin_ctx = PluginContext {
            control: control.clone(),
            interface: config.interface.clone(),
            applier: build_applier(&config).await,
            health,
            shutdown: shutdown.clone(),
            threads: config.threads,
            stats_paths: config.stats_paths.clone(),
        };
        let plugins = PluginRegistry::initialize(PluginRegistry::builtin(), plugin_ctx).await?;
        let (command_tx, commands) = mpsc::channel(16);

        Ok(Self {
            config,
            settings,
            control,
            plugins: Arc::new(plugins),
            shutdown,
            commands,
            command_tx,
            logger,
        })
    }

    /// Sender for commands to this session
    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.command_tx.clone()
    }

    pub fn report_handle(&self) -> ReportHandle {
        ReportHandle {
            plugins: self.plugins.clone(),
            settings: self.settings.clone(),
            mode: self.config.mode,
            interface: self.config.interface.clone(),
        }
    }

    pub fn table(&self) -> SharedTable {
        self.control.table.clone()
    }

    /// Settings currently in effect
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn entries(&self) -> usize {
        self.control.read_table().len()
    }

    /// Re-read the settings file; on failure the current settings stay
    pub fn reload_settings(&self) -> Result<()> {
        match Settings::load(&self.config.settings_path) {
            Ok(settings) => {
                self.settings.store(Arc::new(settings));
                self.logger
                    .log_reload(true, &self.config.settings_path.display().to_string());
                Ok(())
            }
            Err(e) => {
                self.logger.log_reload(false, &e.to_string());
                Err(e).context("Settings reload failed")
            }
        }
    }

    fn log_report(&self) {
        for report in self.plugins.reports() {
            info!(
                event = "plugin_report",
                plugin = %report.name,
                entries = report.entries,
                capacity = report.capacity,
                loops = report.inference.as_ref().map(|r| r.loops),
                matches = report.inference.as_ref().map(|r| r.matches),
                success_rate = report.inference.as_ref().map(|r| r.success_rate),
                "Plugin report"
            );
        }
    }

    /// Run the configured mode until it finishes or a shutdown command arrives.
    ///
    /// Training modes end with a final snapshot next to the input table.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let mode = self.config.mode;
        let csv_path = self.config.csv_path.clone();
        info!(mode = %mode, plugins = ?self.plugins.names(), "Session running");

        let plugins = self.plugins.clone();
        let work = async move {
            match mode {
                Mode::Training => plugins.train_all(&csv_path).await.map(Some),
                Mode::LiveTraining => plugins.live_train_all(&csv_path).await.map(Some),
                Mode::Inference => plugins.run_inference_all().await.map(|_| None),
            }
        };
        tokio::pin!(work);

        let mut stopping = false;
        let result = loop {
            let command = tokio::select! {
                // polled first so the loops subscribe before a shutdown goes out
                biased;
                result = &mut work => break result,
                command = self.commands.recv(), if !stopping => command,
            };
            match command {
                Some(SessionCommand::ReloadSettings) => {
                    // failure is logged and the old settings stay
                    self.reload_settings().ok();
                }
                Some(SessionCommand::Report) => self.log_report(),
                Some(SessionCommand::Shutdown) | None => {
                    info!("Stopping session");
                    stopping = true;
                    self.shutdown.send(()).ok();
                }
            }
        };

        // samplers outlive the work in training modes
        self.shutdown.send(()).ok();
        self.plugins.shutdown_all().await;
        self.log_report();
        let training = result?;

        let snapshot_rows = match mode {
            Mode::Inference => None,
            Mode::Training | Mode::LiveTraining => {
                let rows = self.control.read_table().snapshot();
                self.control
                    .write_snapshot(&snapshot_path(&self.config.csv_path), &rows)
            }
        };

        Ok(SessionSummary {
            mode,
            training,
            entries: self.entries(),
            snapshot_rows,
        })
    }
}

async fn build_applier(config: &SessionConfig) -> Arc<dyn SettingsApplier> {
    let applier = CommandApplier::new(!config.apply);
    if config.upgrade_only {
        let reader = SystemSettingsReader::new(&config.proc_sys);
        Arc::new(applier.with_guard(UpgradeGuard::from_system(&reader).await))
    } else {
        Arc::new(applier)
    }
}

/// Forward process signals to a session.
///
/// SIGHUP reloads settings, SIGUSR1 requests a report, SIGINT and SIGTERM
/// shut the session down.
#[cfg(unix)]
pub fn spawn_signal_bridge(
    commands: mpsc::Sender<SessionCommand>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = hangup.recv() => SessionCommand::ReloadSettings,
                _ = user1.recv() => SessionCommand::Report,
                _ = interrupt.recv() => SessionCommand::Shutdown,
                _ = terminate.recv() => SessionCommand::Shutdown,
            };
            info!(command = ?command, "Signal received");

            let last = command == SessionCommand::Shutdown;
            if commands.send(command).await.is_err() || last {
                break;
            }
        }
    }))
}

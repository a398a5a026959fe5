//! Tuner Agent - adaptive network stack tuning
//!
//! Runs one session in training, live-training or inference mode against
//! one network interface, serving health and metrics over HTTP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tuner::{api, config::AgentConfig};
use tuner_lib::{
    health::HealthRegistry,
    observability::{StructuredLogger, TunerMetrics},
    session::{Mode, Session, SessionConfig},
    DEFAULT_SETTINGS_PATH,
};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "tuner-agent", version, about = "Adaptive network stack tuning agent")]
struct Args {
    /// Profile table (CSV)
    #[arg(short = 'f', long = "csvfile")]
    csvfile: PathBuf,

    /// Network interface to sample and tune
    #[arg(short, long)]
    interface: String,

    /// training, live-training or inference
    #[arg(short, long)]
    mode: Mode,

    /// Settings document (JSON)
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Training worker threads (default: available cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Execute sysctl/ethtool commands instead of logging them
    #[arg(long)]
    apply: bool,

    /// Never lower ring sizes or core queue limits below current values
    #[arg(long)]
    upgrade_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = AgentConfig::load()?;
    info!(node_name = %config.node_name, interface = %args.interface, "Starting tuner-agent");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    let metrics = TunerMetrics::new();
    let logger = StructuredLogger::new(&args.interface);

    let mut session_config = SessionConfig::new(&args.csvfile, &args.interface, args.mode);
    session_config.settings_path = args.settings;
    session_config.apply = args.apply;
    session_config.upgrade_only = args.upgrade_only;
    if let Some(threads) = args.threads {
        session_config.threads = threads.max(1);
    }

    let session = match Session::open(session_config, health_registry.clone()).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to open session");
            return Err(e);
        }
    };

    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics).with_reports(session.report_handle()),
    );
    health_registry.set_ready(true).await;

    tokio::spawn(async move {
        if let Err(e) = api::serve(config.api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    #[cfg(unix)]
    let _signals = tuner_lib::session::spawn_signal_bridge(session.commands())?;

    logger.log_startup(AGENT_VERSION, args.mode.as_str(), session.entries());

    let summary = session.run().await;
    health_registry.set_ready(false).await;

    match summary {
        Ok(summary) => {
            info!(
                mode = %summary.mode,
                entries = summary.entries,
                snapshot_rows = ?summary.snapshot_rows,
                training = ?summary.training,
                "Session finished"
            );
            logger.log_shutdown("session finished");
            Ok(())
        }
        Err(e) => {
            logger.log_shutdown(&format!("session failed: {e:#}"));
            Err(e)
        }
    }
}

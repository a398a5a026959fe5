//! Network Stack Tuner CLI
//!
//! Inspects profile tables offline, collects seed tables from the running
//! system and queries a running tuner agent.

mod client;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{agent, collect, table};
use std::path::PathBuf;
use std::time::Duration;
use tuner_lib::{
    stats::{DEFAULT_PROC_ROOT, DEFAULT_SYS_ROOT},
    LoadSample, DEFAULT_SETTINGS_PATH,
};

/// Network Stack Tuner CLI
#[derive(Parser)]
#[command(name = "tunerctl")]
#[command(author, version, about = "CLI for the Network Stack Tuner", long_about = None)]
pub struct Cli {
    /// Agent endpoint URL (can also be set via TUNERCTL_ENDPOINT env var)
    #[arg(long, env = "TUNERCTL_ENDPOINT", default_value = "http://localhost:8080")]
    pub endpoint: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a profile table file
    #[command(subcommand)]
    Table(TableCommands),

    /// Sample the system into table rows (CSV)
    Collect {
        /// Network interface to sample
        interface: String,

        /// Number of samples; runs until interrupted when omitted
        #[arg(long, short)]
        count: Option<u64>,

        /// Seconds between samples
        #[arg(long, default_value_t = 1.0)]
        interval: f64,

        /// Write rows to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Root of the sysfs tree
        #[arg(long, default_value = DEFAULT_SYS_ROOT)]
        sys_root: PathBuf,

        /// Root of the procfs tree
        #[arg(long, default_value = DEFAULT_PROC_ROOT)]
        proc_root: PathBuf,
    },

    /// Show the session report of a running agent
    Report,

    /// Show component health of a running agent
    Health,
}

#[derive(Subcommand)]
pub enum TableCommands {
    /// Print the profiles of a table
    Show {
        /// Table file (CSV)
        csv: PathBuf,

        /// Print at most this many rows
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Match an operating point against a table
    Lookup {
        /// Table file (CSV)
        csv: PathBuf,

        /// Settings document (JSON)
        #[arg(long, short, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,

        /// Transfer rate in bytes/s
        #[arg(long)]
        rate: u64,

        /// Dropped packets/s
        #[arg(long, default_value_t = 0)]
        drop: u64,

        /// Errors/s
        #[arg(long, default_value_t = 0)]
        errors: u64,

        /// FIFO errors/s
        #[arg(long, default_value_t = 0)]
        fifo: u64,

        /// Interface used when rendering commands
        #[arg(long, short, default_value = "eth0")]
        interface: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Table(table_cmd) => match table_cmd {
            TableCommands::Show { csv, limit } => {
                table::show_table(&csv, limit, cli.format)?;
            }
            TableCommands::Lookup {
                csv,
                settings,
                rate,
                drop,
                errors,
                fifo,
                interface,
            } => {
                let sample = LoadSample {
                    transfer_rate: rate,
                    drop_rate: drop,
                    errors_rate: errors,
                    fifo_errors_rate: fifo,
                    cpu_usage_percentage: 0.0,
                };
                let result = table::lookup(&csv, &settings, sample, &interface)?;
                table::print_lookup(&result, cli.format)?;
            }
        },
        Commands::Collect {
            interface,
            count,
            interval,
            output,
            sys_root,
            proc_root,
        } => {
            let interval = Duration::try_from_secs_f64(interval)
                .ok()
                .filter(|d| !d.is_zero())
                .with_context(|| format!("Invalid interval: {interval}"))?;
            collect::collect(collect::CollectOptions {
                interface,
                interval,
                count,
                output,
                sys_root,
                proc_root,
            })
            .await?;
        }
        Commands::Report => {
            let client = client::ApiClient::new(&cli.endpoint)?;
            agent::show_report(&client, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.endpoint)?;
            agent::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}

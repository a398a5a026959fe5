//! Offline profile table commands

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use tuner_lib::{
    apply::render_commands,
    control::SearchParams,
    persistence::{load_table, read_profiles},
    LoadSample, Settings, TunerMetrics, TuningProfile,
};

use crate::output::{
    format_rate, print_info, print_json, print_success, print_table, print_warning, OutputFormat,
};

/// Row for the profile table
#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Transfer rate")]
    transfer_rate: String,
    #[tabled(rename = "Drop")]
    drop_rate: u64,
    #[tabled(rename = "Errors")]
    errors_rate: u64,
    #[tabled(rename = "FIFO")]
    fifo_errors_rate: u64,
    #[tabled(rename = "RX ring")]
    rx_ring_size: u16,
    #[tabled(rename = "TX ring")]
    tx_ring_size: u16,
    #[tabled(rename = "somaxconn")]
    somaxconn: u32,
    #[tabled(rename = "Backlog")]
    netdev_max_backlog: u32,
    #[tabled(rename = "Budget")]
    netdev_budget: u32,
}

impl ProfileRow {
    fn new(index: usize, p: &TuningProfile) -> Self {
        Self {
            index,
            transfer_rate: format_rate(p.transfer_rate),
            drop_rate: p.drop_rate,
            errors_rate: p.errors_rate,
            fifo_errors_rate: p.fifo_errors_rate,
            rx_ring_size: p.rx_ring_size,
            tx_ring_size: p.tx_ring_size,
            somaxconn: p.net_core_somaxconn,
            netdev_max_backlog: p.net_core_netdev_max_backlog,
            netdev_budget: p.net_core_netdev_budget,
        }
    }
}

/// Print the rows of a table file in file order
pub fn show_table(csv: &Path, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let profiles = read_profiles(csv)
        .with_context(|| format!("Failed to read {}", csv.display()))?;
    let shown = limit.unwrap_or(profiles.len()).min(profiles.len());

    match format {
        OutputFormat::Json => print_json(&profiles[..shown])?,
        OutputFormat::Table => {
            let rows = profiles[..shown]
                .iter()
                .enumerate()
                .map(|(i, p)| ProfileRow::new(i, p))
                .collect();
            print_table::<ProfileRow>(rows);

            let min = profiles.iter().map(|p| p.transfer_rate).min();
            let max = profiles.iter().map(|p| p.transfer_rate).max();
            if let (Some(min), Some(max)) = (min, max) {
                print_info(&format!(
                    "{} of {} profiles, transfer rate {} .. {}",
                    shown,
                    profiles.len(),
                    format_rate(min),
                    format_rate(max)
                ));
            }
        }
    }
    Ok(())
}

/// Result of matching one operating point against a table
#[derive(Debug, Serialize)]
pub struct LookupResult {
    pub score: f64,
    pub epsilon: f64,
    pub tolerance: f64,
    pub matched: Option<usize>,
    /// Last entry visited by the search
    pub closest: Option<usize>,
    pub profile: Option<TuningProfile>,
    /// Commands the agent would run for the match
    pub commands: Vec<String>,
}

/// Match `sample` the way the agent's inference loop does
pub fn lookup(
    csv: &Path,
    settings_path: &Path,
    sample: LoadSample,
    interface: &str,
) -> Result<LookupResult> {
    let settings = Settings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let table =
        load_table(csv, 0).with_context(|| format!("Failed to read {}", csv.display()))?;

    let params = SearchParams::for_sample(&sample, &settings);
    let outcome = params.search(&table, &settings.weights, &TunerMetrics::new());
    let profile = outcome.found().and_then(|i| table.get(i)).cloned();
    let commands = profile
        .as_ref()
        .map(|p| {
            render_commands(interface, p)
                .iter()
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(LookupResult {
        score: params.score,
        epsilon: params.epsilon,
        tolerance: params.tolerance,
        matched: outcome.found(),
        closest: outcome.closest,
        profile,
        commands,
    })
}

pub fn print_lookup(result: &LookupResult, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(result);
    }

    println!("{}", "Lookup".bold());
    println!("{}", "=".repeat(50));
    println!("Score:        {:.2}", result.score);
    println!("Epsilon:      {}", result.epsilon);
    println!("Tolerance:    {:.2}", result.tolerance);
    println!();

    match (&result.profile, result.matched) {
        (Some(profile), Some(index)) => {
            print_success(&format!(
                "Matched entry {} at {}",
                index,
                format_rate(profile.transfer_rate)
            ));
            print_table(vec![ProfileRow::new(index, profile)]);
            println!();
            println!("{}", "Commands".bold());
            for command in &result.commands {
                println!("  {}", command.cyan());
            }
        }
        _ => match result.closest {
            Some(index) => print_warning(&format!(
                "No entry within tolerance, closest visited entry is {}",
                index
            )),
            None => print_warning("No entry within tolerance, table is empty"),
        },
    }
    Ok(())
}

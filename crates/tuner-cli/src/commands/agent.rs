//! Commands talking to a running agent

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, color_success_rate, format_optional_rate, print_json, print_table,
    OutputFormat,
};

/// Row for the plugin table
#[derive(Tabled)]
struct PluginRow {
    #[tabled(rename = "Plugin")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Entries")]
    entries: String,
    #[tabled(rename = "Searches")]
    loops: String,
    #[tabled(rename = "Matches")]
    matches: String,
    #[tabled(rename = "Success")]
    success_rate: String,
    #[tabled(rename = "Min rate")]
    min_rate: String,
    #[tabled(rename = "Max rate")]
    max_rate: String,
}

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show the agent's session report
pub async fn show_report(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.report().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Session Report".bold());
            println!("{}", "=".repeat(50));
            println!("Mode:         {}", report.mode.to_string().cyan());
            println!("Interface:    {}", report.interface.cyan());
            if let Some(goal) = report.labels.optimize_for {
                println!("Optimize for: {:?}", goal);
            }
            println!();

            let rows = report
                .plugins
                .iter()
                .map(|p| {
                    let inference = p.inference.as_ref();
                    PluginRow {
                        name: p.name.clone(),
                        version: p.version.clone(),
                        entries: format!("{}/{}", p.entries, p.capacity),
                        loops: inference.map_or("-".into(), |r| r.loops.to_string()),
                        matches: inference.map_or("-".into(), |r| r.matches.to_string()),
                        success_rate: inference
                            .map_or("-".into(), |r| color_success_rate(r.success_rate)),
                        min_rate: format_optional_rate(inference.and_then(|r| r.min_transfer_rate)),
                        max_rate: format_optional_rate(inference.and_then(|r| r.max_transfer_rate)),
                    }
                })
                .collect();
            print_table::<PluginRow>(rows);
        }
    }
    Ok(())
}

/// Show component health of the agent
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            let overall = serde_json::to_value(health.status)?;
            let overall = overall.as_str().unwrap_or("unknown");
            println!("{} {}", "Agent:".bold(), color_status(overall));

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| {
                    let status = serde_json::to_value(component.status)
                        .ok()
                        .and_then(|v| v.as_str().map(String::from))
                        .unwrap_or_default();
                    ComponentRow {
                        name: name.clone(),
                        status: color_status(&status),
                        message: component.message.clone().unwrap_or_default(),
                    }
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(rows);
        }
    }
    Ok(())
}

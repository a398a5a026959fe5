//! Seed table collection from the running system

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tuner_lib::{
    persistence::{format_row, header_line},
    stats::{EthtoolReader, ProfileCollector},
};

/// Options of `tunerctl collect`
pub struct CollectOptions {
    pub interface: String,
    pub interval: Duration,
    /// Samples to take; `None` runs until interrupted
    pub count: Option<u64>,
    pub output: Option<PathBuf>,
    pub sys_root: PathBuf,
    pub proc_root: PathBuf,
}

/// Rows written and samples skipped for lack of traffic
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub rows: u64,
    pub idle: u64,
}

/// Write a header and one row per sample with traffic to `out`
pub async fn collect_rows<W: Write>(
    collector: &mut ProfileCollector,
    interval: Duration,
    count: Option<u64>,
    out: &mut W,
) -> Result<CollectSummary> {
    writeln!(out, "{}", header_line())?;
    out.flush()?;
    collector
        .prime()
        .await
        .context("Failed to take the first reading")?;

    let mut summary = CollectSummary::default();
    let mut remaining = count;
    while remaining != Some(0) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let profile = collector.sample(interval).await?;
        if profile.transfer_rate == 0 {
            summary.idle += 1;
        } else {
            writeln!(out, "{}", format_row(&profile))?;
            out.flush()?;
            summary.rows += 1;
        }
        remaining = remaining.map(|n| n - 1);
    }
    Ok(summary)
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create {}", path.display())
        })?)),
        None => Box::new(io::stdout().lock()),
    })
}

/// Run `tunerctl collect`
pub async fn collect(options: CollectOptions) -> Result<()> {
    let mut collector = ProfileCollector::with_roots(
        &options.sys_root,
        &options.proc_root,
        &options.interface,
        Box::new(EthtoolReader),
    );
    let mut out = open_output(options.output.as_deref())?;

    let summary = collect_rows(&mut collector, options.interval, options.count, &mut out)
        .await
        .with_context(|| format!("Failed to collect statistics for {}", options.interface))?;

    eprintln!(
        "Collected {} rows from {} ({} samples without traffic skipped)",
        summary.rows, options.interface, summary.idle
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tree(root: &Path, rx_bytes: u64) {
        let stats = root.join("sys/class/net/eth0/statistics");
        std::fs::create_dir_all(&stats).unwrap();
        for name in [
            "tx_bytes",
            "rx_errors",
            "tx_errors",
            "rx_dropped",
            "tx_dropped",
            "rx_fifo_errors",
            "tx_fifo_errors",
        ] {
            std::fs::write(stats.join(name), "0\n").unwrap();
        }
        std::fs::write(stats.join("rx_bytes"), format!("{rx_bytes}\n")).unwrap();

        std::fs::create_dir_all(root.join("proc")).unwrap();
        std::fs::write(root.join("proc/stat"), "cpu  1 0 1 8 0 0 0 0\ncpu0 1 0 1 8\n").unwrap();
    }

    #[tokio::test]
    async fn test_idle_samples_are_not_written() {
        let temp_dir = TempDir::new().unwrap();
        write_tree(temp_dir.path(), 1_000);
        let mut collector = ProfileCollector::with_roots(
            temp_dir.path().join("sys"),
            temp_dir.path().join("proc"),
            "eth0",
            Box::new(EthtoolReader),
        );

        let mut out = Vec::new();
        let summary = collect_rows(&mut collector, Duration::from_millis(5), Some(3), &mut out)
            .await
            .unwrap();

        assert_eq!(summary, CollectSummary { rows: 0, idle: 3 });
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", header_line()));
    }

    #[tokio::test]
    async fn test_missing_interface_fails_before_sampling() {
        let temp_dir = TempDir::new().unwrap();
        write_tree(temp_dir.path(), 0);
        let mut collector = ProfileCollector::with_roots(
            temp_dir.path().join("sys"),
            temp_dir.path().join("proc"),
            "eth7",
            Box::new(EthtoolReader),
        );

        let mut out = Vec::new();
        let err = collect_rows(&mut collector, Duration::from_millis(5), Some(1), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("first reading"));
    }
}

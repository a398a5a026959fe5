//! Network interface counters from sysfs
//!
//! Reads `/sys/class/net/<iface>/statistics/{rx,tx}_{bytes,errors,dropped,fifo_errors}`
//! and sums the receive and transmit sides.

use super::{per_second, SharedStats, StatsError, StatsSource};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_SYSFS_NET: &str = "/sys/class/net";

/// Cumulative rx+tx counters of one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceTotals {
    pub bytes: u64,
    pub errors: u64,
    pub dropped: u64,
    pub fifo_errors: u64,
}

/// Per-second rates between two readings; counter resets yield zero
pub fn counter_rates(
    previous: &InterfaceTotals,
    current: &InterfaceTotals,
    elapsed: Duration,
) -> InterfaceTotals {
    InterfaceTotals {
        bytes: per_second(current.bytes.saturating_sub(previous.bytes), elapsed),
        errors: per_second(current.errors.saturating_sub(previous.errors), elapsed),
        dropped: per_second(current.dropped.saturating_sub(previous.dropped), elapsed),
        fifo_errors: per_second(
            current.fifo_errors.saturating_sub(previous.fifo_errors),
            elapsed,
        ),
    }
}

/// Reader for one interface's sysfs statistics
#[derive(Debug, Clone)]
pub struct SysfsInterfaceReader {
    statistics_dir: PathBuf,
}

impl SysfsInterfaceReader {
    pub fn new(interface: &str) -> Self {
        Self::with_root(DEFAULT_SYSFS_NET, interface)
    }

    /// Create a reader rooted somewhere other than `/sys/class/net` (for testing)
    pub fn with_root(root: impl AsRef<Path>, interface: &str) -> Self {
        Self {
            statistics_dir: root.as_ref().join(interface).join("statistics"),
        }
    }

    async fn read_counter(&self, name: &str) -> Result<u64, StatsError> {
        let path = self.statistics_dir.join(name);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|source| StatsError::Unavailable {
                path: path.clone(),
                source,
            })?;
        content.trim().parse().map_err(|_| StatsError::Parse {
            path,
            value: content.trim().to_string(),
        })
    }

    async fn read_pair(&self, counter: &str) -> Result<u64, StatsError> {
        let rx = self.read_counter(&format!("rx_{counter}")).await?;
        let tx = self.read_counter(&format!("tx_{counter}")).await?;
        Ok(rx.saturating_add(tx))
    }

    pub async fn read(&self) -> Result<InterfaceTotals, StatsError> {
        Ok(InterfaceTotals {
            bytes: self.read_pair("bytes").await?,
            errors: self.read_pair("errors").await?,
            dropped: self.read_pair("dropped").await?,
            fifo_errors: self.read_pair("fifo_errors").await?,
        })
    }
}

/// Publishes interface rates computed between consecutive readings
pub struct InterfaceSource {
    reader: SysfsInterfaceReader,
    previous: Option<(InterfaceTotals, Instant)>,
}

impl InterfaceSource {
    pub fn new(reader: SysfsInterfaceReader) -> Self {
        Self {
            reader,
            previous: None,
        }
    }
}

#[async_trait]
impl StatsSource for InterfaceSource {
    fn name(&self) -> &'static str {
        "interface"
    }

    async fn sample(&mut self, stats: &SharedStats) -> Result<(), StatsError> {
        let current = self.reader.read().await?;
        let now = Instant::now();

        if let Some((previous, at)) = self.previous {
            let rates = counter_rates(&previous, &current, now.duration_since(at));
            stats.publish_rates(rates.bytes, rates.dropped, rates.errors, rates.fifo_errors);
            debug!(
                transfer_rate = rates.bytes,
                drop_rate = rates.dropped,
                errors_rate = rates.errors,
                fifo_errors_rate = rates.fifo_errors,
                "Interface rates updated"
            );
        }

        self.previous = Some((current, now));
        Ok(())
    }

    fn on_error(&mut self, stats: &SharedStats) {
        stats.clear_rates();
        self.previous = None;
    }
}

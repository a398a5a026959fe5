//! Live network and CPU statistics
//!
//! Samplers periodically read cumulative counters from the kernel and
//! publish per-second rates into [`SharedStats`]. Control loops read the
//! latest published values without locking; a reading is at most one
//! sampling period old.

mod collect;
mod cpu;
mod interface;
mod nic;
mod sampler;


pub use collect::{ProfileCollector, DEFAULT_PROC_ROOT, DEFAULT_SYS_ROOT};
pub use cpu::{
    busy_percentage, count_cpus, parse_proc_stat, CpuSource, CpuTimes, ProcStatReader,
};
pub use interface::{counter_rates, InterfaceSource, InterfaceTotals, SysfsInterfaceReader};
pub use nic::{
    parse_coalesce, parse_offloads, parse_ring_sizes, EthtoolReader, NicSettings,
    NicSettingsReader,
};
pub use sampler::{SamplerLoop, SamplerLoopBuilder};

use crate::models::LoadSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("cannot read {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unparsable counter in {}: {value:?}", path.display())]
    Parse { path: PathBuf, value: String },

    #[error("no aggregate cpu line in /proc/stat")]
    MissingCpuLine,

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },
}

/// A periodic source of statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Take one sample and publish what it yields into `stats`
    async fn sample(&mut self, stats: &SharedStats) -> Result<(), StatsError>;

    /// Called after a failed sample
    fn on_error(&mut self, stats: &SharedStats);
}

const UNSET: u64 = u64::MAX;

/// Latest rates published by the samplers
#[derive(Debug)]
pub struct SharedStats {
    transfer_rate: AtomicU64,
    drop_rate: AtomicU64,
    errors_rate: AtomicU64,
    fifo_errors_rate: AtomicU64,
    cpu_usage_bits: AtomicU64,
    min_transfer_rate: AtomicU64,
    max_transfer_rate: AtomicU64,
}

impl Default for SharedStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowest and highest non-zero transfer rates seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    pub min_transfer_rate: Option<u64>,
    pub max_transfer_rate: Option<u64>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self {
            transfer_rate: AtomicU64::new(0),
            drop_rate: AtomicU64::new(0),
            errors_rate: AtomicU64::new(0),
            fifo_errors_rate: AtomicU64::new(0),
            cpu_usage_bits: AtomicU64::new(0f64.to_bits()),
            min_transfer_rate: AtomicU64::new(UNSET),
            max_transfer_rate: AtomicU64::new(0),
        }
    }

    /// Publish interface rates (per second)
    pub fn publish_rates(&self, transfer: u64, drop: u64, errors: u64, fifo_errors: u64) {
        self.transfer_rate.store(transfer, Ordering::Relaxed);
        self.drop_rate.store(drop, Ordering::Relaxed);
        self.errors_rate.store(errors, Ordering::Relaxed);
        self.fifo_errors_rate.store(fifo_errors, Ordering::Relaxed);

        if transfer > 0 {
            self.min_transfer_rate.fetch_min(transfer, Ordering::Relaxed);
            self.max_transfer_rate.fetch_max(transfer, Ordering::Relaxed);
        }
    }

    /// Publish CPU busy percentage
    pub fn publish_cpu(&self, percentage: f64) {
        self.cpu_usage_bits
            .store(percentage.to_bits(), Ordering::Relaxed);
    }

    /// Zero the interface rates after a failed read
    pub fn clear_rates(&self) {
        self.publish_rates(0, 0, 0, 0);
    }

    /// Current readings
    pub fn sample(&self) -> LoadSample {
        LoadSample {
            transfer_rate: self.transfer_rate.load(Ordering::Relaxed),
            drop_rate: self.drop_rate.load(Ordering::Relaxed),
            errors_rate: self.errors_rate.load(Ordering::Relaxed),
            fifo_errors_rate: self.fifo_errors_rate.load(Ordering::Relaxed),
            cpu_usage_percentage: f64::from_bits(self.cpu_usage_bits.load(Ordering::Relaxed)),
        }
    }

    pub fn watermarks(&self) -> Watermarks {
        let min = self.min_transfer_rate.load(Ordering::Relaxed);
        let max = self.max_transfer_rate.load(Ordering::Relaxed);
        Watermarks {
            min_transfer_rate: (min != UNSET).then_some(min),
            max_transfer_rate: (max != 0).then_some(max),
        }
    }
}

/// Convert a counter delta over `elapsed` into a per-second rate
pub(crate) fn per_second(delta: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (delta as f64 / secs) as u64
}

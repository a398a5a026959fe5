//! Rows for a profile table sampled from the running system
//!
//! Each sample pairs the interface's load over the last interval with the
//! settings in force during it: ring sizes, coalescing and offloads from
//! the NIC, CPU count and busy share, frequency governor and every sysctl a
//! profile carries. Seed tables for training are built from such rows.

use super::nic::NicSettingsReader;
use super::{
    busy_percentage, counter_rates, CpuTimes, InterfaceTotals, ProcStatReader, StatsError,
    SysfsInterfaceReader,
};
use crate::apply::SystemSettingsReader;
use crate::models::{governor_code, TuningProfile};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

pub const DEFAULT_SYS_ROOT: &str = "/sys";
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Samples complete profiles for one interface
pub struct ProfileCollector {
    interface: String,
    counters: SysfsInterfaceReader,
    cpu: ProcStatReader,
    system: SystemSettingsReader,
    cpufreq_dir: PathBuf,
    nic: Box<dyn NicSettingsReader>,
    previous: Option<(InterfaceTotals, CpuTimes)>,
}

impl ProfileCollector {
    /// Read from `sys_root` and `proc_root` instead of `/sys` and `/proc`
    pub fn with_roots(
        sys_root: impl AsRef<Path>,
        proc_root: impl AsRef<Path>,
        interface: &str,
        nic: Box<dyn NicSettingsReader>,
    ) -> Self {
        let sys_root = sys_root.as_ref();
        let proc_root = proc_root.as_ref();
        Self {
            interface: interface.to_string(),
            counters: SysfsInterfaceReader::with_root(sys_root.join("class/net"), interface),
            cpu: ProcStatReader::new(proc_root.join("stat")),
            system: SystemSettingsReader::new(proc_root.join("sys")),
            cpufreq_dir: sys_root.join("devices/system/cpu/cpu0/cpufreq"),
            nic,
            previous: None,
        }
    }

    /// Take the reference reading the first sample's rates are computed from
    pub async fn prime(&mut self) -> Result<(), StatsError> {
        let totals = self.counters.read().await?;
        let cpu = self.cpu.read().await?;
        self.previous = Some((totals, cpu));
        Ok(())
    }

    /// Sample a profile, with rates over `interval` since the previous call.
    ///
    /// Without a previous reading the load fields are zero. NIC settings
    /// and the CPU frequency are best effort and stay zero when unreadable.
    pub async fn sample(&mut self, interval: Duration) -> Result<TuningProfile, StatsError> {
        let totals = self.counters.read().await?;
        let (cpu, cpus) = self.cpu.read_with_cpus().await?;

        let mut profile = self.system.read_current().await;
        if let Some((prev_totals, prev_cpu)) = self.previous {
            let rates = counter_rates(&prev_totals, &totals, interval);
            profile.transfer_rate = rates.bytes;
            profile.drop_rate = rates.dropped;
            profile.errors_rate = rates.errors;
            profile.fifo_errors_rate = rates.fifo_errors;
            profile.cpu_usage_percentage = busy_percentage(&prev_cpu, &cpu);
        }
        self.previous = Some((totals, cpu));

        profile.cores = u16::try_from(cpus).unwrap_or(u16::MAX);
        if let Some(governor) = self.read_cpufreq("scaling_governor").await {
            profile.governor = governor_code(&governor);
        }
        if let Some(khz) = self.read_cpufreq("scaling_cur_freq").await {
            profile.cpu_speed = khz.trim().parse().unwrap_or(0);
        }

        match self.nic.read(&self.interface).await {
            Ok(nic) => {
                profile.rx_ring_size = nic.rx_ring_size;
                profile.tx_ring_size = nic.tx_ring_size;
                profile.rx_interrupt_coalesce_usecs = nic.rx_coalesce_usecs;
                profile.rx_interrupt_max_coalesce_frames = nic.rx_max_coalesce_frames;
                profile.tx_interrupt_coalesce_usecs = nic.tx_coalesce_usecs;
                profile.tx_interrupt_max_coalesce_frames = nic.tx_max_coalesce_frames;
                profile.offloads = nic.offloads;
            }
            Err(e) => debug!(interface = %self.interface, error = %e, "NIC settings unavailable"),
        }

        Ok(profile)
    }

    async fn read_cpufreq(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.cpufreq_dir.join(name)).await.ok()
    }
}

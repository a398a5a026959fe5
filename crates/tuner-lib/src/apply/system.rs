//! Current system settings and the upgrade-only guard

use crate::models::TuningProfile;
use crate::stats::StatsError;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tokio::fs;
use tracing::{debug, info};

/// Reads sysctl values from `/proc/sys`
#[derive(Debug, Clone)]
pub struct SystemSettingsReader {
    root: PathBuf,
}

impl Default for SystemSettingsReader {
    fn default() -> Self {
        Self::new("/proc/sys")
    }
}

impl SystemSettingsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whitespace separated values of a dotted sysctl key
    pub async fn read_values(&self, key: &str) -> Result<Vec<u64>, StatsError> {
        let path = key.split('.').fold(self.root.clone(), |p, part| p.join(part));
        let content = fs::read_to_string(&path)
            .await
            .map_err(|source| StatsError::Unavailable {
                path: path.clone(),
                source,
            })?;

        content
            .split_whitespace()
            .map(|v| {
                v.parse::<u64>().map_err(|_| StatsError::Parse {
                    path: path.clone(),
                    value: v.to_string(),
                })
            })
            .collect()
    }

    async fn read_one(&self, key: &str) -> Option<u64> {
        match self.read_values(key).await {
            Ok(values) => values.first().copied(),
            Err(e) => {
                debug!(key = key, error = %e, "System setting unavailable");
                None
            }
        }
    }

    async fn read_triple(&self, key: &str) -> Option<[u64; 3]> {
        let values = self.read_values(key).await.ok()?;
        values.try_into().ok()
    }

    /// Current values of every sysctl a profile carries.
    ///
    /// Ring sizes are not exposed under `/proc/sys` and stay zero, as does
    /// anything that cannot be read (containers hide most of `net.*`).
    pub async fn read_current(&self) -> TuningProfile {
        let mut current = TuningProfile {
            kernel_sched_min_granularity_ns: u32_value(
                self.read_one("kernel.sched_min_granularity_ns").await,
            ),
            kernel_sched_wakeup_granularity_ns: u32_value(
                self.read_one("kernel.sched_wakeup_granularity_ns").await,
            ),
            kernel_sched_migration_cost_ns: u32_value(
                self.read_one("kernel.sched_migration_cost_ns").await,
            ),
            kernel_numa_balancing: u16_value(self.read_one("kernel.numa_balancing").await),
            kernel_pid_max: u32_value(self.read_one("kernel.pid_max").await),
            net_core_netdev_max_backlog: u32_value(
                self.read_one("net.core.netdev_max_backlog").await,
            ),
            net_core_netdev_budget: u32_value(self.read_one("net.core.netdev_budget").await),
            net_core_somaxconn: u32_value(self.read_one("net.core.somaxconn").await),
            net_core_busy_poll: u16_value(self.read_one("net.core.busy_poll").await),
            net_core_busy_read: u16_value(self.read_one("net.core.busy_read").await),
            net_core_rmem_max: self.read_one("net.core.rmem_max").await.unwrap_or(0),
            net_core_rmem_default: self.read_one("net.core.rmem_default").await.unwrap_or(0),
            net_core_wmem_max: self.read_one("net.core.wmem_max").await.unwrap_or(0),
            net_core_wmem_default: self.read_one("net.core.wmem_default").await.unwrap_or(0),
            tcp_fastopen: u16_value(self.read_one("net.ipv4.tcp_fastopen").await),
            tcp_low_latency: u16_value(self.read_one("net.ipv4.tcp_low_latency").await),
            tcp_sack: u16_value(self.read_one("net.ipv4.tcp_sack").await),
            tcp_max_syn_backlog: u32_value(self.read_one("net.ipv4.tcp_max_syn_backlog").await),
            tcp_tw_reuse: u16_value(self.read_one("net.ipv4.tcp_tw_reuse").await),
            tcp_timestamps: u16_value(self.read_one("net.ipv4.tcp_timestamps").await),
            tcp_syn_retries: u32_value(self.read_one("net.ipv4.tcp_syn_retries").await),
            ..Default::default()
        };
        if let Some(rmem) = self.read_triple("net.ipv4.tcp_rmem").await {
            current.tcp_rmem = rmem;
        }
        if let Some(wmem) = self.read_triple("net.ipv4.tcp_wmem").await {
            current.tcp_wmem = wmem;
        }

        info!(
            somaxconn = current.net_core_somaxconn,
            netdev_budget = current.net_core_netdev_budget,
            netdev_max_backlog = current.net_core_netdev_max_backlog,
            "Read current system settings"
        );
        current
    }
}

fn u32_value(value: Option<u64>) -> u32 {
    value.map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX))
}

fn u16_value(value: Option<u64>) -> u16 {
    value.map_or(0, |v| u16::try_from(v).unwrap_or(u16::MAX))
}

/// Refuses profiles that would lower ring sizes or core queue limits.
///
/// The baseline starts at the system's values and follows every accepted
/// profile.
#[derive(Debug)]
pub struct UpgradeGuard {
    baseline: Mutex<TuningProfile>,
}

impl UpgradeGuard {
    pub fn new(baseline: TuningProfile) -> Self {
        Self {
            baseline: Mutex::new(baseline),
        }
    }

    pub async fn from_system(reader: &SystemSettingsReader) -> Self {
        Self::new(reader.read_current().await)
    }

    /// `Err` names the first setting the profile would lower
    pub fn check(&self, profile: &TuningProfile) -> Result<(), String> {
        let baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        let checks: [(&str, u64, u64); 5] = [
            (
                "rx_ring_size",
                baseline.rx_ring_size.into(),
                profile.rx_ring_size.into(),
            ),
            (
                "tx_ring_size",
                baseline.tx_ring_size.into(),
                profile.tx_ring_size.into(),
            ),
            (
                "net.core.somaxconn",
                baseline.net_core_somaxconn.into(),
                profile.net_core_somaxconn.into(),
            ),
            (
                "net.core.netdev_budget",
                baseline.net_core_netdev_budget.into(),
                profile.net_core_netdev_budget.into(),
            ),
            (
                "net.core.netdev_max_backlog",
                baseline.net_core_netdev_max_backlog.into(),
                profile.net_core_netdev_max_backlog.into(),
            ),
        ];

        match checks.iter().find(|(_, current, proposed)| current > proposed) {
            Some((name, current, proposed)) => Err(format!(
                "{name} is {current}, profile would set {proposed}"
            )),
            None => Ok(()),
        }
    }

    /// Make `profile` the new baseline
    pub fn accept(&self, profile: &TuningProfile) {
        *self.baseline.lock().unwrap_or_else(PoisonError::into_inner) = profile.clone();
    }
}

//! Core data models for the tuning agent

use serde::{Deserialize, Serialize};

/// Number of values in one persisted profile row
pub const PROFILE_FIELD_COUNT: usize = 53;

/// One row of kernel and NIC tuning parameters, keyed by transfer rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningProfile {
    /// Sort and uniqueness key (bytes/s)
    pub transfer_rate: u64,
    pub drop_rate: u64,
    pub errors_rate: u64,
    pub fifo_errors_rate: u64,
    pub cpu_usage_percentage: f64,

    pub rx_ring_size: u16,
    pub tx_ring_size: u16,

    pub cores: u16,
    pub governor: u16,
    pub cpu_speed: u32,
    pub io_scheduler: u16,
    pub task_scheduler: u16,

    pub kernel_sched_min_granularity_ns: u32,
    pub kernel_sched_wakeup_granularity_ns: u32,
    pub kernel_sched_migration_cost_ns: u32,
    pub kernel_numa_balancing: u16,
    pub kernel_pid_max: u32,

    pub net_core_netdev_max_backlog: u32,
    pub net_core_netdev_budget: u32,
    pub net_core_somaxconn: u32,
    pub net_core_busy_poll: u16,
    pub net_core_busy_read: u16,
    pub net_core_rmem_max: u64,
    pub net_core_wmem_max: u64,
    pub net_core_rmem_default: u64,
    pub net_core_wmem_default: u64,

    pub tcp_fastopen: u16,
    pub tcp_low_latency: u16,
    pub tcp_sack: u16,
    pub tcp_rmem: [u64; 3],
    pub tcp_wmem: [u64; 3],
    pub tcp_max_syn_backlog: u32,
    pub tcp_tw_reuse: u16,
    pub tcp_tw_recycle: u16,
    pub tcp_timestamps: u16,
    pub tcp_syn_retries: u32,

    pub rx_interrupt_coalesce_usecs: u16,
    pub rx_interrupt_max_coalesce_frames: u16,
    pub tx_interrupt_coalesce_usecs: u16,
    pub tx_interrupt_max_coalesce_frames: u16,

    pub offloads: Offloads,
}

/// NIC offload switches, in `ethtool -K` order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offloads {
    pub rx_checksum: bool,
    pub tx_checksum: bool,
    pub generic_segmentation: bool,
    pub tcp_segmentation: bool,
    pub generic_receive: bool,
    pub large_receive: bool,
    pub rx_vlan: bool,
    pub tx_vlan: bool,
    pub rx_hash: bool,
}

impl Offloads {
    /// `ethtool -K` feature names paired with their current state
    pub fn features(&self) -> [(&'static str, bool); 9] {
        [
            ("rx", self.rx_checksum),
            ("tx", self.tx_checksum),
            ("gso", self.generic_segmentation),
            ("tso", self.tcp_segmentation),
            ("gro", self.generic_receive),
            ("lro", self.large_receive),
            ("rxvlan", self.rx_vlan),
            ("txvlan", self.tx_vlan),
            ("rxhash", self.rx_hash),
        ]
    }
}

/// Per-metric weights and bias used to fold four counters into one score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsReference {
    pub transfer_rate_weight: f64,
    pub drop_rate_weight: f64,
    pub errors_rate_weight: f64,
    pub fifo_errors_rate_weight: f64,
    #[serde(default)]
    pub bias: f64,
}

impl WeightsReference {
    pub fn sum(&self) -> f64 {
        self.transfer_rate_weight
            + self.drop_rate_weight
            + self.errors_rate_weight
            + self.fifo_errors_rate_weight
    }
}

impl Default for WeightsReference {
    fn default() -> Self {
        Self {
            transfer_rate_weight: 1.0,
            drop_rate_weight: 0.0,
            errors_rate_weight: 0.0,
            fifo_errors_rate_weight: 0.0,
            bias: 0.0,
        }
    }
}

/// The four live load counters a score is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub transfer_rate: u64,
    pub drop_rate: u64,
    pub errors_rate: u64,
    pub fifo_errors_rate: u64,
    pub cpu_usage_percentage: f64,
}

impl LoadSample {
    /// True when every network counter reads zero
    pub fn is_idle(&self) -> bool {
        self.transfer_rate == 0
            && self.drop_rate == 0
            && self.errors_rate == 0
            && self.fifo_errors_rate == 0
    }
}

/// Deployment region of a tuning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Geography {
    Emea,
    Na,
    Lat,
    Apac,
}

/// Business segment of a tuning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Business {
    Retail,
    Automotive,
    Service,
}

/// What a tuning run optimizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptimizationGoal {
    Throughput,
    Latency,
    Power,
}

/// Passthrough metadata attached to a run; never used for sorting or matching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<Geography>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<Business>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize_for: Option<OptimizationGoal>,
}

/// CPU frequency governors, numbered from 1 in the persisted table
pub const GOVERNORS: [&str; 6] = [
    "performance",
    "powersave",
    "userspace",
    "ondemand",
    "conservative",
    "schedutil",
];

/// Map a governor name to its persisted code (0 when unknown)
pub fn governor_code(name: &str) -> u16 {
    GOVERNORS
        .iter()
        .position(|g| *g == name.trim())
        .map(|i| i as u16 + 1)
        .unwrap_or(0)
}

/// Map a persisted governor code back to its name
pub fn governor_name(code: u16) -> Option<&'static str> {
    code.checked_sub(1)
        .and_then(|i| GOVERNORS.get(i as usize))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_codes_are_one_based() {
        assert_eq!(governor_code("performance"), 1);
        assert_eq!(governor_code("schedutil\n"), 6);
        assert_eq!(governor_code("turbo"), 0);
        assert_eq!(governor_name(4), Some("ondemand"));
        assert_eq!(governor_name(0), None);
    }

    #[test]
    fn test_load_sample_idle() {
        assert!(LoadSample::default().is_idle());
        let busy = LoadSample {
            fifo_errors_rate: 1,
            ..Default::default()
        };
        assert!(!busy.is_idle());
    }

    #[test]
    fn test_labels_deserialize_uppercase() {
        let labels: Labels =
            serde_json::from_str(r#"{"geography":"EMEA","optimize_for":"LATENCY"}"#).unwrap();
        assert_eq!(labels.geography, Some(Geography::Emea));
        assert_eq!(labels.business, None);
        assert_eq!(labels.optimize_for, Some(OptimizationGoal::Latency));
    }
}

//! Synthesis of new table entries from a reference profile
//!
//! A synthesized profile starts as a copy of the reference entry. Load
//! metrics come from live statistics when available; otherwise they, the
//! CPU speed and the kernel scheduler tunables are seeded from the
//! reference. Numeric sysctls are scaled by `1 ± epsilon` depending on
//! which side of the reference the new key falls. Seeded and scaled values
//! are then pulled back into line with the neighbor on the side the
//! insertion index moved toward; an insertion at the reference index is
//! left as is.

use std::cmp::Ordering;

use super::scoring::{tolerance, ApproxFunction};
use super::table::{Neighbors, TableError, ValueTable};
use crate::models::{LoadSample, TuningProfile};
use tracing::warn;

/// Which side of the reference the new key falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Below,
    Above,
}

/// A synthesized profile and the index it must be inserted at
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub pivot: usize,
    pub profile: TuningProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DropRate,
    ErrorsRate,
    FifoErrorsRate,
    CpuUsage,
    CpuSpeed,
    SchedMinGranularity,
    SchedWakeupGranularity,
    SchedMigrationCost,
    PidMax,
    RxRing,
    TxRing,
    NetdevMaxBacklog,
    NetdevBudget,
    Somaxconn,
    TcpMaxSynBacklog,
    RmemMax,
    WmemMax,
    RmemDefault,
    WmemDefault,
    TcpRmem(usize),
    TcpWmem(usize),
}

/// Replaced by live statistics in live mode
const LOAD_FIELDS: [Field; 4] = [
    Field::DropRate,
    Field::ErrorsRate,
    Field::FifoErrorsRate,
    Field::CpuUsage,
];

const SEEDED_FIELDS: [Field; 5] = [
    Field::CpuSpeed,
    Field::SchedMinGranularity,
    Field::SchedWakeupGranularity,
    Field::SchedMigrationCost,
    Field::PidMax,
];

const DERIVED_FIELDS: [Field; 16] = [
    Field::RxRing,
    Field::TxRing,
    Field::NetdevMaxBacklog,
    Field::NetdevBudget,
    Field::Somaxconn,
    Field::TcpMaxSynBacklog,
    Field::RmemMax,
    Field::WmemMax,
    Field::RmemDefault,
    Field::WmemDefault,
    Field::TcpRmem(0),
    Field::TcpRmem(1),
    Field::TcpRmem(2),
    Field::TcpWmem(0),
    Field::TcpWmem(1),
    Field::TcpWmem(2),
];

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::DropRate => "drop_rate",
            Field::ErrorsRate => "errors_rate",
            Field::FifoErrorsRate => "fifo_errors_rate",
            Field::CpuUsage => "cpu_usage_percentage",
            Field::CpuSpeed => "cpu_speed",
            Field::SchedMinGranularity => "kernel.sched_min_granularity_ns",
            Field::SchedWakeupGranularity => "kernel.sched_wakeup_granularity_ns",
            Field::SchedMigrationCost => "kernel.sched_migration_cost_ns",
            Field::PidMax => "kernel.pid_max",
            Field::RxRing => "rx_ring_size",
            Field::TxRing => "tx_ring_size",
            Field::NetdevMaxBacklog => "net.core.netdev_max_backlog",
            Field::NetdevBudget => "net.core.netdev_budget",
            Field::Somaxconn => "net.core.somaxconn",
            Field::TcpMaxSynBacklog => "tcp_max_syn_backlog",
            Field::RmemMax => "net.core.rmem_max",
            Field::WmemMax => "net.core.wmem_max",
            Field::RmemDefault => "net.core.rmem_default",
            Field::WmemDefault => "net.core.wmem_default",
            Field::TcpRmem(_) => "tcp_rmem",
            Field::TcpWmem(_) => "tcp_wmem",
        }
    }

    fn get(self, p: &TuningProfile) -> f64 {
        match self {
            Field::DropRate => p.drop_rate as f64,
            Field::ErrorsRate => p.errors_rate as f64,
            Field::FifoErrorsRate => p.fifo_errors_rate as f64,
            Field::CpuUsage => p.cpu_usage_percentage,
            Field::CpuSpeed => p.cpu_speed as f64,
            Field::SchedMinGranularity => p.kernel_sched_min_granularity_ns as f64,
            Field::SchedWakeupGranularity => p.kernel_sched_wakeup_granularity_ns as f64,
            Field::SchedMigrationCost => p.kernel_sched_migration_cost_ns as f64,
            Field::PidMax => p.kernel_pid_max as f64,
            Field::RxRing => p.rx_ring_size as f64,
            Field::TxRing => p.tx_ring_size as f64,
            Field::NetdevMaxBacklog => p.net_core_netdev_max_backlog as f64,
            Field::NetdevBudget => p.net_core_netdev_budget as f64,
            Field::Somaxconn => p.net_core_somaxconn as f64,
            Field::TcpMaxSynBacklog => p.tcp_max_syn_backlog as f64,
            Field::RmemMax => p.net_core_rmem_max as f64,
            Field::WmemMax => p.net_core_wmem_max as f64,
            Field::RmemDefault => p.net_core_rmem_default as f64,
            Field::WmemDefault => p.net_core_wmem_default as f64,
            Field::TcpRmem(i) => p.tcp_rmem[i] as f64,
            Field::TcpWmem(i) => p.tcp_wmem[i] as f64,
        }
    }

    /// Store `value` with a saturating conversion into the field's type
    fn set(self, p: &mut TuningProfile, value: f64) {
        match self {
            Field::DropRate => p.drop_rate = value as u64,
            Field::ErrorsRate => p.errors_rate = value as u64,
            Field::FifoErrorsRate => p.fifo_errors_rate = value as u64,
            Field::CpuUsage => p.cpu_usage_percentage = value.max(0.0),
            Field::CpuSpeed => p.cpu_speed = value as u32,
            Field::SchedMinGranularity => p.kernel_sched_min_granularity_ns = value as u32,
            Field::SchedWakeupGranularity => p.kernel_sched_wakeup_granularity_ns = value as u32,
            Field::SchedMigrationCost => p.kernel_sched_migration_cost_ns = value as u32,
            Field::PidMax => p.kernel_pid_max = value as u32,
            Field::RxRing => p.rx_ring_size = value as u16,
            Field::TxRing => p.tx_ring_size = value as u16,
            Field::NetdevMaxBacklog => p.net_core_netdev_max_backlog = value as u32,
            Field::NetdevBudget => p.net_core_netdev_budget = value as u32,
            Field::Somaxconn => p.net_core_somaxconn = value as u32,
            Field::TcpMaxSynBacklog => p.tcp_max_syn_backlog = value as u32,
            Field::RmemMax => p.net_core_rmem_max = value as u64,
            Field::WmemMax => p.net_core_wmem_max = value as u64,
            Field::RmemDefault => p.net_core_rmem_default = value as u64,
            Field::WmemDefault => p.net_core_wmem_default = value as u64,
            Field::TcpRmem(i) => p.tcp_rmem[i] = value as u64,
            Field::TcpWmem(i) => p.tcp_wmem[i] = value as u64,
        }
    }
}

/// Pulls seeded values back toward the neighbor on the moving side
struct Adjuster<'a> {
    neighbors: Neighbors<'a>,
    /// Insertion index compared to the reference index
    side: Ordering,
    epsilon: f64,
    approx: ApproxFunction,
}

impl Adjuster<'_> {
    fn tolerance(&self, value: f64) -> f64 {
        let tol = tolerance(value, self.epsilon, self.approx);
        if tol.is_finite() {
            tol
        } else {
            0.0
        }
    }

    fn adjust(&self, field: Field, value: f64) -> f64 {
        match self.side {
            Ordering::Less => match self.neighbors.left.map(|p| field.get(p)) {
                Some(left) if value < left => left + self.tolerance(left),
                _ => value,
            },
            Ordering::Greater => match self.neighbors.right.map(|p| field.get(p)) {
                Some(right) if value > right => right - self.tolerance(right),
                _ => value,
            },
            Ordering::Equal => value,
        }
    }
}

/// Scale a reference value by `1 - epsilon` below the reference, `1 + epsilon` otherwise
pub fn derive_value(value: f64, direction: Direction, epsilon: f64) -> f64 {
    match direction {
        Direction::Below => value - value * epsilon,
        Direction::Above => value + value * epsilon,
    }
}

fn clamp_to_u32(field: Field, value: f64) -> f64 {
    let clamped = value.clamp(0.0, u32::MAX as f64);
    if clamped != value {
        warn!(
            field = field.name(),
            value = value,
            clamped = clamped,
            "Derived value outside the 32-bit range, clamping"
        );
    }
    clamped
}

/// Build a profile for `new_key` from the entry at `reference_index`.
///
/// `live` carries the current load sample in live mode. The table is not
/// modified; the returned pivot is where the profile must be inserted.
pub fn synthesize_profile(
    table: &ValueTable,
    reference_index: usize,
    new_key: u64,
    epsilon: f64,
    approx: ApproxFunction,
    live: Option<&LoadSample>,
) -> Result<Synthesized, TableError> {
    let reference = table
        .get(reference_index)
        .ok_or(TableError::IndexOutOfRange {
            index: reference_index,
            len: table.len(),
        })?;
    let pivot = table.find_insertion_point(new_key)?;

    let direction = if new_key < reference.transfer_rate {
        Direction::Below
    } else {
        Direction::Above
    };
    let adjuster = Adjuster {
        neighbors: table.neighbors(pivot),
        side: pivot.cmp(&reference_index),
        epsilon,
        approx,
    };

    let mut profile = reference.clone();
    profile.transfer_rate = new_key;

    match live {
        Some(sample) => {
            profile.drop_rate = sample.drop_rate;
            profile.errors_rate = sample.errors_rate;
            profile.fifo_errors_rate = sample.fifo_errors_rate;
            profile.cpu_usage_percentage = sample.cpu_usage_percentage;
        }
        None => {
            for field in LOAD_FIELDS {
                let value = adjuster.adjust(field, field.get(reference));
                field.set(&mut profile, value);
            }
        }
    }

    for field in SEEDED_FIELDS {
        let value = adjuster.adjust(field, field.get(reference));
        field.set(&mut profile, value);
    }

    for field in DERIVED_FIELDS {
        let derived = derive_value(field.get(reference), direction, epsilon);
        let value = adjuster.adjust(field, clamp_to_u32(field, derived));
        field.set(&mut profile, value);
    }

    Ok(Synthesized { pivot, profile })
}

/// Synthesize a profile for `new_key` and insert it, returning its index
pub fn augment(
    table: &mut ValueTable,
    reference_index: usize,
    new_key: u64,
    epsilon: f64,
    approx: ApproxFunction,
    live: Option<&LoadSample>,
) -> Result<usize, TableError> {
    if table.is_full() {
        return Err(TableError::CapacityExhausted {
            capacity: table.capacity(),
        });
    }
    let Synthesized { pivot, profile } =
        synthesize_profile(table, reference_index, new_key, epsilon, approx, live)?;
    table.insert_at(pivot, profile)?;
    Ok(pivot)
}

//! Tabular persistence of the profile table
//!
//! The table is stored as comma-separated values with a fixed header of
//! 53 columns. Training snapshots are written next to the input file as
//! `<stem>_trained_data.csv`.

use crate::engine::{TableError, ValueTable};
use crate::models::{Offloads, TuningProfile, PROFILE_FIELD_COUNT};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Column names, in row order
pub const HEADER: [&str; PROFILE_FIELD_COUNT] = [
    "transfer_rate",
    "drop_rate",
    "errors_rate",
    "fifo_errors_rate",
    "cpu_usage_percentage",
    "rx_ring_size",
    "tx_ring_size",
    "cores",
    "governor",
    "cpu_freq",
    "io_scheduler",
    "task_scheduler",
    "kernel.sched_min_granularity_ns",
    "kernel.sched_wakeup_granularity_ns",
    "kernel.sched_migration_cost_ns",
    "kernel.numa_balancing",
    "kernel.pid_max",
    "net.core.netdev_max_backlog",
    "net.core.netdev_budget",
    "net.core.somaxconn",
    "net.core.busy_poll",
    "net.core.busy_read",
    "net.core.rmem_max",
    "net.core.wmem_max",
    "net.core.rmem_default",
    "net.core.wmem_default",
    "tcp_fastopen",
    "tcp_lowlatency",
    "tcp_sack",
    "tcp_rmem[0]",
    "tcp_rmem[1]",
    "tcp_rmem[2]",
    "tcp_wmem[0]",
    "tcp_wmem[1]",
    "tcp_wmem[2]",
    "tcp_max_syn_backlog",
    "tcp_tw_reuse",
    "tcp_tw_recycle",
    "tcp_timestamps",
    "tcp_syn_retries",
    "rx_interrupt_coalesce_usecs",
    "rx_interrupt_max_coalesce_frames",
    "tx_interrupt_coalesce_usecs",
    "tx_interrupt_max_coalesce_frames",
    "rx_checksum_offload",
    "tx_checksum_offload",
    "general_segmentation_offload",
    "tcp_segmentation_offload",
    "general_receive_offload",
    "large_receive_offload",
    "rx_vlan_offload",
    "tx_vlan_offload",
    "rx_hash",
];

const SNAPSHOT_SUFFIX: &str = "_trained_data.csv";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("line {line}: expected {expected} values, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid value {value:?} for {column}")]
    InvalidValue {
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Snapshot file for a given input table: `<dir>/<stem>_trained_data.csv`
pub fn snapshot_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{SNAPSHOT_SUFFIX}"))
}

pub fn header_line() -> String {
    HEADER.join(",")
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

/// Render one profile as a row, floats with six decimals and booleans as 0/1
pub fn format_row(p: &TuningProfile) -> String {
    let o = &p.offloads;
    [
        p.transfer_rate.to_string(),
        p.drop_rate.to_string(),
        p.errors_rate.to_string(),
        p.fifo_errors_rate.to_string(),
        format!("{:.6}", p.cpu_usage_percentage),
        p.rx_ring_size.to_string(),
        p.tx_ring_size.to_string(),
        p.cores.to_string(),
        p.governor.to_string(),
        p.cpu_speed.to_string(),
        p.io_scheduler.to_string(),
        p.task_scheduler.to_string(),
        p.kernel_sched_min_granularity_ns.to_string(),
        p.kernel_sched_wakeup_granularity_ns.to_string(),
        p.kernel_sched_migration_cost_ns.to_string(),
        p.kernel_numa_balancing.to_string(),
        p.kernel_pid_max.to_string(),
        p.net_core_netdev_max_backlog.to_string(),
        p.net_core_netdev_budget.to_string(),
        p.net_core_somaxconn.to_string(),
        p.net_core_busy_poll.to_string(),
        p.net_core_busy_read.to_string(),
        p.net_core_rmem_max.to_string(),
        p.net_core_wmem_max.to_string(),
        p.net_core_rmem_default.to_string(),
        p.net_core_wmem_default.to_string(),
        p.tcp_fastopen.to_string(),
        p.tcp_low_latency.to_string(),
        p.tcp_sack.to_string(),
        p.tcp_rmem[0].to_string(),
        p.tcp_rmem[1].to_string(),
        p.tcp_rmem[2].to_string(),
        p.tcp_wmem[0].to_string(),
        p.tcp_wmem[1].to_string(),
        p.tcp_wmem[2].to_string(),
        p.tcp_max_syn_backlog.to_string(),
        p.tcp_tw_reuse.to_string(),
        p.tcp_tw_recycle.to_string(),
        p.tcp_timestamps.to_string(),
        p.tcp_syn_retries.to_string(),
        p.rx_interrupt_coalesce_usecs.to_string(),
        p.rx_interrupt_max_coalesce_frames.to_string(),
        p.tx_interrupt_coalesce_usecs.to_string(),
        p.tx_interrupt_max_coalesce_frames.to_string(),
        flag(o.rx_checksum).to_string(),
        flag(o.tx_checksum).to_string(),
        flag(o.generic_segmentation).to_string(),
        flag(o.tcp_segmentation).to_string(),
        flag(o.generic_receive).to_string(),
        flag(o.large_receive).to_string(),
        flag(o.rx_vlan).to_string(),
        flag(o.tx_vlan).to_string(),
        flag(o.rx_hash).to_string(),
    ]
    .join(",")
}

/// Cursor over the values of one row
struct RowReader<'a> {
    values: Vec<&'a str>,
    line: usize,
    column: usize,
}

impl RowReader<'_> {
    fn next<T: FromStr>(&mut self) -> Result<T, PersistenceError> {
        let index = self.column;
        self.column += 1;
        let raw = self.values[index];
        raw.parse().map_err(|_| PersistenceError::InvalidValue {
            line: self.line,
            column: HEADER[index],
            value: raw.to_string(),
        })
    }

    fn next_flag(&mut self) -> Result<bool, PersistenceError> {
        self.next::<u16>().map(|v| v != 0)
    }
}

/// Parse one data row; `line` is the 1-based line number used in errors
pub fn parse_row(row: &str, line: usize) -> Result<TuningProfile, PersistenceError> {
    let values: Vec<&str> = row.split(',').map(str::trim).collect();
    if values.len() != PROFILE_FIELD_COUNT {
        return Err(PersistenceError::FieldCount {
            line,
            expected: PROFILE_FIELD_COUNT,
            found: values.len(),
        });
    }

    let mut r = RowReader {
        values,
        line,
        column: 0,
    };

    Ok(TuningProfile {
        transfer_rate: r.next()?,
        drop_rate: r.next()?,
        errors_rate: r.next()?,
        fifo_errors_rate: r.next()?,
        cpu_usage_percentage: r.next()?,
        rx_ring_size: r.next()?,
        tx_ring_size: r.next()?,
        cores: r.next()?,
        governor: r.next()?,
        cpu_speed: r.next()?,
        io_scheduler: r.next()?,
        task_scheduler: r.next()?,
        kernel_sched_min_granularity_ns: r.next()?,
        kernel_sched_wakeup_granularity_ns: r.next()?,
        kernel_sched_migration_cost_ns: r.next()?,
        kernel_numa_balancing: r.next()?,
        kernel_pid_max: r.next()?,
        net_core_netdev_max_backlog: r.next()?,
        net_core_netdev_budget: r.next()?,
        net_core_somaxconn: r.next()?,
        net_core_busy_poll: r.next()?,
        net_core_busy_read: r.next()?,
        net_core_rmem_max: r.next()?,
        net_core_wmem_max: r.next()?,
        net_core_rmem_default: r.next()?,
        net_core_wmem_default: r.next()?,
        tcp_fastopen: r.next()?,
        tcp_low_latency: r.next()?,
        tcp_sack: r.next()?,
        tcp_rmem: [r.next()?, r.next()?, r.next()?],
        tcp_wmem: [r.next()?, r.next()?, r.next()?],
        tcp_max_syn_backlog: r.next()?,
        tcp_tw_reuse: r.next()?,
        tcp_tw_recycle: r.next()?,
        tcp_timestamps: r.next()?,
        tcp_syn_retries: r.next()?,
        rx_interrupt_coalesce_usecs: r.next()?,
        rx_interrupt_max_coalesce_frames: r.next()?,
        tx_interrupt_coalesce_usecs: r.next()?,
        tx_interrupt_max_coalesce_frames: r.next()?,
        offloads: Offloads {
            rx_checksum: r.next_flag()?,
            tx_checksum: r.next_flag()?,
            generic_segmentation: r.next_flag()?,
            tcp_segmentation: r.next_flag()?,
            generic_receive: r.next_flag()?,
            large_receive: r.next_flag()?,
            rx_vlan: r.next_flag()?,
            tx_vlan: r.next_flag()?,
            rx_hash: r.next_flag()?,
        },
    })
}

/// Read every data row of a table file; the first line is the header
pub fn read_profiles(path: &Path) -> Result<Vec<TuningProfile>, PersistenceError> {
    let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();

    match lines.next() {
        Some(header) => {
            let header = header.map_err(|e| PersistenceError::io(path, e))?;
            if header.trim() != header_line() {
                debug!(path = %path.display(), "Header differs from the expected column list");
            }
        }
        None => {
            return Err(PersistenceError::Empty {
                path: path.to_path_buf(),
            })
        }
    }

    let mut profiles = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line.map_err(|e| PersistenceError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        profiles.push(parse_row(&line, i + 2)?);
    }
    Ok(profiles)
}

/// Load a table file into a table with room for `max_learning_values` more entries.
///
/// Rows may come in any order; rows repeating a key already loaded are dropped.
pub fn load_table(path: &Path, max_learning_values: usize) -> Result<ValueTable, PersistenceError> {
    let profiles = read_profiles(path)?;
    let mut table = ValueTable::with_capacity(max_learning_values + profiles.len());

    let rows = profiles.len();
    for profile in profiles {
        let key = profile.transfer_rate;
        match table.insert(profile) {
            Ok(_) => {}
            Err(TableError::DuplicateKey(_)) => {
                warn!(transfer_rate = key, "Dropping row with duplicate transfer rate");
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        path = %path.display(),
        rows = rows,
        entries = table.len(),
        capacity = table.capacity(),
        "Profile table loaded"
    );
    Ok(table)
}

/// Write `profiles` to `path`, skipping rows that repeat the previous key.
///
/// Returns the number of rows written. The file is replaced atomically.
pub fn write_profiles(path: &Path, profiles: &[TuningProfile]) -> Result<usize, PersistenceError> {
    let tmp_path = path.with_extension("csv.tmp");
    let file = File::create(&tmp_path).map_err(|e| PersistenceError::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{}", header_line()).map_err(|e| PersistenceError::io(&tmp_path, e))?;

    let mut written = 0;
    let mut previous: Option<u64> = None;
    for profile in profiles {
        if previous == Some(profile.transfer_rate) {
            continue;
        }
        writeln!(writer, "{}", format_row(profile))
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        previous = Some(profile.transfer_rate);
        written += 1;
    }

    writer
        .flush()
        .map_err(|e| PersistenceError::io(&tmp_path, e))?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(|e| PersistenceError::io(path, e))?;

    Ok(written)
}

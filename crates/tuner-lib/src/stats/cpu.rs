//! CPU busy percentage from `/proc/stat`

use super::{SharedStats, StatsError, StatsSource};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Aggregate CPU time split into idle and busy jiffies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub busy: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.idle.saturating_add(self.busy)
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Idle time is `idle + iowait`; busy time is
/// `user + nice + system + irq + softirq + steal`. Sums saturate at `u64::MAX`.
pub fn parse_proc_stat(content: &str) -> Result<CpuTimes, StatsError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or(StatsError::MissingCpuLine)?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    let field = |i: usize| values.get(i).copied().unwrap_or(0);

    let (user, nice, system, idle, iowait, irq, softirq, steal) = (
        field(0),
        field(1),
        field(2),
        field(3),
        field(4),
        field(5),
        field(6),
        field(7),
    );

    Ok(CpuTimes {
        idle: idle.saturating_add(iowait),
        busy: [nice, system, irq, softirq, steal]
            .into_iter()
            .fold(user, u64::saturating_add),
    })
}

/// Number of per-CPU `cpuN` lines in `/proc/stat`
pub fn count_cpus(content: &str) -> usize {
    content
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|name| {
            name.strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .count()
}

/// Busy share of the time elapsed between two readings, in percent
pub fn busy_percentage(previous: &CpuTimes, current: &CpuTimes) -> f64 {
    let total = current.total().saturating_sub(previous.total()) as f64;
    let idle = current.idle.saturating_sub(previous.idle) as f64;
    if total <= 0.0 {
        return 0.0;
    }
    ((total - idle) / total * 100.0).clamp(0.0, 100.0)
}

/// Reader for `/proc/stat`
#[derive(Debug, Clone)]
pub struct ProcStatReader {
    path: PathBuf,
}

impl Default for ProcStatReader {
    fn default() -> Self {
        Self::new("/proc/stat")
    }
}

impl ProcStatReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_content(&self) -> Result<String, StatsError> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|source| StatsError::Unavailable {
                path: self.path.clone(),
                source,
            })
    }

    pub async fn read(&self) -> Result<CpuTimes, StatsError> {
        parse_proc_stat(&self.read_content().await?)
    }

    /// Aggregate times together with the number of CPUs listed
    pub async fn read_with_cpus(&self) -> Result<(CpuTimes, usize), StatsError> {
        let content = self.read_content().await?;
        Ok((parse_proc_stat(&content)?, count_cpus(&content)))
    }
}

/// Publishes CPU busy percentage between consecutive readings
pub struct CpuSource {
    reader: ProcStatReader,
    previous: Option<CpuTimes>,
}

impl CpuSource {
    pub fn new(reader: ProcStatReader) -> Self {
        Self {
            reader,
            previous: None,
        }
    }
}

#[async_trait]
impl StatsSource for CpuSource {
    fn name(&self) -> &'static str {
        "cpu"
    }

    async fn sample(&mut self, stats: &SharedStats) -> Result<(), StatsError> {
        let current = self.reader.read().await?;
        if let Some(previous) = self.previous {
            stats.publish_cpu(busy_percentage(&previous, &current));
        }
        self.previous = Some(current);
        Ok(())
    }

    fn on_error(&mut self, stats: &SharedStats) {
        stats.publish_cpu(0.0);
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "cpu  100 5 50 800 20 3 2 0 0 0
cpu0 50 2 25 400 10 1 1 0 0 0
intr 12345
ctxt 67890
";

    #[test]
    fn test_parse_proc_stat() {
        let times = parse_proc_stat(PROC_STAT).unwrap();
        assert_eq!(times.idle, 820);
        assert_eq!(times.busy, 160);
        assert_eq!(times.total(), 980);
    }

    #[test]
    fn test_parse_proc_stat_huge_counters_saturate() {
        let line = format!("cpu  {max} {max} 1 {max} {max} 0 0 0\n", max = u64::MAX);
        let times = parse_proc_stat(&line).unwrap();
        assert_eq!(times.idle, u64::MAX);
        assert_eq!(times.busy, u64::MAX);
        assert_eq!(times.total(), u64::MAX);
    }

    #[test]
    fn test_parse_proc_stat_missing_cpu_line() {
        assert!(matches!(
            parse_proc_stat("intr 1\nctxt 2\n"),
            Err(StatsError::MissingCpuLine)
        ));
    }

    #[test]
    fn test_count_cpus() {
        assert_eq!(count_cpus(PROC_STAT), 1);
        assert_eq!(count_cpus("cpu  1 2\ncpu0 1\ncpu1 1\ncpufreq 3\n"), 2);
    }

    #[test]
    fn test_busy_percentage() {
        let previous = CpuTimes { idle: 800, busy: 200 };
        let current = CpuTimes { idle: 875, busy: 225 };
        // 100 jiffies elapsed, 25 busy
        assert!((busy_percentage(&previous, &current) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_busy_percentage_no_elapsed_time() {
        let times = CpuTimes { idle: 10, busy: 10 };
        assert_eq!(busy_percentage(&times, &times), 0.0);
    }
}

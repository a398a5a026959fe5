//! NIC ring, coalescing and offload settings as reported by `ethtool`

use super::StatsError;
use crate::models::Offloads;
use async_trait::async_trait;
use tokio::process::Command;

/// Ring sizes, interrupt coalescing and offloads of one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NicSettings {
    pub rx_ring_size: u16,
    pub tx_ring_size: u16,
    pub rx_coalesce_usecs: u16,
    pub rx_max_coalesce_frames: u16,
    pub tx_coalesce_usecs: u16,
    pub tx_max_coalesce_frames: u16,
    pub offloads: Offloads,
}

/// Source of the current NIC settings of an interface
#[async_trait]
pub trait NicSettingsReader: Send + Sync {
    async fn read(&self, interface: &str) -> Result<NicSettings, StatsError>;
}

/// Value after `key:` on a line, `n/a` and garbage read as zero
fn field(line: &str, key: &str) -> Option<u16> {
    let rest = line.trim_start().strip_prefix(key)?.strip_prefix(':')?;
    Some(rest.trim().parse().unwrap_or(0))
}

/// Current RX/TX ring sizes from `ethtool -g` output
pub fn parse_ring_sizes(output: &str) -> (u16, u16) {
    let current = output
        .split_once("Current hardware settings:")
        .map_or("", |(_, rest)| rest);
    let rx = current.lines().find_map(|l| field(l, "RX")).unwrap_or(0);
    let tx = current.lines().find_map(|l| field(l, "TX")).unwrap_or(0);
    (rx, tx)
}

/// `(rx-usecs, rx-frames, tx-usecs, tx-frames)` from `ethtool -c` output
pub fn parse_coalesce(output: &str) -> (u16, u16, u16, u16) {
    let get = |key| output.lines().find_map(|l| field(l, key)).unwrap_or(0);
    (
        get("rx-usecs"),
        get("rx-frames"),
        get("tx-usecs"),
        get("tx-frames"),
    )
}

/// Offload switches from `ethtool -k` output
pub fn parse_offloads(output: &str) -> Offloads {
    let enabled = |feature: &str| {
        output.lines().any(|line| {
            line.strip_prefix(feature)
                .and_then(|rest| rest.strip_prefix(':'))
                .is_some_and(|state| state.trim_start().starts_with("on"))
        })
    };
    Offloads {
        rx_checksum: enabled("rx-checksumming"),
        tx_checksum: enabled("tx-checksumming"),
        generic_segmentation: enabled("generic-segmentation-offload"),
        tcp_segmentation: enabled("tcp-segmentation-offload"),
        generic_receive: enabled("generic-receive-offload"),
        large_receive: enabled("large-receive-offload"),
        rx_vlan: enabled("rx-vlan-offload"),
        tx_vlan: enabled("tx-vlan-offload"),
        rx_hash: enabled("receive-hashing"),
    }
}

/// Runs `ethtool -g/-c/-k` for the interface
#[derive(Debug, Clone, Default)]
pub struct EthtoolReader;

impl EthtoolReader {
    async fn query(flag: &str, interface: &str) -> Result<String, StatsError> {
        let output = Command::new("ethtool")
            .arg(flag)
            .arg(interface)
            .output()
            .await
            .map_err(|e| StatsError::Command {
                command: format!("ethtool {flag} {interface}"),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(StatsError::Command {
                command: format!("ethtool {flag} {interface}"),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl NicSettingsReader for EthtoolReader {
    async fn read(&self, interface: &str) -> Result<NicSettings, StatsError> {
        let (rx_ring_size, tx_ring_size) = parse_ring_sizes(&Self::query("-g", interface).await?);
        let (rx_coalesce_usecs, rx_max_coalesce_frames, tx_coalesce_usecs, tx_max_coalesce_frames) =
            parse_coalesce(&Self::query("-c", interface).await?);
        let offloads = parse_offloads(&Self::query("-k", interface).await?);

        Ok(NicSettings {
            rx_ring_size,
            tx_ring_size,
            rx_coalesce_usecs,
            rx_max_coalesce_frames,
            tx_coalesce_usecs,
            tx_max_coalesce_frames,
            offloads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RINGS: &str = "Ring parameters for eth0:
Pre-set maximums:
RX:\t\t4096
RX Mini:\tn/a
RX Jumbo:\tn/a
TX:\t\t4096
Current hardware settings:
RX:\t\t512
RX Mini:\tn/a
RX Jumbo:\tn/a
TX:\t\t256
";

    const COALESCE: &str = "Coalesce parameters for eth0:
Adaptive RX: off  TX: off
stats-block-usecs: 0
rx-usecs: 3
rx-frames: 0
rx-usecs-irq: 0
tx-usecs: 50
tx-frames: n/a
";

    const FEATURES: &str = "Features for eth0:
rx-checksumming: on
tx-checksumming: on
\ttx-checksum-ipv4: off [fixed]
scatter-gather: on
tcp-segmentation-offload: off
generic-segmentation-offload: on
generic-receive-offload: on
large-receive-offload: off [fixed]
rx-vlan-offload: on [fixed]
tx-vlan-offload: off
receive-hashing: on
";

    #[test]
    fn test_parse_current_ring_sizes() {
        assert_eq!(parse_ring_sizes(RINGS), (512, 256));
        assert_eq!(parse_ring_sizes("Ring parameters for lo:\n"), (0, 0));
    }

    #[test]
    fn test_parse_coalesce_exact_keys() {
        // rx-usecs-irq must not shadow rx-usecs, n/a reads as zero
        assert_eq!(parse_coalesce(COALESCE), (3, 0, 50, 0));
    }

    #[test]
    fn test_parse_offloads() {
        let offloads = parse_offloads(FEATURES);
        assert!(offloads.rx_checksum);
        assert!(offloads.tx_checksum);
        assert!(!offloads.tcp_segmentation);
        assert!(offloads.generic_segmentation);
        assert!(offloads.generic_receive);
        assert!(!offloads.large_receive);
        assert!(offloads.rx_vlan);
        assert!(!offloads.tx_vlan);
        assert!(offloads.rx_hash);
    }
}

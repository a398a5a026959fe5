//! `sysctl` / `ethtool` command rendering and execution

use super::{ApplyOutcome, SettingsApplier, UpgradeGuard};
use crate::models::TuningProfile;
use crate::observability::TunerMetrics;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;
use tracing::{info, warn};

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl ApplyCommand {
    fn new(program: &'static str) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn setting(self, key: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("{key}={value}"))
    }
}

impl fmt::Display for ApplyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match arg.split_once('=') {
                Some((key, value)) if value.contains(' ') => write!(f, " {key}='{value}'")?,
                _ => write!(f, " {arg}")?,
            }
        }
        Ok(())
    }
}

fn triple(values: &[u64; 3]) -> String {
    format!("{} {} {}", values[0], values[1], values[2])
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Commands that put `profile` in place on `interface`.
///
/// `tcp_tw_recycle` is not rendered; current kernels no longer have it.
pub fn render_commands(interface: &str, profile: &TuningProfile) -> Vec<ApplyCommand> {
    let net_core = ApplyCommand::new("sysctl")
        .arg("-w")
        .setting(
            "net.core.netdev_max_backlog",
            profile.net_core_netdev_max_backlog,
        )
        .setting("net.core.netdev_budget", profile.net_core_netdev_budget)
        .setting("net.core.somaxconn", profile.net_core_somaxconn)
        .setting("net.core.busy_poll", profile.net_core_busy_poll)
        .setting("net.core.busy_read", profile.net_core_busy_read)
        .setting("net.core.rmem_max", profile.net_core_rmem_max)
        .setting("net.core.wmem_max", profile.net_core_wmem_max)
        .setting("net.core.rmem_default", profile.net_core_rmem_default)
        .setting("net.core.wmem_default", profile.net_core_wmem_default);

    let net_ipv4 = ApplyCommand::new("sysctl")
        .arg("-w")
        .setting("net.ipv4.tcp_fastopen", profile.tcp_fastopen)
        .setting("net.ipv4.tcp_low_latency", profile.tcp_low_latency)
        .setting("net.ipv4.tcp_sack", profile.tcp_sack)
        .setting("net.ipv4.tcp_rmem", triple(&profile.tcp_rmem))
        .setting("net.ipv4.tcp_wmem", triple(&profile.tcp_wmem))
        .setting("net.ipv4.tcp_max_syn_backlog", profile.tcp_max_syn_backlog)
        .setting("net.ipv4.tcp_tw_reuse", profile.tcp_tw_reuse)
        .setting("net.ipv4.tcp_timestamps", profile.tcp_timestamps)
        .setting("net.ipv4.tcp_syn_retries", profile.tcp_syn_retries);

    let rings = ApplyCommand::new("ethtool")
        .arg("-G")
        .arg(interface)
        .arg("rx")
        .arg(profile.rx_ring_size.to_string())
        .arg("tx")
        .arg(profile.tx_ring_size.to_string());

    let offloads = profile
        .offloads
        .features()
        .into_iter()
        .fold(
            ApplyCommand::new("ethtool").arg("-K").arg(interface),
            |cmd, (feature, enabled)| cmd.arg(feature).arg(on_off(enabled)),
        );

    vec![net_core, net_ipv4, rings, offloads]
}

/// Applies profiles by running `sysctl` and `ethtool`
pub struct CommandApplier {
    dry_run: bool,
    guard: Option<UpgradeGuard>,
    metrics: TunerMetrics,
}

impl CommandApplier {
    /// With `dry_run` the commands are only logged
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            guard: None,
            metrics: TunerMetrics::new(),
        }
    }

    /// Refuse profiles that would lower current settings
    pub fn with_guard(mut self, guard: UpgradeGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn execute(&self, command: &ApplyCommand) -> bool {
        match Command::new(command.program)
            .args(&command.args)
            .output()
            .await
        {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!(
                    command = %command,
                    status = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Command failed"
                );
                false
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Command could not be started");
                false
            }
        }
    }
}

#[async_trait]
impl SettingsApplier for CommandApplier {
    async fn apply(&self, interface: &str, profile: &TuningProfile) -> Result<ApplyOutcome> {
        if let Some(guard) = &self.guard {
            if let Err(reason) = guard.check(profile) {
                info!(reason = %reason, "Settings not applied: current values are better");
                return Ok(ApplyOutcome::Refused { reason });
            }
            guard.accept(profile);
        }

        let commands = render_commands(interface, profile);
        if self.dry_run {
            for command in &commands {
                info!(command = %command, dry_run = true, "$ {}", command);
            }
            return Ok(ApplyOutcome::DryRun {
                commands: commands.len(),
            });
        }

        let mut failed = 0;
        for command in &commands {
            info!(command = %command, "$ {}", command);
            if !self.execute(command).await {
                self.metrics.inc_apply_errors();
                failed += 1;
            }
        }

        Ok(ApplyOutcome::Executed {
            commands: commands.len(),
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Offloads;

    fn profile() -> TuningProfile {
        TuningProfile {
            transfer_rate: 1_000,
            rx_ring_size: 512,
            tx_ring_size: 1024,
            net_core_netdev_max_backlog: 1000,
            net_core_netdev_budget: 300,
            net_core_somaxconn: 4096,
            net_core_rmem_max: 212_992,
            tcp_rmem: [4096, 131_072, 6_291_456],
            tcp_wmem: [4096, 16_384, 4_194_304],
            tcp_sack: 1,
            tcp_tw_recycle: 1,
            offloads: Offloads {
                rx_checksum: true,
                generic_receive: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_renders_four_commands() {
        let commands = render_commands("eth0", &profile());
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].program, "sysctl");
        assert_eq!(commands[2].program, "ethtool");
    }

    #[test]
    fn test_net_core_command() {
        let commands = render_commands("eth0", &profile());
        let rendered = commands[0].to_string();
        assert!(rendered.starts_with("sysctl -w net.core.netdev_max_backlog=1000"));
        assert!(rendered.contains("net.core.somaxconn=4096"));
        assert!(rendered.contains("net.core.rmem_max=212992"));
    }

    #[test]
    fn test_tcp_buffers_are_quoted_and_tw_recycle_omitted() {
        let commands = render_commands("eth0", &profile());
        let rendered = commands[1].to_string();
        assert!(rendered.contains("net.ipv4.tcp_rmem='4096 131072 6291456'"));
        assert!(rendered.contains("net.ipv4.tcp_sack=1"));
        assert!(!rendered.contains("tw_recycle"));

        // passed to the process unquoted
        assert!(commands[1]
            .args
            .contains(&"net.ipv4.tcp_wmem=4096 16384 4194304".to_string()));
    }

    #[test]
    fn test_ring_and_offload_commands() {
        let commands = render_commands("eth1", &profile());
        assert_eq!(commands[2].to_string(), "ethtool -G eth1 rx 512 tx 1024");
        assert_eq!(
            commands[3].to_string(),
            "ethtool -K eth1 rx on tx off gso off tso off gro on lro off rxvlan off txvlan off rxhash off"
        );
    }

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let applier = CommandApplier::new(true);
        let outcome = applier.apply("eth0", &profile()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::DryRun { commands: 4 });
        assert!(outcome.is_dry_run());
    }

    #[tokio::test]
    async fn test_guard_refuses_smaller_rings() {
        let baseline = TuningProfile {
            rx_ring_size: 4096,
            ..Default::default()
        };
        let applier = CommandApplier::new(true).with_guard(UpgradeGuard::new(baseline));

        let outcome = applier.apply("eth0", &profile()).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Refused { .. }));
    }
}

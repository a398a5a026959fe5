//! Applying tuning profiles to the running system
//!
//! The [`SettingsApplier`] trait is the seam between inference and the
//! kernel. [`CommandApplier`] renders `sysctl` and `ethtool` invocations and
//! either logs them (dry run) or executes them.

mod commands;
mod system;

pub use commands::{render_commands, ApplyCommand, CommandApplier};
pub use system::{SystemSettingsReader, UpgradeGuard};

use crate::models::TuningProfile;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What happened to a profile handed to an applier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Commands were run; `failed` of them exited unsuccessfully
    Executed { commands: usize, failed: usize },
    /// Commands were only logged
    DryRun { commands: usize },
    /// The profile would lower a current setting and was not applied
    Refused { reason: String },
}

impl ApplyOutcome {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ApplyOutcome::DryRun { .. })
    }
}

/// Applies one profile to a network interface
#[async_trait]
pub trait SettingsApplier: Send + Sync {
    async fn apply(&self, interface: &str, profile: &TuningProfile) -> Result<ApplyOutcome>;
}

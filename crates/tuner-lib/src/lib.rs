//! Adaptive network stack tuning
//!
//! This crate provides the core functionality for:
//! - Scoring load samples and matching them against a sorted profile table
//! - Synthesizing new profiles between known operating points
//! - Sampling interface and CPU statistics
//! - Training, live training and inference control loops
//! - Applying kernel and NIC settings
//! - Health checks and observability

pub mod apply;
pub mod config;
pub mod control;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod plugin;
pub mod session;
pub mod stats;

pub use config::{Settings, SettingsError, DEFAULT_SETTINGS_PATH};
pub use engine::{SharedTable, ValueTable};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, TunerMetrics};
pub use session::{
    Mode, ReportHandle, Session, SessionCommand, SessionConfig, SessionReport, SessionSummary,
};

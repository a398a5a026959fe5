//! Settings document loading and validation
//!
//! The settings document is JSON with three sections:
//!
//! ```json
//! {
//!   "app_settings": {
//!     "max_learning_values": 100000, "saving_loop": 1000, "accuracy": 0.5,
//!     "approx_function": 0, "grace_period": 10,
//!     "stats_collection_period": 1.0, "inference_loop_period": 1.0,
//!     "plugins_path": "/usr/lib/phoebe"
//!   },
//!   "weights": { "transfer_rate_weight": 0.8, "drop_rate_weight": 0.1,
//!                "errors_rate_weight": 0.05, "fifo_errors_rate_weight": 0.05 },
//!   "bias": 0
//! }
//! ```
//!
//! Values may be overridden from the environment, e.g.
//! `TUNER_APP_SETTINGS__ACCURACY=0.7`.

use crate::engine::ApproxFunction;
use crate::models::{Labels, WeightsReference};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Settings file used when none is given on the command line
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/phoebe/settings.json";

/// Smallest accepted number of insertions between two snapshots
pub const MIN_SAVING_LOOP: u64 = 1000;

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("sum of weights is {sum}, must not exceed 1.0")]
    WeightsExceedOne { sum: f64 },

    #[error("weight {name} is {value}, weights must be non-negative")]
    NegativeWeight { name: &'static str, value: f64 },

    #[error("approx_function {0} is invalid, expected 0..=4")]
    InvalidApproxFunction(i64),

    #[error("accuracy {0} is invalid, expected a value in [0, 1)")]
    InvalidAccuracy(f64),

    #[error("{name} is {value}, must be positive")]
    InvalidPeriod { name: &'static str, value: f64 },

    #[error("{name} is {value}, too large for a duration")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("{name} is {value}, must not be negative")]
    NegativeCount { name: &'static str, value: i64 },
}

#[derive(Debug, Clone, Deserialize)]
struct SettingsDocument {
    app_settings: AppSettingsDocument,
    weights: WeightsDocument,
    #[serde(default)]
    bias: f64,
    #[serde(default)]
    labels: Labels,
}

#[derive(Debug, Clone, Deserialize)]
struct AppSettingsDocument {
    max_learning_values: i64,
    saving_loop: i64,
    accuracy: f64,
    approx_function: i64,
    #[serde(default)]
    grace_period: i64,
    stats_collection_period: f64,
    inference_loop_period: f64,
    #[serde(default)]
    plugins_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WeightsDocument {
    transfer_rate_weight: f64,
    drop_rate_weight: f64,
    errors_rate_weight: f64,
    fifo_errors_rate_weight: f64,
}

/// Validated runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Extra table slots reserved for synthesized profiles
    pub max_learning_values: usize,
    /// Insertions between two training snapshots
    pub saving_loop: u64,
    pub accuracy: f64,
    pub approx_function: ApproxFunction,
    /// How long a lower score is tolerated before downgrading applied settings
    pub grace_period: Duration,
    pub stats_collection_period: Duration,
    pub inference_loop_period: Duration,
    pub plugins_path: PathBuf,
    pub weights: WeightsReference,
    pub labels: Labels,
}

impl Settings {
    /// Load settings from a JSON file, applying `TUNER_*` environment overrides
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let document: SettingsDocument = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix("TUNER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Self::from_document(document)
    }

    /// Parse settings from an in-memory JSON document
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let document: SettingsDocument = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()?
            .try_deserialize()?;

        Self::from_document(document)
    }

    fn from_document(document: SettingsDocument) -> Result<Self, SettingsError> {
        let app = document.app_settings;

        if app.max_learning_values < 0 {
            return Err(SettingsError::NegativeCount {
                name: "max_learning_values",
                value: app.max_learning_values,
            });
        }

        let saving_loop = if app.saving_loop < MIN_SAVING_LOOP as i64 {
            warn!(
                saving_loop = app.saving_loop,
                default = MIN_SAVING_LOOP,
                "Saving loop too small, using the default"
            );
            MIN_SAVING_LOOP
        } else {
            app.saving_loop as u64
        };

        let stats_collection_period = if app.stats_collection_period.is_nan()
            || app.stats_collection_period <= 0.0
        {
            warn!(
                stats_collection_period = app.stats_collection_period,
                "Stats collection period too small, using the default of 1s"
            );
            1.0
        } else {
            app.stats_collection_period
        };

        if !(app.inference_loop_period > 0.0 && app.inference_loop_period.is_finite()) {
            return Err(SettingsError::InvalidPeriod {
                name: "inference_loop_period",
                value: app.inference_loop_period,
            });
        }

        if !(0.0..1.0).contains(&app.accuracy) {
            return Err(SettingsError::InvalidAccuracy(app.accuracy));
        }

        let approx_function = ApproxFunction::from_selector(app.approx_function)
            .ok_or(SettingsError::InvalidApproxFunction(app.approx_function))?;

        if app.grace_period < 0 {
            return Err(SettingsError::NegativeCount {
                name: "grace_period",
                value: app.grace_period,
            });
        }
        let grace_period = (app.grace_period as u64)
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or(SettingsError::OutOfRange {
                name: "grace_period",
                value: app.grace_period as f64,
            })?;
        let stats_collection_period = seconds("stats_collection_period", stats_collection_period)?;
        let inference_loop_period = seconds("inference_loop_period", app.inference_loop_period)?;

        let weights = WeightsReference {
            transfer_rate_weight: document.weights.transfer_rate_weight,
            drop_rate_weight: document.weights.drop_rate_weight,
            errors_rate_weight: document.weights.errors_rate_weight,
            fifo_errors_rate_weight: document.weights.fifo_errors_rate_weight,
            bias: document.bias,
        };
        validate_weights(&weights)?;

        let settings = Self {
            max_learning_values: app.max_learning_values as usize,
            saving_loop,
            accuracy: app.accuracy,
            approx_function,
            grace_period,
            stats_collection_period,
            inference_loop_period,
            plugins_path: PathBuf::from(app.plugins_path),
            weights,
            labels: document.labels,
        };

        debug!(
            max_learning_values = settings.max_learning_values,
            saving_loop = settings.saving_loop,
            accuracy = settings.accuracy,
            approx_function = %settings.approx_function,
            grace_period_secs = settings.grace_period.as_secs(),
            plugins_path = %settings.plugins_path.display(),
            "Settings loaded"
        );

        Ok(settings)
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, SettingsError> {
    Duration::try_from_secs_f64(value).map_err(|_| SettingsError::OutOfRange { name, value })
}

/// Reject negative weights and weight sums above one
pub fn validate_weights(weights: &WeightsReference) -> Result<(), SettingsError> {
    let named = [
        ("transfer_rate_weight", weights.transfer_rate_weight),
        ("drop_rate_weight", weights.drop_rate_weight),
        ("errors_rate_weight", weights.errors_rate_weight),
        ("fifo_errors_rate_weight", weights.fifo_errors_rate_weight),
    ];
    for (name, value) in named {
        if !(value >= 0.0) {
            return Err(SettingsError::NegativeWeight { name, value });
        }
    }

    let sum = weights.sum();
    if sum > 1.0 {
        return Err(SettingsError::WeightsExceedOne { sum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"{
        "app_settings": {
            "max_learning_values": 500,
            "saving_loop": 2000,
            "accuracy": 0.5,
            "approx_function": 1,
            "grace_period": 10,
            "stats_collection_period": 0.5,
            "inference_loop_period": 2,
            "plugins_path": "/usr/lib/phoebe"
        },
        "weights": {
            "transfer_rate_weight": 0.4,
            "drop_rate_weight": 0.3,
            "errors_rate_weight": 0.2,
            "fifo_errors_rate_weight": 0.1
        },
        "bias": 1.5,
        "labels": { "geography": "APAC" }
    }"#;

    fn with_app(field: &str, value: &str) -> String {
        let pattern = format!("\"{}\": ", field);
        let start = VALID.find(&pattern).unwrap() + pattern.len();
        let end = start + VALID[start..].find(|c| c == ',' || c == '\n').unwrap();
        format!("{}{}{}", &VALID[..start], value, &VALID[end..])
    }

    #[test]
    fn test_parse_valid_settings() {
        let settings = Settings::from_json(VALID).unwrap();
        assert_eq!(settings.max_learning_values, 500);
        assert_eq!(settings.saving_loop, 2000);
        assert_eq!(settings.approx_function, ApproxFunction::Sqrt);
        assert_eq!(settings.grace_period, Duration::from_secs(600));
        assert_eq!(settings.stats_collection_period, Duration::from_millis(500));
        assert_eq!(settings.inference_loop_period, Duration::from_secs(2));
        assert!((settings.weights.bias - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            settings.labels.geography,
            Some(crate::models::Geography::Apac)
        );
    }

    #[test]
    fn test_saving_loop_raised_to_floor() {
        let settings = Settings::from_json(&with_app("saving_loop", "10")).unwrap();
        assert_eq!(settings.saving_loop, MIN_SAVING_LOOP);
    }

    #[test]
    fn test_stats_period_raised_to_one_second() {
        let settings = Settings::from_json(&with_app("stats_collection_period", "0")).unwrap();
        assert_eq!(settings.stats_collection_period, Duration::from_secs(1));
    }

    #[test]
    fn test_weights_over_one_rejected() {
        let json = VALID.replace("\"fifo_errors_rate_weight\": 0.1", "\"fifo_errors_rate_weight\": 0.2");
        let err = Settings::from_json(&json).unwrap_err();
        assert!(matches!(err, SettingsError::WeightsExceedOne { .. }));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let json = VALID.replace("\"drop_rate_weight\": 0.3", "\"drop_rate_weight\": -0.3");
        let err = Settings::from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::NegativeWeight { name: "drop_rate_weight", .. }
        ));
    }

    #[test]
    fn test_approx_function_out_of_range_rejected() {
        let err = Settings::from_json(&with_app("approx_function", "5")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidApproxFunction(5)));
    }

    #[test]
    fn test_accuracy_out_of_range_rejected() {
        let err = Settings::from_json(&with_app("accuracy", "1.5")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidAccuracy(_)));
    }

    #[test]
    fn test_accuracy_of_one_rejected() {
        let err = Settings::from_json(&with_app("accuracy", "1.0")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidAccuracy(a) if a == 1.0));

        let settings = Settings::from_json(&with_app("accuracy", "0.99")).unwrap();
        assert!((settings.accuracy - 0.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_huge_grace_period_rejected() {
        let err =
            Settings::from_json(&with_app("grace_period", &i64::MAX.to_string())).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::OutOfRange { name: "grace_period", .. }
        ));
    }

    #[test]
    fn test_huge_stats_period_rejected() {
        let err = Settings::from_json(&with_app("stats_collection_period", "1e300")).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::OutOfRange { name: "stats_collection_period", .. }
        ));
    }

    #[test]
    fn test_huge_inference_period_rejected() {
        let err = Settings::from_json(&with_app("inference_loop_period", "1e300")).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::OutOfRange { name: "inference_loop_period", .. }
        ));
    }

    #[test]
    fn test_inference_period_must_be_positive() {
        let err = Settings::from_json(&with_app("inference_loop_period", "0")).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidPeriod { name: "inference_loop_period", .. }
        ));
    }

    #[test]
    fn test_missing_section_is_load_error() {
        let err = Settings::from_json(r#"{"bias": 0}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.max_learning_values, 500);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Settings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }
}

//! Weighted scoring, relative precision and match tolerance
//!
//! Four network counters are folded into one scalar score. The precision
//! of a score ("epsilon") shrinks with its magnitude, and the tolerance
//! used by the matching engine is `score * epsilon` passed through the
//! configured approximation function.

use crate::models::{LoadSample, TuningProfile, WeightsReference};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transformation applied to `score * epsilon` when computing a tolerance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproxFunction {
    #[default]
    Identity,
    Sqrt,
    Square,
    Log10,
    Ln,
}

impl ApproxFunction {
    /// Decode the numeric selector used in the settings document
    pub fn from_selector(selector: i64) -> Option<Self> {
        match selector {
            0 => Some(Self::Identity),
            1 => Some(Self::Sqrt),
            2 => Some(Self::Square),
            3 => Some(Self::Log10),
            4 => Some(Self::Ln),
            _ => None,
        }
    }

    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Sqrt => value.sqrt(),
            Self::Square => value * value,
            Self::Log10 => value.log10(),
            Self::Ln => value.ln(),
        }
    }
}

impl fmt::Display for ApproxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::Sqrt => "sqrt",
            Self::Square => "square",
            Self::Log10 => "log10",
            Self::Ln => "ln",
        };
        f.write_str(name)
    }
}

/// `rate*w1 + drop*w2 + errors*w3 + fifo*w4 + bias`
pub fn weighted_score(
    transfer_rate: u64,
    drop_rate: u64,
    errors_rate: u64,
    fifo_errors_rate: u64,
    weights: &WeightsReference,
) -> f64 {
    transfer_rate as f64 * weights.transfer_rate_weight
        + drop_rate as f64 * weights.drop_rate_weight
        + errors_rate as f64 * weights.errors_rate_weight
        + fifo_errors_rate as f64 * weights.fifo_errors_rate_weight
        + weights.bias
}

/// Score of a stored profile's companion metrics
pub fn profile_score(profile: &TuningProfile, weights: &WeightsReference) -> f64 {
    weighted_score(
        profile.transfer_rate,
        profile.drop_rate,
        profile.errors_rate,
        profile.fifo_errors_rate,
        weights,
    )
}

/// Score of a live load sample
pub fn sample_score(sample: &LoadSample, weights: &WeightsReference) -> f64 {
    weighted_score(
        sample.transfer_rate,
        sample.drop_rate,
        sample.errors_rate,
        sample.fifo_errors_rate,
        weights,
    )
}

/// Number of decimal digits in the integral part of `value`.
///
/// Zero and anything below one count as a single digit.
pub fn digits(value: f64) -> u32 {
    if !value.is_finite() || value < 1.0 {
        return 1;
    }
    value.log10().floor() as u32 + 1
}

/// Relative precision for a score: `10^-(trunc(digits(score) * accuracy))`
pub fn relative_precision(score: f64, accuracy: f64) -> f64 {
    let zeros = (digits(score) as f64 * accuracy) as i32;
    10f64.powi(-zeros)
}

/// Maximum accepted distance between two scores around `score`
pub fn tolerance(score: f64, epsilon: f64, approx: ApproxFunction) -> f64 {
    approx.apply(score * epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> WeightsReference {
        WeightsReference {
            transfer_rate_weight: 0.4,
            drop_rate_weight: 0.3,
            errors_rate_weight: 0.2,
            fifo_errors_rate_weight: 0.1,
            bias: 0.0,
        }
    }

    #[test]
    fn test_weighted_score_example() {
        let score = weighted_score(1000, 10, 5, 1, &weights());
        assert!((score - 404.1).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_includes_bias() {
        let w = WeightsReference {
            bias: 2.5,
            ..weights()
        };
        assert!((weighted_score(0, 0, 0, 0, &w) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_score_deterministic() {
        let a = weighted_score(123_456, 78, 9, 1, &weights());
        let b = weighted_score(123_456, 78, 9, 1, &weights());
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_digits() {
        assert_eq!(digits(0.0), 1);
        assert_eq!(digits(0.5), 1);
        assert_eq!(digits(9.99), 1);
        assert_eq!(digits(10.0), 2);
        assert_eq!(digits(404.1), 3);
        assert_eq!(digits(1_000_000.0), 7);
    }

    #[test]
    fn test_relative_precision() {
        // 3 digits * 0.5 = 1.5 -> 1 zero
        assert!((relative_precision(404.1, 0.5) - 0.1).abs() < 1e-12);
        // 7 digits * 0.5 = 3.5 -> 3 zeros
        assert!((relative_precision(1_000_000.0, 0.5) - 0.001).abs() < 1e-12);
        assert!((relative_precision(500.0, 0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_functions() {
        let eps = 0.1;
        assert!((tolerance(400.0, eps, ApproxFunction::Identity) - 40.0).abs() < 1e-9);
        assert!((tolerance(400.0, eps, ApproxFunction::Sqrt) - 40f64.sqrt()).abs() < 1e-9);
        assert!((tolerance(400.0, eps, ApproxFunction::Square) - 1600.0).abs() < 1e-9);
        assert!((tolerance(1000.0, eps, ApproxFunction::Log10) - 2.0).abs() < 1e-9);
        assert!((tolerance(400.0, eps, ApproxFunction::Ln) - 40f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_approx_selector_bounds() {
        assert_eq!(ApproxFunction::from_selector(0), Some(ApproxFunction::Identity));
        assert_eq!(ApproxFunction::from_selector(4), Some(ApproxFunction::Ln));
        assert_eq!(ApproxFunction::from_selector(5), None);
        assert_eq!(ApproxFunction::from_selector(-1), None);
    }
}

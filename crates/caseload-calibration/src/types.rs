//! Observations, parameters and fit outcomes shared by the calibration stages

use std::fmt;

use caseload_core::LogisticCurve;
use serde::{Deserialize, Serialize};

/// A single point a response curve is fitted against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveObservation {
    /// Local time of the observation (days since the start of the fit window)
    pub time: f64,

    /// Observed value
    pub value: f64,

    /// Only read by `LossConfig::WeightedSSE`
    pub weight: f64,
}

impl CurveObservation {
    pub fn new(time: f64, value: f64) -> Self {
        Self {
            time,
            value,
            weight: 1.0,
        }
    }

    /// Observations at local times `0, 1, 2, ...` for consecutive daily values
    pub fn from_daily(values: &[f64]) -> Vec<Self> {
        values
            .iter()
            .enumerate()
            .map(|(t, v)| Self::new(t as f64, *v))
            .collect()
    }
}

/// Parameter to be calibrated with its bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameter {
    /// Parameter identifier
    pub id: String,

    /// Minimum allowed value
    pub min_bound: f64,

    /// Maximum allowed value
    pub max_bound: f64,

    /// Optional initial guess (if None, will use midpoint of bounds)
    pub initial_guess: Option<f64>,
}

impl CalibrationParameter {
    pub fn new(id: &str, min_bound: f64, max_bound: f64) -> Self {
        Self {
            id: id.to_string(),
            min_bound,
            max_bound,
            initial_guess: None,
        }
    }

    pub fn with_initial_guess(id: &str, min_bound: f64, max_bound: f64, initial_guess: f64) -> Self {
        Self {
            id: id.to_string(),
            min_bound,
            max_bound,
            initial_guess: Some(initial_guess),
        }
    }

    /// Bounds pinned to `value ± tolerance`
    pub fn pinned(id: &str, value: f64, tolerance: f64) -> Self {
        Self::with_initial_guess(id, value - tolerance, value + tolerance, value)
    }

    /// Get the initial value, or midpoint of bounds if not specified
    pub fn initial_value(&self) -> f64 {
        self.initial_guess
            .unwrap_or_else(|| (self.min_bound + self.max_bound) / 2.0)
    }

    /// Check if a value is within the parameter bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min_bound && value <= self.max_bound
    }

    pub fn width(&self) -> f64 {
        self.max_bound - self.min_bound
    }
}

/// Configuration for loss function calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum LossConfig {
    /// Sum of squared errors: sum(observed - predicted) ** 2
    #[default]
    SumSquaredError,

    /// Root mean squared error: sqrt(sum(observed - predicted) ** 2 / n)
    RootMeanSquaredError,

    /// Mean absolute error: sum(abs(observed - predicted)) / n
    MeanAbsoluteError,

    /// Weighted sum of squared errors (uses observation weights)
    WeightedSSE,
}

impl fmt::Display for LossConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossConfig::SumSquaredError => write!(f, "Sum Squared Error"),
            LossConfig::RootMeanSquaredError => write!(f, "Root Mean Squared Error"),
            LossConfig::MeanAbsoluteError => write!(f, "Mean Absolute Error"),
            LossConfig::WeightedSSE => write!(f, "Weighted Sum Squared Error"),
        }
    }
}

/// Best parameters of one optimizer run, in `parameter_names` order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub best_parameters: Vec<f64>,
    pub parameter_names: Vec<String>,
    pub final_loss: f64,
    pub iterations: usize,
    pub converged: bool,
    pub termination_reason: String,
}

/// Why a regime fit fell back to its default curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The optimizer stopped without meeting its convergence criterion
    NotConverged { iterations: usize, termination: String },
    /// The best parameters produced a non-finite curve or loss
    NonFinite,
    /// The optimizer returned an error
    OptimizerError(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NotConverged {
                iterations,
                termination,
            } => write!(f, "not converged after {} iterations ({})", iterations, termination),
            FallbackReason::NonFinite => write!(f, "non-finite fit"),
            FallbackReason::OptimizerError(e) => write!(f, "optimizer error: {}", e),
        }
    }
}

/// Outcome of a single regime curve fit. A fallback is a usable curve, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FitOutcome {
    Converged {
        curve: LogisticCurve,
        loss: f64,
    },
    FallbackUsed {
        curve: LogisticCurve,
        reason: FallbackReason,
    },
}

impl FitOutcome {
    pub fn curve(&self) -> &LogisticCurve {
        match self {
            FitOutcome::Converged { curve, .. } | FitOutcome::FallbackUsed { curve, .. } => curve,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FitOutcome::FallbackUsed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value_defaults_to_midpoint() {
        let p = CalibrationParameter::new("k", 0.0, 100.0);
        assert_eq!(p.initial_value(), 50.0);
        let p = CalibrationParameter::with_initial_guess("k", 0.1, 100.0, 1.0);
        assert_eq!(p.initial_value(), 1.0);
        assert!(p.is_within_bounds(100.0));
        assert!(!p.is_within_bounds(0.0));
    }

    #[test]
    fn test_pinned_parameter() {
        let p = CalibrationParameter::pinned("start", 4.0, 1e-6);
        assert!(p.is_within_bounds(4.0));
        assert!(!p.is_within_bounds(4.1));
        assert!(p.width() < 3e-6);
    }

    #[test]
    fn test_fit_outcome_curve_access() {
        let curve = LogisticCurve::new(1.0, 2.0, 0.1, 5.0);
        let outcome = FitOutcome::FallbackUsed {
            curve,
            reason: FallbackReason::NonFinite,
        };
        assert!(outcome.is_fallback());
        assert_eq!(outcome.curve(), &curve);
    }
}

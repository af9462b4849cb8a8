//! Regime response curves

use serde::{Deserialize, Serialize};

/// A parametric curve that can be fitted by the calibration crate.
///
/// Implementors expose their free parameters as a flat vector in a fixed order,
/// which is the representation the optimizers work on.
pub trait ResponseCurve: Clone + Send + Sync {
    /// Names of the free parameters, in vector order
    fn parameter_names() -> &'static [&'static str];

    /// Build a curve from a parameter vector in [`ResponseCurve::parameter_names`] order
    fn from_parameters(parameters: &[f64]) -> Self;

    fn parameters(&self) -> Vec<f64>;

    fn evaluate(&self, t: f64) -> f64;
}

/// Logistic transition between two levels:
/// `y(t) = start - (start - end) / (1 + exp(-steepness * (t - midpoint)))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticCurve {
    pub start: f64,
    pub end: f64,
    pub steepness: f64,
    pub midpoint: f64,
}

impl LogisticCurve {
    pub fn new(start: f64, end: f64, steepness: f64, midpoint: f64) -> Self {
        Self {
            start,
            end,
            steepness,
            midpoint,
        }
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        self.start - (self.start - self.end) / (1.0 + (-self.steepness * (t - self.midpoint)).exp())
    }

    /// Same shape with a different start level
    pub fn with_start(mut self, start: f64) -> Self {
        self.start = start;
        self
    }

    /// Same shape with a different end level
    pub fn with_end(mut self, end: f64) -> Self {
        self.end = end;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && self.steepness.is_finite()
            && self.midpoint.is_finite()
    }
}

impl ResponseCurve for LogisticCurve {
    fn parameter_names() -> &'static [&'static str] {
        &["start", "end", "steepness", "midpoint"]
    }

    fn from_parameters(parameters: &[f64]) -> Self {
        let get = |i: usize| parameters.get(i).copied().unwrap_or(0.0);
        Self::new(get(0), get(1), get(2), get(3))
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.start, self.end, self.steepness, self.midpoint]
    }

    fn evaluate(&self, t: f64) -> f64 {
        LogisticCurve::evaluate(self, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_midpoint_is_mean_of_levels() {
        for (s, e, k, t0) in [
            (10.0, -4.0, 0.3, 12.0),
            (-2.5, 7.5, 5.0, 0.0),
            (100.0, 100.0, 0.1, 40.0),
            (3.0, -30.0, -0.8, 25.5),
        ] {
            let curve = LogisticCurve::new(s, e, k, t0);
            assert_relative_eq!(curve.evaluate(t0), (s + e) / 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_limits() {
        let curve = LogisticCurve::new(10.0, 2.0, 1.0, 20.0);
        assert_relative_eq!(curve.evaluate(-1000.0), 10.0, epsilon = 1e-9);
        assert_relative_eq!(curve.evaluate(1000.0), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parameter_vector_order() {
        let curve = LogisticCurve::from_parameters(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(curve, LogisticCurve::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(curve.parameters(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(LogisticCurve::parameter_names()[3], "midpoint");
    }
}

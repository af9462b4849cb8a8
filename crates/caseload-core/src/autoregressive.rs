//! Autoregressive residual models

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Ordinary least squares `AR(p)` fit without intercept.
///
/// `fitted` and `residuals` have the same length as the input series; the first
/// `order` entries have no lagged history and are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArModel {
    coefficients: Vec<f64>,
    fitted: Vec<f64>,
    residuals: Vec<f64>,
}

impl ArModel {
    pub fn fit(order: usize, series: &[f64]) -> Result<Self, CoreError> {
        if order == 0 || series.len() <= order {
            return Err(CoreError::LengthMismatch {
                what: format!("AR({}) fit input", order),
                expected: order + 1,
                actual: series.len(),
            });
        }

        let rows = series.len() - order;
        let design = DMatrix::from_fn(rows, order, |row, lag| series[row + order - lag - 1]);
        let target = DVector::from_iterator(rows, series[order..].iter().copied());

        let coefficients = design
            .svd(true, true)
            .solve(&target, 1e-12)
            .map_err(|e| CoreError::LeastSquares(e.to_string()))?;
        let coefficients: Vec<f64> = coefficients.iter().copied().collect();

        let mut fitted = vec![0.0; series.len()];
        let mut residuals = vec![0.0; series.len()];
        for t in order..series.len() {
            fitted[t] = predict_from(&coefficients, &series[..t]);
            residuals[t] = series[t] - fitted[t];
        }

        Ok(Self {
            coefficients,
            fitted,
            residuals,
        })
    }

    pub fn order(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// One-step prediction from the most recent values of `history`
    pub fn predict(&self, history: &[f64]) -> f64 {
        predict_from(&self.coefficients, history)
    }
}

fn predict_from(coefficients: &[f64], history: &[f64]) -> f64 {
    coefficients
        .iter()
        .zip(history.iter().rev())
        .map(|(c, v)| c * v)
        .sum()
}

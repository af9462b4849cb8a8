//! Curve fitting problem handed to the argmin solvers

use argmin::core::{CostFunction, Error};
use caseload_core::ResponseCurve;
use std::marker::PhantomData;

use crate::error::CalibrationError;
use crate::types::{CalibrationParameter, CurveObservation, LossConfig};

/// Least-squares fit of a parametric response curve to daily observations.
///
/// The problem is generic over the curve family so the optimizer layer never needs
/// to know which shape is being fitted.
pub struct CurveFitProblem<C: ResponseCurve> {
    /// Points to fit against
    observations: Vec<CurveObservation>,

    /// Curve parameters with their bounds, in `C::parameter_names()` order
    parameters: Vec<CalibrationParameter>,

    /// Loss function configuration
    loss_config: LossConfig,

    _curve: PhantomData<C>,
}

impl<C: ResponseCurve> CurveFitProblem<C> {
    /// Create a new curve fitting problem
    ///
    /// Returns an error if there are no observations or the parameter list does not
    /// match the curve family's parameter names.
    pub fn new(
        observations: Vec<CurveObservation>,
        parameters: Vec<CalibrationParameter>,
        loss_config: LossConfig,
    ) -> Result<Self, CalibrationError> {
        if observations.is_empty() {
            return Err(CalibrationError::InvalidProblem(
                "No observations provided".to_string(),
            ));
        }

        let expected = C::parameter_names();
        if parameters.len() != expected.len() {
            return Err(CalibrationError::InvalidProblem(format!(
                "Expected {} parameters ({}), got {}",
                expected.len(),
                expected.join(", "),
                parameters.len()
            )));
        }
        for (param, name) in parameters.iter().zip(expected) {
            if param.id != *name {
                return Err(CalibrationError::InvalidProblem(format!(
                    "Parameter '{}' given where '{}' was expected",
                    param.id, name
                )));
            }
            if param.min_bound > param.max_bound {
                return Err(CalibrationError::InvalidProblem(format!(
                    "Parameter '{}' has empty bounds [{}, {}]",
                    param.id, param.min_bound, param.max_bound
                )));
            }
        }

        Ok(Self {
            observations,
            parameters,
            loss_config,
            _curve: PhantomData,
        })
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.id.clone()).collect()
    }

    pub fn initial_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.initial_value()).collect()
    }

    /// `(min, max)` per parameter
    pub fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters
            .iter()
            .map(|p| (p.min_bound, p.max_bound))
            .collect()
    }

    /// Loss of a concrete curve against the observations
    pub fn calculate_loss(&self, curve: &C) -> f64 {
        let residuals = || {
            self.observations
                .iter()
                .map(|obs| (obs, obs.value - curve.evaluate(obs.time)))
        };
        let count = self.observations.len() as f64;

        match self.loss_config {
            LossConfig::SumSquaredError => residuals().map(|(_, e)| e * e).sum(),
            LossConfig::WeightedSSE => residuals()
                .map(|(obs, e)| {
                    let weighted = e * obs.weight;
                    weighted * weighted
                })
                .sum(),
            LossConfig::RootMeanSquaredError => {
                (residuals().map(|(_, e)| e * e).sum::<f64>() / count).sqrt()
            }
            LossConfig::MeanAbsoluteError => {
                residuals().map(|(_, e)| e.abs()).sum::<f64>() / count
            }
        }
    }

    /// Clamp parameter values to their defined bounds
    ///
    /// Nelder-Mead explores outside the bounds during its search, so every
    /// evaluated (and every returned) parameter vector goes through here.
    pub fn clamp_to_bounds(&self, param_values: &[f64]) -> Vec<f64> {
        param_values
            .iter()
            .zip(&self.parameters)
            .map(|(value, param)| value.clamp(param.min_bound, param.max_bound))
            .collect()
    }

    /// Validate parameter vector length
    fn validate_parameter_count(&self, param_values: &[f64]) -> Result<(), String> {
        if param_values.len() != self.parameters.len() {
            return Err(format!(
                "Expected {} parameters, got {}",
                self.parameters.len(),
                param_values.len()
            ));
        }
        Ok(())
    }
}

impl<C: ResponseCurve> CostFunction for CurveFitProblem<C> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param_values: &Self::Param) -> Result<Self::Output, Error> {
        self.validate_parameter_count(param_values)
            .map_err(Error::msg)?;

        let clamped = self.clamp_to_bounds(param_values);
        let curve = C::from_parameters(&clamped);
        let loss = self.calculate_loss(&curve);

        // Overflowing exponentials must not poison the simplex ordering
        Ok(if loss.is_finite() { loss } else { f64::MAX })
    }
}

//! Stochastic SEIR projection of regional COVID admissions.

pub mod ensemble;
pub mod error;
pub mod projector;
pub mod reconstruction;

use std::collections::HashMap;

use caseload_core::{CoreError, SimulationEngine};

pub use ensemble::{Compartment, EpidemicEnsemble, PercentileEnsemble};
pub use error::EpidemicError;
pub use projector::{EpidemicProjector, ProjectorConfig, Realization, TransmissionScenario};
pub use reconstruction::{backfill_admissions, DiseaseDraw, Reconstruction};

pub const POPULATION: &str = "population";
pub const REPRODUCTION_NUMBER: &str = "r_eff";
pub const INFECTIOUS_DAYS: &str = "infectious_days";
pub const EXPOSURE_DAYS: &str = "exposure_days";
pub const HOSPITALIZATION_RATE: &str = "hospitalization_rate";

const COMPARTMENTS: [&str; 3] = ["S", "E", "I"];

/// Daily SEIR difference equations driven by a time-varying effective
/// reproduction number.
///
/// Recovered individuals are not tracked; the population parameter `N` stays
/// fixed while `S`, `E` and `I` evolve.
#[derive(Debug, Clone)]
pub struct SeirDifference {
    population: Vec<f64>,
    parameters: HashMap<String, f64>,
    current_step: f64,
    initial_population: Vec<f64>,
}

impl SeirDifference {
    pub fn new(total_population: f64, draw: &DiseaseDraw, state: [f64; 3]) -> Self {
        let parameters = HashMap::from([
            (POPULATION.to_string(), total_population),
            (REPRODUCTION_NUMBER.to_string(), 1.0),
            (INFECTIOUS_DAYS.to_string(), draw.infectious_days),
            (EXPOSURE_DAYS.to_string(), draw.exposure_days),
            (HOSPITALIZATION_RATE.to_string(), draw.hospitalization_rate),
        ]);
        Self {
            population: state.to_vec(),
            parameters,
            current_step: 0.0,
            initial_population: state.to_vec(),
        }
    }

    fn parameter(&self, id: &str) -> Result<f64, CoreError> {
        self.parameters
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::UnknownParameter(id.to_string()))
    }

    pub fn susceptible(&self) -> f64 {
        self.population[0]
    }

    pub fn exposed(&self) -> f64 {
        self.population[1]
    }

    pub fn infectious(&self) -> f64 {
        self.population[2]
    }

    /// Expected daily hospital admissions at the current state: `I · h / d_I`.
    pub fn expected_admissions(&self) -> Result<f64, CoreError> {
        let infectious_days = self.parameter(INFECTIOUS_DAYS)?;
        let rate = self.parameter(HOSPITALIZATION_RATE)?;
        Ok(self.infectious() * rate / infectious_days)
    }
}

impl SimulationEngine for SeirDifference {
    fn step(&mut self) -> Result<(), CoreError> {
        let n = self.parameter(POPULATION)?;
        let r = self.parameter(REPRODUCTION_NUMBER)?;
        let d_i = self.parameter(INFECTIOUS_DAYS)?;
        let d_e = self.parameter(EXPOSURE_DAYS)?;
        if n == 0.0 || d_i == 0.0 || d_e == 0.0 {
            return Err(CoreError::ZeroDenominator("SEIR step".to_string()));
        }

        let (s, e, i) = (self.population[0], self.population[1], self.population[2]);
        let infections = r * i * s / (n * d_i);
        self.population[0] = s - infections;
        self.population[1] = e - e / d_e + infections;
        self.population[2] = i + e / d_e - i / d_i;

        self.current_step += 1.0;
        Ok(())
    }

    fn compartments(&self) -> Vec<String> {
        COMPARTMENTS.iter().map(|c| c.to_string()).collect()
    }

    fn population(&self) -> Vec<f64> {
        self.population.clone()
    }

    fn reset(&mut self) {
        self.population = self.initial_population.clone();
        self.current_step = 0.0;
    }

    fn set_parameter(&mut self, parameter_id: &str, value: f64) -> Result<(), CoreError> {
        match self.parameters.get_mut(parameter_id) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CoreError::UnknownParameter(parameter_id.to_string())),
        }
    }

    fn get_parameters(&self) -> &HashMap<String, f64> {
        &self.parameters
    }

    fn current_step(&self) -> f64 {
        self.current_step
    }
}

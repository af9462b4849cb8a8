use std::collections::HashMap;

use crate::error::CoreError;

/// Common interface for discrete-time compartment engines.
///
/// An engine owns its compartment populations and a parameter table; `reset`
/// must restore the populations it was constructed with so a single template can
/// be cloned and rerun.
pub trait SimulationEngine: Clone + Send + Sync {
    /// Advance one step
    fn step(&mut self) -> Result<(), CoreError>;

    /// Run `num_steps` steps, returning the initial state followed by the state
    /// after every step
    fn run(&mut self, num_steps: u32) -> Result<Vec<Vec<f64>>, CoreError> {
        let mut steps = Vec::with_capacity(num_steps as usize + 1);
        steps.push(self.population());
        for _ in 0..num_steps {
            self.step()?;
            steps.push(self.population());
        }
        Ok(steps)
    }

    fn compartments(&self) -> Vec<String>;

    fn population(&self) -> Vec<f64>;

    fn reset(&mut self);

    fn set_parameter(&mut self, parameter_id: &str, value: f64) -> Result<(), CoreError>;

    fn get_parameters(&self) -> &HashMap<String, f64>;

    fn current_step(&self) -> f64;
}

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use caseload_core::{stats, ArModel, SimulationEngine};

use crate::ensemble::EpidemicEnsemble;
use crate::error::EpidemicError;
use crate::reconstruction::{backfill_admissions, DiseaseDraw, Reconstruction};
use crate::{SeirDifference, REPRODUCTION_NUMBER};

/// Stream reserved for the admission back-fill draws
const BACKFILL_STREAM: u64 = u64::MAX;

/// How long the observed reproduction number persists before it declines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionScenario {
    pub name: String,
    /// Days after the last observed day before the decline starts
    pub days_extended: usize,
}

impl TransmissionScenario {
    pub fn new(name: &str, days_extended: usize) -> Self {
        Self {
            name: name.to_string(),
            days_extended,
        }
    }

    pub fn low() -> Self {
        Self::new("low", 10)
    }

    pub fn high() -> Self {
        Self::new("high", 30)
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::low(), Self::high()]
    }
}

/// Configuration for [`EpidemicProjector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub realizations: usize,
    /// Inclusive range of infectious-period lengths in days
    pub infectious_days: (u32, u32),
    /// Inclusive range of exposure-period lengths in days
    pub exposure_days: (u32, u32),
    /// Half-open range of the infection-to-hospitalization rate
    pub hospitalization_rate: (f64, f64),
    pub admission_window: usize,
    pub smoothing_window: usize,
    /// Trailing days of the admission record excluded from reconstruction
    pub reporting_lag_days: usize,
    /// Days before the simulation start that end the observed record
    pub days_cutoff: usize,
    /// Days before the last observed day bounding the starting R window
    pub starting_window: (usize, usize),
    pub ending_r: f64,
    pub decline_days: usize,
    pub ar_order: usize,
    /// Days projected past the simulation start
    pub projection_days: usize,
    pub backfill_growth: f64,
    pub backfill_error_days: usize,
    pub residual_noise: bool,
    pub hospitalization_noise: bool,
    /// First day of the history sampled for hospitalization residuals
    pub noise_first_day: usize,
    /// Trailing days of the history never sampled for hospitalization residuals
    pub noise_trailing_days: usize,
    /// Overrides the scenario path with a constant reproduction number
    pub fixed_reproduction: Option<f64>,
    pub gradations: usize,
    pub seed: u64,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            realizations: 100,
            infectious_days: (8, 9),
            exposure_days: (2, 4),
            hospitalization_rate: (0.015, 0.025),
            admission_window: 7,
            smoothing_window: 14,
            reporting_lag_days: 10,
            days_cutoff: 10,
            starting_window: (40, 20),
            ending_r: 0.8,
            decline_days: 10,
            ar_order: 2,
            projection_days: 135,
            backfill_growth: 0.0126,
            backfill_error_days: 20,
            residual_noise: true,
            hospitalization_noise: true,
            noise_first_day: 186,
            noise_trailing_days: 14,
            fixed_reproduction: None,
            gradations: 7,
            seed: 0,
        }
    }
}

impl ProjectorConfig {
    pub fn with_realizations(mut self, realizations: usize) -> Self {
        self.realizations = realizations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_projection_days(mut self, days: usize) -> Self {
        self.projection_days = days;
        self
    }

    /// Disable both residual and hospitalization noise
    pub fn without_noise(mut self) -> Self {
        self.residual_noise = false;
        self.hospitalization_noise = false;
        self
    }

    pub fn with_fixed_reproduction(mut self, r: f64) -> Self {
        self.fixed_reproduction = Some(r);
        self
    }

    pub fn validate(&self) -> Result<(), EpidemicError> {
        let invalid = |msg: &str| Err(EpidemicError::InvalidConfig(msg.to_string()));
        if self.realizations == 0 {
            return invalid("at least one realization is required");
        }
        if self.infectious_days.0 == 0 || self.infectious_days.0 > self.infectious_days.1 {
            return invalid("infectious_days must be a non-empty range of positive days");
        }
        if self.exposure_days.0 == 0 || self.exposure_days.0 > self.exposure_days.1 {
            return invalid("exposure_days must be a non-empty range of positive days");
        }
        let (low, high) = self.hospitalization_rate;
        if !(low > 0.0 && low < high) {
            return invalid("hospitalization_rate must be a non-empty positive range");
        }
        if self.admission_window == 0 || self.smoothing_window == 0 || self.decline_days == 0 {
            return invalid("windows must span at least one day");
        }
        if self.starting_window.0 <= self.starting_window.1 {
            return invalid("starting_window must run forward in time");
        }
        if self.ar_order == 0 || self.gradations == 0 {
            return invalid("ar_order and gradations must be positive");
        }
        Ok(())
    }
}

/// One stochastic trajectory over the full synthetic horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    pub draw: DiseaseDraw,
    pub susceptible: Vec<f64>,
    pub exposed: Vec<f64>,
    pub infectious: Vec<f64>,
    pub reproduction: Vec<f64>,
    pub hospitalizations: Vec<f64>,
    pub smoothed_reproduction: Vec<f64>,
}

/// Projects regional COVID admissions under a transmission scenario.
pub struct EpidemicProjector {
    config: ProjectorConfig,
}

impl EpidemicProjector {
    pub fn new(config: ProjectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Run every realization for `scenario` and collect the ensemble.
    ///
    /// `admissions` is the regional COVID admission record from day 0;
    /// `simulation_start` is the first projected day on the same axis.
    pub fn project(
        &self,
        admissions: &[f64],
        population: f64,
        simulation_start: usize,
        calibration_start: usize,
        scenario: &TransmissionScenario,
    ) -> Result<EpidemicEnsemble, EpidemicError> {
        self.config.validate()?;
        if population <= 0.0 {
            return Err(EpidemicError::InvalidConfig(format!(
                "population must be positive, got {}",
                population
            )));
        }

        let mut record = admissions.to_vec();
        let mut backfill_rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        backfill_rng.set_stream(BACKFILL_STREAM);
        backfill_admissions(
            &mut record,
            calibration_start,
            self.config.backfill_growth,
            self.config.backfill_error_days,
            &mut backfill_rng,
        )?;

        info!(
            scenario = %scenario.name,
            realizations = self.config.realizations,
            simulation_start,
            "projecting epidemic"
        );

        let realizations = (0..self.config.realizations)
            .into_par_iter()
            .map(|index| self.project_realization(&record, population, simulation_start, scenario, index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EpidemicEnsemble::new(realizations))
    }

    fn realization_rng(&self, index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(index as u64);
        rng
    }

    fn sample_draw(&self, rng: &mut ChaCha8Rng) -> DiseaseDraw {
        let (i_low, i_high) = self.config.infectious_days;
        let (e_low, e_high) = self.config.exposure_days;
        let (h_low, h_high) = self.config.hospitalization_rate;
        DiseaseDraw {
            infectious_days: f64::from(rng.gen_range(i_low..=i_high)),
            exposure_days: f64::from(rng.gen_range(e_low..=e_high)),
            hospitalization_rate: rng.gen_range(h_low..h_high),
        }
    }

    /// Reproduction number on `day` before the AR term is added.
    fn scheduled_reproduction(&self, day: usize, begin_reduction: usize, starting_r: f64) -> f64 {
        if day < begin_reduction {
            return starting_r;
        }
        let elapsed = (day - begin_reduction) as f64 / self.config.decline_days as f64;
        self.config.ending_r + (starting_r - self.config.ending_r) * (1.0 - elapsed).max(0.0)
    }

    pub fn project_realization(
        &self,
        admissions: &[f64],
        population: f64,
        simulation_start: usize,
        scenario: &TransmissionScenario,
        index: usize,
    ) -> Result<Realization, EpidemicError> {
        let config = &self.config;
        let mut rng = self.realization_rng(index);
        let draw = self.sample_draw(&mut rng);
        debug!(index, ?draw, "realization parameters");

        let recon = Reconstruction::from_admissions(admissions, &draw, population, config)?;
        let last_observed = simulation_start.saturating_sub(config.days_cutoff);
        if last_observed < config.starting_window.0.max(config.ar_order + 1)
            || last_observed > recon.usable_len
        {
            return Err(EpidemicError::InsufficientHistory {
                needed: simulation_start.max(config.starting_window.0 + config.days_cutoff + 1)
                    + config.reporting_lag_days,
                available: admissions.len(),
            });
        }

        let len = admissions.len();
        let noise_end = len.saturating_sub(config.noise_trailing_days);
        if config.hospitalization_noise && noise_end <= config.noise_first_day {
            return Err(EpidemicError::InsufficientHistory {
                needed: config.noise_first_day + config.noise_trailing_days + 1,
                available: len,
            });
        }

        let ar = ArModel::fit(config.ar_order, &recon.smoothing_residuals())?;
        let innovations = &ar.residuals()[config.ar_order..];
        let innovation_offset = if config.residual_noise && !innovations.is_empty() {
            rng.gen_range(0..innovations.len())
        } else {
            0
        };

        let window = (
            last_observed - config.starting_window.0,
            last_observed - config.starting_window.1,
        );
        let starting_r = stats::mean(&recon.smoothed_reproduction[window.0..window.1]).unwrap_or(0.0);
        let begin_reduction = last_observed + scenario.days_extended;

        let horizon = simulation_start + config.projection_days;
        let mut susceptible = vec![0.0; horizon];
        let mut exposed = vec![0.0; horizon];
        let mut infectious = vec![0.0; horizon];
        let mut reproduction = vec![0.0; horizon];
        let mut hospitalizations = vec![0.0; horizon];
        let mut ar_term = vec![0.0; horizon];

        let mut engine = SeirDifference::new(population, &draw, recon.state(last_observed - 1));
        for x in 0..horizon {
            if x < last_observed {
                [susceptible[x], exposed[x], infectious[x]] = recon.state(x);
                reproduction[x] = recon.reproduction[x];
                if x > 0 {
                    let from = x.saturating_sub(config.admission_window);
                    hospitalizations[x] = stats::mean(&admissions[from..x]).unwrap_or(0.0);
                }
                if x >= config.ar_order {
                    ar_term[x] = recon.reproduction[x] - recon.smoothed_reproduction[x];
                }
                continue;
            }

            ar_term[x] = if !config.residual_noise {
                0.0
            } else if x < recon.usable_len {
                recon.reproduction[x] - recon.smoothed_reproduction[x]
            } else {
                let step = x - recon.usable_len;
                let innovation = if innovations.is_empty() {
                    0.0
                } else {
                    innovations[(innovation_offset + step) % innovations.len()]
                };
                ar.predict(&ar_term[..x]) + innovation
            };

            reproduction[x] = match config.fixed_reproduction {
                Some(r) => r,
                None => (ar_term[x] + self.scheduled_reproduction(x, begin_reduction, starting_r))
                    .max(0.0),
            };

            engine.set_parameter(REPRODUCTION_NUMBER, reproduction[x])?;
            engine.step()?;
            susceptible[x] = engine.susceptible();
            exposed[x] = engine.exposed();
            infectious[x] = engine.infectious();

            let factor = if config.hospitalization_noise {
                1.0 + recon.hospitalization_residuals[rng.gen_range(config.noise_first_day..noise_end)]
            } else {
                1.0
            };
            hospitalizations[x] = factor * engine.expected_admissions()?;
        }

        let smoothing = config.smoothing_window;
        let smoothed_reproduction = (0..horizon)
            .map(|x| {
                let from = if x > smoothing { x - smoothing } else { 0 };
                let to = if x > smoothing { x } else { x + 1 };
                stats::mean(&reproduction[from..to]).unwrap_or(0.0)
            })
            .collect();

        Ok(Realization {
            draw,
            susceptible,
            exposed,
            infectious,
            reproduction,
            hospitalizations,
            smoothed_reproduction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wave(len: usize) -> Vec<f64> {
        (0..len)
            .map(|d| {
                let t = d as f64;
                20.0 + 10.0 * (t / 40.0).sin() + 3.0 * ((t * 1.7).sin() + (t * 0.9).cos())
            })
            .collect()
    }

    #[test]
    fn test_equilibrium_without_noise() {
        let admissions = vec![10.0; 300];
        let config = ProjectorConfig::default()
            .with_realizations(8)
            .with_seed(11)
            .without_noise()
            .with_fixed_reproduction(1.0);
        let projector = EpidemicProjector::new(config);
        let ensemble = projector
            .project(&admissions, 1e15, 250, 0, &TransmissionScenario::low())
            .unwrap();

        assert_eq!(ensemble.horizon(), 250 + 135);
        for realization in ensemble.realizations() {
            let last = 239;
            let level = realization.infectious[last];
            for x in 240..ensemble.horizon() {
                assert_relative_eq!(realization.infectious[x], level, max_relative = 1e-6);
                assert_relative_eq!(realization.hospitalizations[x], 10.0, max_relative = 1e-6);
                assert_eq!(realization.reproduction[x], 1.0);
            }
        }
    }

    #[test]
    fn test_projection_is_deterministic_per_seed() {
        let admissions = wave(320);
        let config = ProjectorConfig::default().with_realizations(12).with_seed(42);
        let projector = EpidemicProjector::new(config.clone());
        let first = projector
            .project(&admissions, 5e6, 280, 0, &TransmissionScenario::high())
            .unwrap();
        let second = EpidemicProjector::new(config)
            .project(&admissions, 5e6, 280, 0, &TransmissionScenario::high())
            .unwrap();
        assert_eq!(first, second);

        let other = EpidemicProjector::new(ProjectorConfig::default().with_realizations(12).with_seed(43))
            .project(&admissions, 5e6, 280, 0, &TransmissionScenario::high())
            .unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_reproduction_declines_to_ending_level() {
        let projector = EpidemicProjector::new(ProjectorConfig::default());
        assert_eq!(projector.scheduled_reproduction(50, 60, 1.3), 1.3);
        assert_relative_eq!(projector.scheduled_reproduction(65, 60, 1.3), 1.05);
        assert_relative_eq!(projector.scheduled_reproduction(70, 60, 1.3), 0.8);
        assert_relative_eq!(projector.scheduled_reproduction(200, 60, 1.3), 0.8);
    }

    #[test]
    fn test_draws_stay_in_range() {
        let projector = EpidemicProjector::new(ProjectorConfig::default());
        for index in 0..50 {
            let mut rng = projector.realization_rng(index);
            let draw = projector.sample_draw(&mut rng);
            assert!(draw.infectious_days == 8.0 || draw.infectious_days == 9.0);
            assert!((2.0..=4.0).contains(&draw.exposure_days));
            assert!(draw.hospitalization_rate >= 0.015 && draw.hospitalization_rate < 0.025);
        }
    }

    #[test]
    fn test_simulation_start_too_early_is_rejected() {
        let projector = EpidemicProjector::new(ProjectorConfig::default().with_realizations(2));
        let err = projector
            .project(&vec![5.0; 300], 1e6, 30, 0, &TransmissionScenario::low())
            .unwrap_err();
        assert!(matches!(err, EpidemicError::InsufficientHistory { .. }));
    }
}

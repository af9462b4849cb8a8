//! Inverting observed admissions into SEIR state
//!
//! Given a realization's disease parameters, the infectious population on a day
//! is the forward mean of admissions scaled by `d_I / h`. The exposed and
//! susceptible compartments and the effective reproduction number then follow
//! from the difference equations run backwards.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use caseload_core::stats;

use crate::error::EpidemicError;
use crate::projector::ProjectorConfig;

/// Days averaged at the calibration start to anchor the back-fill growth curve
const INITIAL_LEVEL_DAYS: usize = 5;
/// Observed days averaged just after the last missing day
const START_LEVEL_DAYS: usize = 4;

/// Disease parameters drawn once per realization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiseaseDraw {
    pub infectious_days: f64,
    pub exposure_days: f64,
    pub hospitalization_rate: f64,
}

/// SEIR state inferred from the observed admission record.
///
/// All vectors share the admission series' length. Entries at or beyond
/// `usable_len` are left at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub susceptible: Vec<f64>,
    pub exposed: Vec<f64>,
    pub infectious: Vec<f64>,
    pub reproduction: Vec<f64>,
    pub smoothed_reproduction: Vec<f64>,
    /// Relative error of the next day's admissions against the forward mean
    pub hospitalization_residuals: Vec<f64>,
    pub usable_len: usize,
    smoothing_window: usize,
}

impl Reconstruction {
    pub fn from_admissions(
        admissions: &[f64],
        draw: &DiseaseDraw,
        population: f64,
        config: &ProjectorConfig,
    ) -> Result<Self, EpidemicError> {
        let len = admissions.len();
        let window = config.admission_window;
        let smoothing = config.smoothing_window;
        let usable_len = len.saturating_sub(config.reporting_lag_days.max(window));
        let needed = smoothing + config.ar_order + 2;
        if usable_len < needed {
            return Err(EpidemicError::InsufficientHistory {
                needed: needed + config.reporting_lag_days.max(window),
                available: len,
            });
        }

        let d_i = draw.infectious_days;
        let d_e = draw.exposure_days;
        let mut susceptible = vec![0.0; len];
        let mut exposed = vec![0.0; len];
        let mut infectious = vec![0.0; len];
        let mut reproduction = vec![0.0; len];
        let mut smoothed_reproduction = vec![0.0; len];
        let mut hospitalization_residuals = vec![0.0; len];
        susceptible[0] = population;

        for x in 1..usable_len {
            let forward = stats::mean(&admissions[x..x + window]).unwrap_or(0.0);
            infectious[x] = (forward * d_i / draw.hospitalization_rate).max(0.0);
            exposed[x] = (infectious[x] - infectious[x - 1] + infectious[x - 1] / d_i) * d_e;

            let newly_exposed = exposed[x] - exposed[x - 1] + exposed[x - 1] / d_e;
            susceptible[x] = susceptible[x - 1] - newly_exposed;

            let contact = susceptible[x] * infectious[x];
            reproduction[x] = if contact > 0.0 {
                (d_i * newly_exposed * population / contact).max(0.0)
            } else {
                0.0
            };

            if forward > 0.0 {
                hospitalization_residuals[x] = (admissions[x + window] - forward) / forward;
            }

            if x >= smoothing {
                smoothed_reproduction[x] =
                    stats::mean(&reproduction[x - smoothing..x]).unwrap_or(0.0);
            }
        }

        Ok(Self {
            susceptible,
            exposed,
            infectious,
            reproduction,
            smoothed_reproduction,
            hospitalization_residuals,
            usable_len,
            smoothing_window: smoothing,
        })
    }

    /// `R_eff − MA(R_eff)` over the days where the moving average exists.
    pub fn smoothing_residuals(&self) -> Vec<f64> {
        (self.smoothing_window..self.usable_len)
            .map(|x| self.reproduction[x] - self.smoothed_reproduction[x])
            .collect()
    }

    pub fn state(&self, day: usize) -> [f64; 3] {
        [
            self.susceptible[day],
            self.exposed[day],
            self.infectious[day],
        ]
    }
}

/// Fill the zero days at the front of an admission record by walking backwards
/// from the first reported day at a fixed daily growth rate.
///
/// Each filled value is perturbed by a relative error drawn from how the first
/// `error_days` days after `calibration_start` deviated from the same growth
/// curve. Returns the number of days filled.
pub fn backfill_admissions<R: Rng>(
    admissions: &mut [f64],
    calibration_start: usize,
    growth: f64,
    error_days: usize,
    rng: &mut R,
) -> Result<usize, EpidemicError> {
    let Some(last_missing) = admissions.iter().rposition(|v| *v == 0.0) else {
        return Ok(0);
    };

    let len = admissions.len();
    let calibration_end = calibration_start + error_days.max(INITIAL_LEVEL_DAYS);
    if error_days == 0 || calibration_end > len {
        return Err(EpidemicError::InsufficientHistory {
            needed: calibration_end.max(calibration_start + 1),
            available: len,
        });
    }
    let initial = stats::mean(&admissions[calibration_start..calibration_start + INITIAL_LEVEL_DAYS])
        .unwrap_or(0.0);
    if initial <= 0.0 {
        return Err(EpidemicError::ZeroCalibrationLevel(calibration_start));
    }
    let errors: Vec<f64> = (0..error_days)
        .map(|k| {
            let expected = initial * (1.0 + growth).powi(k as i32);
            (admissions[calibration_start + k] - expected) / expected
        })
        .collect();

    let start_end = (last_missing + 1 + START_LEVEL_DAYS).min(len);
    let start_level = stats::mean(&admissions[last_missing + 1..start_end]).ok_or(
        EpidemicError::InsufficientHistory {
            needed: last_missing + 2,
            available: len,
        },
    )?;

    let mut estimate = start_level;
    let mut filled = 0;
    for day in (0..=last_missing).rev() {
        if admissions[day] != 0.0 {
            continue;
        }
        estimate /= 1.0 + growth;
        admissions[day] = estimate * (1.0 + errors[rng.gen_range(0..error_days)]);
        filled += 1;
    }
    debug!(filled, start_level, "back-filled missing admissions");
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn draw() -> DiseaseDraw {
        DiseaseDraw {
            infectious_days: 9.0,
            exposure_days: 2.0,
            hospitalization_rate: 0.02,
        }
    }

    #[test]
    fn test_constant_admissions_reconstruct_steady_state() {
        let admissions = vec![12.0; 120];
        let recon =
            Reconstruction::from_admissions(&admissions, &draw(), 1e15, &ProjectorConfig::default())
                .unwrap();
        assert_eq!(recon.usable_len, 110);

        let infectious = 12.0 * 9.0 / 0.02;
        for x in 1..recon.usable_len {
            assert_relative_eq!(recon.infectious[x], infectious, max_relative = 1e-12);
            assert_eq!(recon.hospitalization_residuals[x], 0.0);
        }
        for x in 3..recon.usable_len {
            assert_relative_eq!(recon.exposed[x], infectious * 2.0 / 9.0, max_relative = 1e-12);
            assert_relative_eq!(recon.reproduction[x], 1.0, max_relative = 1e-9);
        }
        for x in 17..recon.usable_len {
            assert_relative_eq!(recon.smoothed_reproduction[x], 1.0, max_relative = 1e-9);
        }
        assert_eq!(recon.smoothing_residuals().len(), 110 - 14);
        assert_eq!(recon.infectious[recon.usable_len], 0.0);
    }

    #[test]
    fn test_short_record_is_rejected() {
        let err = Reconstruction::from_admissions(
            &[1.0; 20],
            &draw(),
            1e6,
            &ProjectorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EpidemicError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_backfill_follows_growth_curve() {
        let mut admissions = vec![0.0; 5];
        admissions.extend((0..40).map(|k| 10.0 * 1.0126f64.powi(k)));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let filled = backfill_admissions(&mut admissions, 5, 0.0126, 20, &mut rng).unwrap();
        assert_eq!(filled, 5);

        let initial = admissions[5..10].iter().sum::<f64>() / 5.0;
        let errors: Vec<f64> = (0..20)
            .map(|k| {
                let curve = initial * 1.0126f64.powi(k);
                (admissions[5 + k as usize] - curve) / curve
            })
            .collect();

        let start_level = admissions[5..9].iter().sum::<f64>() / 4.0;
        let mut expected = start_level;
        for day in (0..5).rev() {
            expected /= 1.0126;
            let relative = admissions[day] / expected - 1.0;
            assert!(errors.iter().any(|e| (e - relative).abs() < 1e-9));
        }
    }

    #[test]
    fn test_backfill_without_gaps_is_a_no_op() {
        let mut admissions = vec![3.0; 40];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(
            backfill_admissions(&mut admissions, 0, 0.0126, 20, &mut rng).unwrap(),
            0
        );
        assert!(admissions.iter().all(|v| *v == 3.0));
    }

    #[test]
    fn test_backfill_needs_calibration_level() {
        let mut admissions = vec![0.0; 40];
        admissions[30] = 2.0;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let err = backfill_admissions(&mut admissions, 0, 0.0126, 20, &mut rng).unwrap_err();
        assert!(matches!(err, EpidemicError::ZeroCalibrationLevel(0)));
    }
}

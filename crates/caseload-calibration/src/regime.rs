//! Chained logistic fits of the three pandemic-response regimes

use chrono::Duration;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use caseload_core::{
    seasonal_slot, stats, Category, CoreError, DailySeries, LogisticCurve, PeriodIndices,
    PeriodSchedule, Regime, ResponseCurve, Signal, SignalTable,
};

use crate::baseline::SeasonalBaseline;
use crate::calibration_problem::CurveFitProblem;
use crate::error::CalibrationError;
use crate::optimization::{optimize, NelderMeadConfig, OptimizationConfig};
use crate::trend::TrendRatios;
use crate::types::{CalibrationParameter, CurveObservation, FallbackReason, FitOutcome, LossConfig};

/// Box used for the suspension regime, wide enough to act as unconstrained
const UNBOUNDED: f64 = 1e9;

/// Configuration for the regime curve fits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub optimizer: OptimizationConfig,

    /// Half-width of the box pinning a regime's start level to the previous
    /// regime's terminal value
    pub continuity_tolerance: f64,

    /// Bound on the magnitude of the end level of chained regimes
    pub end_level_bound: f64,

    /// `(min, max)` steepness of chained regimes
    pub steepness_bounds: (f64, f64),

    /// Steepness used by fallback curves
    pub fallback_steepness: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizationConfig::NelderMead(
                NelderMeadConfig::new()
                    .with_max_iterations(5000)
                    .with_sd_tolerance(1e-10),
            ),
            continuity_tolerance: 1e-6,
            end_level_bound: 9999.0,
            steepness_bounds: (0.1, 100.0),
            fallback_steepness: 0.1,
        }
    }
}

impl RegimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimizer(mut self, optimizer: OptimizationConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_continuity_tolerance(mut self, tolerance: f64) -> Self {
        self.continuity_tolerance = tolerance;
        self
    }
}

/// The three chained fits of one category and signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeCurves {
    pub suspension: FitOutcome,
    pub recovery: FitOutcome,
    pub voluntary_decline: FitOutcome,
}

impl RegimeCurves {
    pub fn outcome(&self, regime: Regime) -> &FitOutcome {
        match regime {
            Regime::Suspension => &self.suspension,
            Regime::Recovery => &self.recovery,
            Regime::VoluntaryDecline => &self.voluntary_decline,
        }
    }

    pub fn curve(&self, regime: Regime) -> &LogisticCurve {
        self.outcome(regime).curve()
    }

    pub fn fallback_count(&self) -> usize {
        Regime::ALL
            .iter()
            .filter(|r| self.outcome(**r).is_fallback())
            .count()
    }
}

/// Fitted regime curves per signal and category
pub type RegimeParameters = SignalTable<RegimeCurves>;

/// Deviation of each category from its trend-adjusted baseline, starting at the
/// study origin
pub type DeviationTable = SignalTable<DailySeries>;

/// `observed - baseline[slot] * ratio` from `origin` to the end of each series.
///
/// Categories without a trend ratio (the COVID-like category) are left out.
pub fn deviation_table(
    smoothed: &SignalTable<DailySeries>,
    baseline: &SeasonalBaseline,
    ratios: &TrendRatios,
    origin: chrono::NaiveDate,
) -> Result<DeviationTable, CalibrationError> {
    let mut table = DeviationTable::default();
    for signal in Signal::ALL {
        for (category, ratio) in ratios.get(signal) {
            let series = smoothed.require(signal, category)?;
            let slots = baseline.slots(signal, category)?;
            let first = series.index_of(origin)?;
            let values = series.values()[first..]
                .iter()
                .enumerate()
                .map(|(t, observed)| {
                    let date = origin + Duration::days(t as i64);
                    observed - slots[seasonal_slot(date)] * ratio
                })
                .collect();
            table
                .get_mut(signal)
                .insert(*category, DailySeries::new(origin, values));
        }
    }
    Ok(table)
}

/// Fits the three regimes for every category and signal
#[derive(Debug, Clone, Default)]
pub struct RegimeCalibrator {
    config: RegimeConfig,
}

impl RegimeCalibrator {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Fit every series of `deviations` against `schedule`. Categories are
    /// independent and are fitted in parallel.
    pub fn calibrate(
        &self,
        deviations: &DeviationTable,
        schedule: &PeriodSchedule,
    ) -> Result<RegimeParameters, CalibrationError> {
        schedule.validate()?;
        let periods = [
            schedule.indices(Regime::Suspension)?,
            schedule.indices(Regime::Recovery)?,
            schedule.indices(Regime::VoluntaryDecline)?,
        ];

        let jobs: Vec<(Signal, Category, &[f64])> = Signal::ALL
            .iter()
            .flat_map(|signal| {
                deviations
                    .get(*signal)
                    .iter()
                    .filter(|(category, _)| !category.is_covid_like())
                    .map(move |(category, series)| (*signal, *category, series.values()))
            })
            .collect();

        let fitted = jobs
            .par_iter()
            .map(|(signal, category, values)| -> Result<_, CalibrationError> {
                let curves = self.fit_series(values, &periods).map_err(|e| {
                    debug!(%category, %signal, error = %e, "regime fit failed");
                    e
                })?;
                for regime in Regime::ALL {
                    if let FitOutcome::FallbackUsed { reason, .. } = curves.outcome(regime) {
                        warn!(%category, %signal, %regime, %reason, "regime fit fell back to default curve");
                    }
                }
                Ok((*signal, *category, curves))
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;

        let mut parameters = RegimeParameters::default();
        let mut fallbacks = 0;
        for (signal, category, curves) in fitted {
            fallbacks += curves.fallback_count();
            parameters.get_mut(signal).insert(category, curves);
        }
        info!(series = jobs.len(), fallbacks, "calibrated regime curves");
        Ok(parameters)
    }

    /// Fit the three regimes of one deviation series in sequence, each chained
    /// regime starting where the previous one's curve stands at its end window
    pub fn fit_series(
        &self,
        deviation: &[f64],
        periods: &[PeriodIndices; 3],
    ) -> Result<RegimeCurves, CalibrationError> {
        let suspension = self.fit_period(deviation, &periods[0], None)?;
        let anchor = suspension
            .curve()
            .evaluate(periods[0].terminal_offset() as f64);
        let recovery = self.fit_period(deviation, &periods[1], Some(anchor))?;
        let anchor = recovery.curve().evaluate(periods[1].terminal_offset() as f64);
        let voluntary_decline = self.fit_period(deviation, &periods[2], Some(anchor))?;

        Ok(RegimeCurves {
            suspension,
            recovery,
            voluntary_decline,
        })
    }

    fn fit_period(
        &self,
        deviation: &[f64],
        period: &PeriodIndices,
        anchor: Option<f64>,
    ) -> Result<FitOutcome, CalibrationError> {
        let range = period.fit_range();
        if range.end > deviation.len() {
            return Err(CoreError::EmptyWindow {
                what: "regime fit window".to_string(),
                start: range.start,
                end: range.end,
            }
            .into());
        }
        let window_mean = |r: std::ops::Range<usize>| {
            stats::mean(&deviation[r.clone()]).ok_or(CoreError::EmptyWindow {
                what: "regime level window".to_string(),
                start: r.start,
                end: r.end,
            })
        };
        let start_level = window_mean(period.start.clone())?;
        let end_level = window_mean(period.end.clone())?;
        let len = period.fit_len() as f64;
        let midpoint = len / 2.0;

        let config = &self.config;
        let (parameters, fallback) = match anchor {
            None => (
                vec![
                    CalibrationParameter::with_initial_guess("start", -UNBOUNDED, UNBOUNDED, start_level),
                    CalibrationParameter::with_initial_guess("end", -UNBOUNDED, UNBOUNDED, end_level),
                    CalibrationParameter::with_initial_guess("steepness", -UNBOUNDED, UNBOUNDED, 1.0),
                    CalibrationParameter::with_initial_guess("midpoint", -UNBOUNDED, UNBOUNDED, midpoint),
                ],
                LogisticCurve::new(start_level, end_level, config.fallback_steepness, midpoint),
            ),
            Some(anchor) => {
                let (k_min, k_max) = config.steepness_bounds;
                (
                    vec![
                        CalibrationParameter::pinned("start", anchor, config.continuity_tolerance),
                        CalibrationParameter::with_initial_guess(
                            "end",
                            -config.end_level_bound,
                            config.end_level_bound,
                            end_level
                                .max(-config.end_level_bound)
                                .min(config.end_level_bound),
                        ),
                        CalibrationParameter::with_initial_guess(
                            "steepness",
                            k_min,
                            k_max,
                            1.0_f64.max(k_min).min(k_max),
                        ),
                        CalibrationParameter::with_initial_guess("midpoint", 0.0, len, midpoint),
                    ],
                    LogisticCurve::new(anchor, end_level, config.fallback_steepness, midpoint),
                )
            }
        };

        let problem = CurveFitProblem::<LogisticCurve>::new(
            CurveObservation::from_daily(&deviation[range]),
            parameters,
            LossConfig::SumSquaredError,
        )?;

        let outcome = match optimize(problem, &config.optimizer) {
            Err(e) => FitOutcome::FallbackUsed {
                curve: fallback,
                reason: FallbackReason::OptimizerError(e.to_string()),
            },
            Ok(result) if !result.converged => FitOutcome::FallbackUsed {
                curve: fallback,
                reason: FallbackReason::NotConverged {
                    iterations: result.iterations,
                    termination: result.termination_reason,
                },
            },
            Ok(result) => {
                let curve = LogisticCurve::from_parameters(&result.best_parameters);
                if curve.is_finite() && result.final_loss.is_finite() {
                    FitOutcome::Converged {
                        curve,
                        loss: result.final_loss,
                    }
                } else {
                    FitOutcome::FallbackUsed {
                        curve: fallback,
                        reason: FallbackReason::NonFinite,
                    }
                }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use caseload_core::CategoryMap;
    use chrono::NaiveDate;

    fn synthetic_deviation(schedule: &PeriodSchedule) -> Vec<f64> {
        let p1 = LogisticCurve::new(0.0, -20.0, 0.4, 15.0);
        let p2 = LogisticCurve::new(-20.0, -4.0, 0.1, 60.0);
        let p3 = LogisticCurve::new(-4.0, -9.0, 0.2, 50.0);
        let len = schedule.fit_end().unwrap() + 10;
        let mut values = vec![0.0; len];
        for (regime, curve) in Regime::ALL.iter().zip([p1, p2, p3]) {
            let range = schedule.indices(*regime).unwrap().fit_range();
            for t in range.clone() {
                values[t] = curve.evaluate((t - range.start) as f64);
            }
        }
        values
    }

    #[test]
    fn test_chained_regimes_are_continuous() {
        let schedule = PeriodSchedule::default();
        let periods = [
            schedule.indices(Regime::Suspension).unwrap(),
            schedule.indices(Regime::Recovery).unwrap(),
            schedule.indices(Regime::VoluntaryDecline).unwrap(),
        ];
        let calibrator = RegimeCalibrator::default();
        let curves = calibrator
            .fit_series(&synthetic_deviation(&schedule), &periods)
            .unwrap();

        for (index, regime) in [Regime::Recovery, Regime::VoluntaryDecline].iter().enumerate() {
            let previous = curves.curve(Regime::ALL[index]);
            let terminal = previous.evaluate(periods[index].terminal_offset() as f64);
            assert!((curves.curve(*regime).start - terminal).abs() <= 1e-6 + 1e-12);
        }
    }

    #[test]
    fn test_fitted_curve_is_symmetric_at_midpoint() {
        let schedule = PeriodSchedule::default();
        let periods = [
            schedule.indices(Regime::Suspension).unwrap(),
            schedule.indices(Regime::Recovery).unwrap(),
            schedule.indices(Regime::VoluntaryDecline).unwrap(),
        ];
        let curves = RegimeCalibrator::default()
            .fit_series(&synthetic_deviation(&schedule), &periods)
            .unwrap();
        for regime in Regime::ALL {
            let curve = curves.curve(regime);
            assert_relative_eq!(
                curve.evaluate(curve.midpoint),
                (curve.start + curve.end) / 2.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_non_convergence_uses_fallback() {
        let schedule = PeriodSchedule::default();
        let periods = [
            schedule.indices(Regime::Suspension).unwrap(),
            schedule.indices(Regime::Recovery).unwrap(),
            schedule.indices(Regime::VoluntaryDecline).unwrap(),
        ];
        let config = RegimeConfig::default().with_optimizer(OptimizationConfig::NelderMead(
            NelderMeadConfig::new()
                .with_max_iterations(1)
                .with_sd_tolerance(0.0),
        ));
        let curves = RegimeCalibrator::new(config)
            .fit_series(&synthetic_deviation(&schedule), &periods)
            .unwrap();
        assert_eq!(curves.fallback_count(), 3);

        let suspension = curves.curve(Regime::Suspension);
        assert_eq!(suspension.steepness, 0.1);
        assert_eq!(suspension.midpoint, 30.0);

        let anchor = suspension.evaluate(periods[0].terminal_offset() as f64);
        assert_eq!(curves.curve(Regime::Recovery).start, anchor);
    }

    #[test]
    fn test_short_series_is_an_input_fault() {
        let schedule = PeriodSchedule::default();
        let periods = [
            schedule.indices(Regime::Suspension).unwrap(),
            schedule.indices(Regime::Recovery).unwrap(),
            schedule.indices(Regime::VoluntaryDecline).unwrap(),
        ];
        let result = RegimeCalibrator::default().fit_series(&[0.0; 100], &periods);
        assert!(result.is_err());
    }

    #[test]
    fn test_deviation_table_subtracts_scaled_baseline() {
        let category: Category = "EI_02".parse().unwrap();
        let origin = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let mut admissions = CategoryMap::new();
        admissions.insert(category, DailySeries::new(origin, vec![10.0; 900]));
        let mut case_weight = CategoryMap::new();
        case_weight.insert(category, DailySeries::new(origin, vec![20.0; 900]));
        let smoothed = SignalTable::new(admissions, case_weight);

        let baseline =
            crate::baseline::estimate_baseline(&smoothed, &crate::baseline::BaselineConfig::default())
                .unwrap();
        let mut ratios = TrendRatios::default();
        ratios.admissions.insert(category, 0.5);
        ratios.case_weight.insert(category, 1.0);

        let study = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let table = deviation_table(&smoothed, &baseline, &ratios, study).unwrap();
        let admissions = table.require(Signal::Admissions, &category).unwrap();
        assert_eq!(admissions.origin(), study);
        assert_eq!(admissions.len(), 900 - 790);
        assert_relative_eq!(admissions.values()[0], 5.0);
        let weights = table.require(Signal::CaseWeight, &category).unwrap();
        assert_relative_eq!(weights.values()[3], 0.0);
        assert!(LogisticCurve::parameter_names().len() == 4);
    }
}

//! Action versus no-action workload simulation
//!
//! Before the simulation start the fitted regime curves are replayed against
//! the observed record and the gap between the two becomes the error series.
//! From the simulation start on, each branch moves through the policy state
//! machine, its deviations come from the regime curves chained at the branch's
//! trigger timesteps, and AR-extended errors are added back on.

use std::fmt;
use std::ops::Range;

use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use caseload_calibration::{IcuCoefficients, RegimeCurves, RegimeParameters, SeasonalBaseline, TrendRatios};
use caseload_core::{
    stats, Category, CategoryMap, CoreError, DailySeries, PeriodSchedule, Regime, Signal, SignalTable,
};

use crate::curves::{deviation, historical_deviation, CurveTiming};
use crate::error::SimulationError;
use crate::policy::{
    transition, Branch, PolicyMode, PolicyObservation, PolicyRules, PolicyState, PolicyThresholds,
};
use crate::residuals::{BinnedResiduals, ResidualConfig};

/// Which observed days the recovery curves converge back to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAnchor {
    /// The most recent days before the simulation start
    #[default]
    Trailing,
    /// The first days of the study window
    Leading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub thresholds: PolicyThresholds,
    /// Days after the simulation start before patients may return on their own
    pub voluntary_return_delay: usize,
    /// Days into the suspension curve at which a new suspension starts
    pub suspension_offset_days: usize,
    pub recovery_anchor: RecoveryAnchor,
    pub anchor_days: usize,
    /// Window of the COVID ICU trend used to release a suspension
    pub trend_days: usize,
    pub residual: ResidualConfig,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            thresholds: PolicyThresholds::default(),
            voluntary_return_delay: 15,
            suspension_offset_days: 14,
            recovery_anchor: RecoveryAnchor::default(),
            anchor_days: 10,
            trend_days: 10,
            residual: ResidualConfig::default(),
            seed: 234_123_415_125_321,
        }
    }
}

impl SimulatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_recovery_anchor(mut self, anchor: RecoveryAnchor) -> Self {
        self.recovery_anchor = anchor;
        self
    }

    pub fn with_thresholds(mut self, thresholds: PolicyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Regional workload measures tracked per branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Admissions,
    CaseWeight,
    Icu,
}

impl Measure {
    pub const ALL: [Measure; 3] = [Measure::Admissions, Measure::CaseWeight, Measure::Icu];

    fn residual_stream(&self) -> u64 {
        match self {
            Measure::Admissions => 0,
            Measure::CaseWeight => 1,
            Measure::Icu => 2,
        }
    }
}

impl From<Signal> for Measure {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Admissions => Measure::Admissions,
            Signal::CaseWeight => Measure::CaseWeight,
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Admissions => write!(f, "admissions"),
            Measure::CaseWeight => write!(f, "case_weight"),
            Measure::Icu => write!(f, "icu"),
        }
    }
}

/// Daily regional totals of each measure, on the study axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub admissions: Vec<f64>,
    pub case_weight: Vec<f64>,
    pub icu: Vec<f64>,
}

impl Workload {
    pub fn zeros(len: usize) -> Self {
        Self {
            admissions: vec![0.0; len],
            case_weight: vec![0.0; len],
            icu: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.admissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admissions.is_empty()
    }

    pub fn get(&self, measure: Measure) -> &[f64] {
        match measure {
            Measure::Admissions => &self.admissions,
            Measure::CaseWeight => &self.case_weight,
            Measure::Icu => &self.icu,
        }
    }

    pub fn get_mut(&mut self, measure: Measure) -> &mut Vec<f64> {
        match measure {
            Measure::Admissions => &mut self.admissions,
            Measure::CaseWeight => &mut self.case_weight,
            Measure::Icu => &mut self.icu,
        }
    }

    /// Day-by-day difference from `baseline` over their common length
    pub fn minus(&self, baseline: &Workload) -> Workload {
        let diff = |a: &[f64], b: &[f64]| -> Vec<f64> { a.iter().zip(b).map(|(x, y)| x - y).collect() };
        Workload {
            admissions: diff(&self.admissions, &baseline.admissions),
            case_weight: diff(&self.case_weight, &baseline.case_weight),
            icu: diff(&self.icu, &baseline.icu),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTrajectory {
    pub branch: Branch,
    /// Observed record before the simulation start, simulated after
    pub workload: Workload,
    pub deviation: Workload,
    /// Mode on each day from the simulation start
    pub modes: Vec<PolicyMode>,
    pub final_state: PolicyState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub origin: NaiveDate,
    pub simulation_start: usize,
    /// Observed totals up to the simulation start
    pub observed: Workload,
    /// Trend-adjusted seasonal expectation over the whole horizon
    pub baseline: Workload,
    /// Fitted-versus-observed errors, AR-extended past the simulation start
    pub errors: Workload,
    pub action: BranchTrajectory,
    pub no_action: BranchTrajectory,
}

impl ScenarioOutcome {
    pub fn branch(&self, branch: Branch) -> &BranchTrajectory {
        match branch {
            Branch::Action => &self.action,
            Branch::NoAction => &self.no_action,
        }
    }
}

/// Calibrated parameters and projected COVID load for one scenario run.
///
/// Every day index is an offset from the schedule origin.
pub struct SimulationInputs<'a> {
    pub schedule: &'a PeriodSchedule,
    /// Smoothed observed admissions and case-weight per category
    pub observed: &'a SignalTable<DailySeries>,
    pub baseline: &'a SeasonalBaseline,
    pub ratios: &'a TrendRatios,
    pub regimes: &'a RegimeParameters,
    pub icu: &'a IcuCoefficients,
    pub non_covid_icu: &'a DailySeries,
    pub icu_capacity: f64,
    pub covid_admissions: &'a [f64],
    pub covid_icu: &'a [f64],
    pub simulation_start: usize,
    pub horizon: usize,
}

struct CategoryProfile<'a> {
    curves: [&'a RegimeCurves; 2],
    ratios: [f64; 2],
    /// Mean observed admissions over the ICU baseline window
    baseline_admissions: f64,
    /// Mean of the seasonal admissions calendar, trend adjusted
    annual_admissions: f64,
    anchor_admissions: f64,
    case_weight_target: f64,
}

impl CategoryProfile<'_> {
    fn curves(&self, signal: Signal) -> &RegimeCurves {
        self.curves[signal_slot(signal)]
    }

    fn ratio(&self, signal: Signal) -> f64 {
        self.ratios[signal_slot(signal)]
    }
}

fn signal_slot(signal: Signal) -> usize {
    match signal {
        Signal::Admissions => 0,
        Signal::CaseWeight => 1,
    }
}

struct BranchRun {
    state: PolicyState,
    workload: Workload,
    modes: Vec<PolicyMode>,
}

fn day(origin: NaiveDate, t: usize) -> NaiveDate {
    origin + Duration::days(t as i64)
}

/// Mean of `series` over a range of study-axis days
fn study_mean(series: &DailySeries, origin: NaiveDate, range: Range<usize>) -> Result<f64, CoreError> {
    let first = series.index_of(day(origin, range.start))?;
    series.window_mean(first, first + range.len())
}

fn study_sum(series: &DailySeries, origin: NaiveDate, range: Range<usize>) -> Result<f64, CoreError> {
    let first = series.index_of(day(origin, range.start))?;
    Ok(series.window(first, first + range.len())?.iter().sum())
}

pub struct ScenarioSimulator {
    config: SimulatorConfig,
}

impl ScenarioSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn check_inputs(&self, inputs: &SimulationInputs<'_>) -> Result<(), SimulationError> {
        let start = inputs.simulation_start;
        if self.config.trend_days < 2 {
            return Err(SimulationError::InvalidConfig {
                field: "trend_days".to_string(),
                reason: format!("must be at least 2, got {}", self.config.trend_days),
            });
        }
        if start == 0 {
            return Err(SimulationError::InsufficientHistory {
                what: "scenario simulation".to_string(),
                needed: 1,
                available: 0,
            });
        }
        if inputs.horizon <= start {
            return Err(CoreError::EmptyWindow {
                what: "simulation horizon".to_string(),
                start,
                end: inputs.horizon,
            }
            .into());
        }
        for (what, series) in [
            ("projected COVID admissions", inputs.covid_admissions),
            ("projected COVID ICU census", inputs.covid_icu),
        ] {
            if series.len() < inputs.horizon {
                return Err(CoreError::LengthMismatch {
                    what: what.to_string(),
                    expected: inputs.horizon,
                    actual: series.len(),
                }
                .into());
            }
        }

        let residual = &self.config.residual;
        for (what, (far, near)) in [
            ("volume residual window", residual.volume_window),
            ("ICU residual window", residual.icu_window),
        ] {
            if near >= far {
                return Err(CoreError::EmptyWindow {
                    what: what.to_string(),
                    start: far,
                    end: near,
                }
                .into());
            }
        }
        let needed = [
            residual.volume_window.0,
            residual.icu_window.0,
            self.config.anchor_days,
            self.config.trend_days,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if start < needed {
            return Err(SimulationError::InsufficientHistory {
                what: "scenario simulation".to_string(),
                needed,
                available: start,
            });
        }
        Ok(())
    }

    fn profiles<'a>(
        &self,
        inputs: &SimulationInputs<'a>,
        baseline_window: &Range<usize>,
    ) -> Result<CategoryMap<CategoryProfile<'a>>, SimulationError> {
        let origin = inputs.schedule.origin;
        let start = inputs.simulation_start;
        let anchor = match self.config.recovery_anchor {
            RecoveryAnchor::Trailing => start - self.config.anchor_days..start,
            RecoveryAnchor::Leading => 0..self.config.anchor_days,
        };

        let mut profiles = CategoryMap::new();
        for category in inputs.regimes.admissions.keys().filter(|c| c.is_diagnostic()) {
            let curves = [
                inputs.regimes.require(Signal::Admissions, category)?,
                inputs.regimes.require(Signal::CaseWeight, category)?,
            ];
            let ratios = [
                *inputs.ratios.require(Signal::Admissions, category)?,
                *inputs.ratios.require(Signal::CaseWeight, category)?,
            ];
            let admissions = inputs.observed.require(Signal::Admissions, category)?;
            let slots = inputs.baseline.slots(Signal::Admissions, category)?;
            profiles.insert(
                *category,
                CategoryProfile {
                    curves,
                    ratios,
                    baseline_admissions: study_mean(admissions, origin, baseline_window.clone())?,
                    annual_admissions: stats::mean(slots).unwrap_or(0.0) * ratios[0],
                    anchor_admissions: study_mean(admissions, origin, anchor.clone())?,
                    case_weight_target: curves[1].curve(Regime::Suspension).evaluate(0.0),
                },
            );
        }
        Ok(profiles)
    }

    /// COVID case-weight per COVID admission over the observed record
    fn covid_case_weight_rate(&self, inputs: &SimulationInputs<'_>) -> Result<f64, SimulationError> {
        let covid = Category::CovidLike;
        let (Some(admissions), Some(case_weight)) = (
            inputs.observed.admissions.get(&covid),
            inputs.observed.case_weight.get(&covid),
        ) else {
            return Ok(0.0);
        };
        let origin = inputs.schedule.origin;
        let history = 0..inputs.simulation_start;
        let admitted = study_sum(admissions, origin, history.clone())?;
        if admitted == 0.0 {
            return Err(CoreError::ZeroDenominator("COVID case-weight per admission".to_string()).into());
        }
        Ok(study_sum(case_weight, origin, history)? / admitted)
    }

    pub fn simulate(&self, inputs: &SimulationInputs<'_>) -> Result<ScenarioOutcome, SimulationError> {
        self.check_inputs(inputs)?;
        let config = &self.config;
        let schedule = inputs.schedule;
        let origin = schedule.origin;
        let start = inputs.simulation_start;
        let horizon = inputs.horizon;

        let baseline_window = schedule.indices(Regime::VoluntaryDecline)?.start;
        let profiles = self.profiles(inputs, &baseline_window)?;
        let baseline_icu = study_mean(inputs.non_covid_icu, origin, baseline_window)?;
        let covid_rate = self.covid_case_weight_rate(inputs)?;
        let covid_case_weight = inputs.observed.case_weight.get(&Category::CovidLike);
        info!(
            categories = profiles.len(),
            simulation_start = start,
            horizon,
            baseline_icu,
            covid_rate,
            "simulating scenario"
        );

        let mut baseline = Workload::zeros(horizon);
        for t in 0..horizon {
            let date = day(origin, t);
            for (category, profile) in &profiles {
                for signal in Signal::ALL {
                    let expected = inputs.baseline.expected(signal, category, date)? * profile.ratio(signal);
                    baseline.get_mut(signal.into())[t] += expected;
                }
            }
            baseline.icu[t] = baseline_icu;
        }

        let mut observed = Workload::zeros(start);
        let mut synthetic = Workload::zeros(start);
        for t in 0..start {
            let date = day(origin, t);
            let mut drops = CategoryMap::new();
            for (category, profile) in &profiles {
                for signal in Signal::ALL {
                    let delta = historical_deviation(profile.curves(signal), schedule, t)?;
                    let expected = inputs.baseline.expected(signal, category, date)? * profile.ratio(signal);
                    let seen = inputs.observed.require(signal, category)?.value_on(date)?;
                    synthetic.get_mut(signal.into())[t] += delta + expected;
                    observed.get_mut(signal.into())[t] += seen;
                    if signal == Signal::Admissions {
                        drops.insert(*category, profile.baseline_admissions - seen);
                    }
                }
            }
            if let Some(series) = covid_case_weight {
                let covid = series.value_on(date)?;
                synthetic.case_weight[t] += covid;
                observed.case_weight[t] += covid;
            }

            let fitted_icu = baseline_icu - inputs.icu.predict(&drops)?;
            let seen_icu = inputs.non_covid_icu.value_on(date)?;
            observed.icu[t] = if seen_icu < 1.0 { fitted_icu } else { seen_icu };
            synthetic.icu[t] = fitted_icu;
        }

        let mut errors = Workload::zeros(horizon);
        for measure in Measure::ALL {
            let column = errors.get_mut(measure);
            let history = observed.get(measure).iter().zip(synthetic.get(measure));
            for (t, (seen, fitted)) in history.enumerate() {
                column[t] = seen - fitted;
            }
            let (far, near) = match measure {
                Measure::Icu => config.residual.icu_window,
                _ => config.residual.volume_window,
            };
            let model = BinnedResiduals::fit(
                &column[start - far..start - near],
                config.residual.order,
                config.residual.bins,
            )?;
            debug!(%measure, coefficients = ?model.model().coefficients(), "residual model");
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            rng.set_stream(measure.residual_stream());
            model.extend(column, start, &mut rng);
        }

        let rules = PolicyRules::new(inputs.icu_capacity, start + config.voluntary_return_delay)
            .with_thresholds(config.thresholds);
        let timing = CurveTiming::from_schedule(schedule, config.suspension_offset_days)?;
        let mut runs = [Branch::Action, Branch::NoAction].map(|branch| {
            let mut workload = Workload::zeros(horizon);
            for measure in Measure::ALL {
                workload.get_mut(measure)[..start].copy_from_slice(observed.get(measure));
            }
            BranchRun {
                state: PolicyState::new(branch),
                workload,
                modes: Vec::with_capacity(horizon - start),
            }
        });

        let covid_icu = inputs.covid_icu;
        let trend_days = config.trend_days;
        let mut peak = 0.0_f64;
        for t in start..horizon {
            let date = day(origin, t);
            peak = peak.max(stats::mean(&covid_icu[t - trend_days..t]).unwrap_or(0.0));
            let recent = stats::mean(&covid_icu[t - trend_days..t - 1]).unwrap_or(0.0);

            for run in runs.iter_mut() {
                let observation = PolicyObservation {
                    timestep: t,
                    icu_census: run.workload.icu[t - 1] + covid_icu[t - 1],
                    recent_trend: recent,
                    peak_trend: peak,
                };
                let next = transition(&run.state, &observation, &rules);
                next.validate()
                    .map_err(|violation| SimulationError::PolicyInvariant {
                        timestep: t,
                        branch: next.branch,
                        state: format!("{}: {:?}", violation, next),
                    })?;
                if next.mode != run.state.mode {
                    debug!(branch = %next.branch, t, from = %run.state.mode, to = %next.mode, "policy transition");
                }
                run.state = next;
                run.modes.push(run.state.mode);

                let mut drops = CategoryMap::new();
                let mut totals = [0.0; 2];
                for (category, profile) in &profiles {
                    for signal in Signal::ALL {
                        let expected = inputs.baseline.expected(signal, category, date)? * profile.ratio(signal);
                        let target = match signal {
                            Signal::Admissions => profile.anchor_admissions - expected,
                            Signal::CaseWeight => profile.case_weight_target,
                        };
                        let delta = deviation(&run.state, profile.curves(signal), target, t, &timing);
                        totals[signal_slot(signal)] += delta + expected;
                        if signal == Signal::Admissions {
                            drops.insert(
                                *category,
                                profile.baseline_admissions - delta - profile.annual_admissions,
                            );
                        }
                    }
                }

                let workload = &mut run.workload;
                workload.admissions[t] = totals[0] + errors.admissions[t];
                workload.case_weight[t] =
                    totals[1] + covid_rate * inputs.covid_admissions[t] + errors.case_weight[t];
                workload.icu[t] = baseline_icu - inputs.icu.predict(&drops)? + errors.icu[t];
            }
        }

        let [action, no_action] = runs.map(|run| BranchTrajectory {
            branch: run.state.branch,
            deviation: run.workload.minus(&baseline),
            workload: run.workload,
            modes: run.modes,
            final_state: run.state,
        });
        info!(
            action_mode = %action.final_state.mode,
            suspended_at = ?action.final_state.suspended_at,
            recovering_at = ?action.final_state.recovering_at,
            "scenario simulated"
        );

        Ok(ScenarioOutcome {
            origin,
            simulation_start: start,
            observed,
            baseline,
            errors,
            action,
            no_action,
        })
    }
}

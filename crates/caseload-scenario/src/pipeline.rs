//! End-to-end run: aggregation, calibration, projection and simulation

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use caseload_calibration::{
    calibrate_icu, deviation_table, estimate_baseline, non_covid_icu, pre_onset_ratios,
    BaselineConfig, IcuCoefficients, IcuRegressionConfig, RegimeCalibrator, RegimeConfig,
    RegimeParameters, SeasonalBaseline, TrendRatios,
};
use caseload_core::{
    aggregate_region, CategoryMap, CategoryTable, CensusMetric, DailySeries, DateWindow,
    DropoutRule, FacilityCensus, PeriodSchedule, RegionalCensus, SignalTable,
};
use caseload_epidemic::{
    Compartment, EpidemicProjector, PercentileEnsemble, ProjectorConfig, TransmissionScenario,
};

use crate::error::SimulationError;
use crate::oxygen::{EquipmentCensus, OxygenConfig, OxygenTranslator, UsageTable};
use crate::simulator::{ScenarioOutcome, ScenarioSimulator, SimulationInputs, SimulatorConfig};

/// Everything the ingestion layer delivers for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBundle {
    /// Name of the region being simulated
    pub region: String,
    pub facilities: Vec<FacilityCensus>,
    /// Name of the subset of facilities the category table was recorded at
    pub detailed_region: String,
    pub detailed_facilities: Vec<FacilityCensus>,
    pub categories: CategoryTable,
    pub usage: UsageTable,
    pub population: f64,
}

impl InputBundle {
    pub fn from_json_file(path: &Path) -> Result<Self, SimulationError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schedule: PeriodSchedule,
    pub dropout: DropoutRule,
    pub baseline: BaselineConfig,
    /// Window the pre-onset trend ratios are measured over
    pub trend_window: DateWindow,
    /// Trailing moving average applied to the category table
    pub smoothing_window: usize,
    pub regime: RegimeConfig,
    pub icu: IcuRegressionConfig,
    pub projector: ProjectorConfig,
    pub scenarios: Vec<TransmissionScenario>,
    /// First day whose admissions are used to back-fill the early record
    pub calibration_start: NaiveDate,
    pub simulation_start: NaiveDate,
    pub oxygen: OxygenConfig,
    /// Hospitalization percentile level that drives the equipment census
    pub driving_level: usize,
    pub simulator: SimulatorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schedule: PeriodSchedule::default(),
            dropout: DropoutRule::default(),
            baseline: BaselineConfig::default(),
            trend_window: DateWindow::new(ymd(2020, 1, 1), ymd(2020, 3, 1)),
            smoothing_window: 7,
            regime: RegimeConfig::default(),
            icu: IcuRegressionConfig::default(),
            projector: ProjectorConfig::default(),
            scenarios: TransmissionScenario::defaults(),
            calibration_start: ymd(2020, 6, 4),
            simulation_start: ymd(2021, 1, 16),
            oxygen: OxygenConfig::default(),
            driving_level: 3,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SimulationError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Seed both the epidemic projector and the residual draws
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.projector.seed = seed;
        self.simulator.seed = seed;
        self
    }

    pub fn with_projector(mut self, projector: ProjectorConfig) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_simulation_start(mut self, date: NaiveDate) -> Self {
        self.simulation_start = date;
        self
    }

    fn day_index(&self, date: NaiveDate, what: &str) -> Result<usize, SimulationError> {
        let offset = (date - self.schedule.origin).num_days();
        usize::try_from(offset).map_err(|_| SimulationError::DateBeforeOrigin {
            what: what.to_string(),
            date,
            origin: self.schedule.origin,
        })
    }

    /// Reject settings that can only fail once the projection has run.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.driving_level > self.projector.gradations {
            return Err(SimulationError::InvalidConfig {
                field: "driving_level".to_string(),
                reason: format!(
                    "percentile level {} exceeds the {} projector gradations",
                    self.driving_level, self.projector.gradations
                ),
            });
        }
        self.day_index(self.calibration_start, "calibration start")?;
        self.day_index(self.simulation_start, "simulation start")?;
        Ok(())
    }
}

/// Calibrated parameters shared by every transmission scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    pub regional: RegionalCensus,
    pub detailed: RegionalCensus,
    pub capacity_ratio: f64,
    /// Category table smoothed and scaled to the simulated region
    pub smoothed: SignalTable<DailySeries>,
    pub baseline: SeasonalBaseline,
    pub ratios: TrendRatios,
    pub regimes: RegimeParameters,
    pub icu: IcuCoefficients,
    pub non_covid_icu: DailySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    pub scenario: TransmissionScenario,
    pub ensemble: PercentileEnsemble,
    pub equipment: EquipmentCensus,
    pub outcome: ScenarioOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub calibration: Calibration,
    pub scenarios: Vec<ScenarioRun>,
}

/// Aggregate the census and fit every calibration stage.
pub fn calibrate(bundle: &InputBundle, config: &PipelineConfig) -> Result<Calibration, SimulationError> {
    let origin = config.schedule.origin;
    config.validate()?;
    config.schedule.validate()?;

    let regional = aggregate_region(&bundle.region, &bundle.facilities, origin, &config.dropout)?;
    let detailed = aggregate_region(
        &bundle.detailed_region,
        &bundle.detailed_facilities,
        origin,
        &config.dropout,
    )?;
    let capacity_ratio = regional.capacity_ratio(&detailed)?;
    info!(region = %regional.name, days = regional.len(), capacity_ratio, "aggregated census");

    let smoothed = bundle
        .categories
        .smoothed(config.smoothing_window, capacity_ratio)?;
    let baseline = estimate_baseline(&smoothed, &config.baseline)?;
    let ratios = pre_onset_ratios(&smoothed, &baseline, &config.trend_window)?;
    let deviations = deviation_table(&smoothed, &baseline, &ratios, origin)?;
    let regimes = RegimeCalibrator::new(config.regime.clone()).calibrate(&deviations, &config.schedule)?;

    let diagnostic: CategoryMap<DailySeries> = smoothed
        .admissions
        .iter()
        .filter(|(category, _)| category.is_diagnostic())
        .map(|(category, series)| (*category, series.clone()))
        .collect();
    let total_icu = regional.series(CensusMetric::TotalIcuCensus)?;
    let covid_icu = regional.series(CensusMetric::CovidIcuCensus)?;
    let icu = calibrate_icu(&diagnostic, total_icu, covid_icu, &config.icu)?;
    let non_covid = DailySeries::new(
        origin,
        non_covid_icu(total_icu.values(), covid_icu.values())?,
    );
    info!(
        regressors = icu.coefficients.len(),
        intercept = icu.intercept,
        "calibrated ICU regression"
    );

    Ok(Calibration {
        regional,
        detailed,
        capacity_ratio,
        smoothed,
        baseline,
        ratios,
        regimes,
        icu,
        non_covid_icu: non_covid,
    })
}

/// Project one transmission scenario and simulate both policy branches under it.
pub fn run_scenario(
    bundle: &InputBundle,
    calibration: &Calibration,
    config: &PipelineConfig,
    scenario: &TransmissionScenario,
) -> Result<ScenarioRun, SimulationError> {
    config.validate()?;
    let simulation_start = config.day_index(config.simulation_start, "simulation start")?;
    let calibration_start = config.day_index(config.calibration_start, "calibration start")?;
    let admissions = calibration.regional.values(CensusMetric::Admissions)?;

    let projector = EpidemicProjector::new(config.projector.clone());
    let ensemble = projector
        .project(
            admissions,
            bundle.population,
            simulation_start,
            calibration_start,
            scenario,
        )?
        .percentiles(config.projector.gradations);
    let horizon = ensemble.horizon();
    let hospitalizations = ensemble
        .level(Compartment::Hospitalizations, config.driving_level)
        .ok_or_else(|| SimulationError::InvalidConfig {
            field: "driving_level".to_string(),
            reason: format!("no hospitalization percentile level {}", config.driving_level),
        })?;

    let equipment = OxygenTranslator::new(&bundle.usage, &config.oxygen)?.translate(hospitalizations);
    let icu_capacity = calibration.regional.final_value(CensusMetric::IcuCapacity)?;

    let inputs = SimulationInputs {
        schedule: &config.schedule,
        observed: &calibration.smoothed,
        baseline: &calibration.baseline,
        ratios: &calibration.ratios,
        regimes: &calibration.regimes,
        icu: &calibration.icu,
        non_covid_icu: &calibration.non_covid_icu,
        icu_capacity,
        covid_admissions: hospitalizations,
        covid_icu: &equipment.icu,
        simulation_start,
        horizon,
    };
    let outcome = ScenarioSimulator::new(config.simulator.clone()).simulate(&inputs)?;
    info!(scenario = %scenario.name, horizon, "scenario complete");

    Ok(ScenarioRun {
        scenario: scenario.clone(),
        ensemble,
        equipment,
        outcome,
    })
}

/// Run every configured transmission scenario.
///
/// All scenarios share the projector and residual seeds, so their differences
/// come from the transmission assumptions alone.
pub fn run_pipeline(bundle: &InputBundle, config: &PipelineConfig) -> Result<PipelineOutput, SimulationError> {
    let calibration = calibrate(bundle, config)?;
    let scenarios = config
        .scenarios
        .iter()
        .map(|scenario| run_scenario(bundle, &calibration, config, scenario))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PipelineOutput {
        calibration,
        scenarios,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_driving_level_beyond_gradations_is_rejected() {
        let config = PipelineConfig {
            driving_level: 8,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfig { ref field, .. } if field == "driving_level"));

        let config = PipelineConfig {
            driving_level: 7,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_start_before_origin_is_rejected() {
        let early = ymd(2020, 2, 1);
        let config = PipelineConfig::default().with_simulation_start(early);
        match config.validate().unwrap_err() {
            SimulationError::DateBeforeOrigin { what, date, origin } => {
                assert_eq!(what, "simulation start");
                assert_eq!(date, early);
                assert_eq!(origin, ymd(2020, 3, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

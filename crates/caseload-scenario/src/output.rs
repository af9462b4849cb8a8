//! Flat CSV and JSON exports of a pipeline run

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::info;

use caseload_calibration::IcuCoefficients;
use caseload_core::{CensusMetric, Regime, RegionalCensus, Signal};
use caseload_epidemic::{Compartment, PercentileEnsemble};

use crate::error::SimulationError;
use crate::oxygen::EquipmentCensus;
use crate::pipeline::{Calibration, PipelineOutput, ScenarioRun};
use crate::policy::Branch;
use crate::simulator::{Measure, ScenarioOutcome};

fn day(origin: NaiveDate, t: usize) -> String {
    (origin + Duration::days(t as i64)).to_string()
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>, SimulationError> {
    Ok(csv::Writer::from_path(path)?)
}

/// Writes every table of a run under one directory
pub struct OutputWriter {
    directory: PathBuf,
}

impl OutputWriter {
    pub fn new(directory: &Path) -> Result<Self, SimulationError> {
        fs::create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// Write all tables and return the paths written.
    pub fn write(&self, output: &PipelineOutput) -> Result<Vec<PathBuf>, SimulationError> {
        let calibration = &output.calibration;
        let mut written = vec![
            self.write_census("regional_census.csv", &calibration.regional)?,
            self.write_census("detailed_census.csv", &calibration.detailed)?,
            self.write_regimes(calibration)?,
            self.write_icu(&calibration.icu)?,
            self.write_json("calibration.json", &CalibrationSummary::from(calibration))?,
        ];
        for run in &output.scenarios {
            written.push(self.write_ensemble(run)?);
            written.push(self.write_equipment(run, calibration.regional.origin)?);
            written.push(self.write_scenario(run)?);
        }
        info!(directory = %self.directory.display(), files = written.len(), "wrote outputs");
        Ok(written)
    }

    pub fn write_census(&self, name: &str, census: &RegionalCensus) -> Result<PathBuf, SimulationError> {
        let path = self.path(name);
        let mut writer = csv_writer(&path)?;
        let mut header = vec!["date".to_string()];
        header.extend(CensusMetric::ALL.iter().map(|m| m.name().to_string()));
        writer.write_record(&header)?;

        for t in 0..census.len() {
            let mut row = vec![day(census.origin, t)];
            for metric in CensusMetric::ALL {
                let value = census.values(metric)?.get(t).copied().unwrap_or(0.0);
                row.push(value.to_string());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    pub fn write_regimes(&self, calibration: &Calibration) -> Result<PathBuf, SimulationError> {
        let path = self.path("regime_parameters.csv");
        let mut writer = csv_writer(&path)?;
        writer.write_record([
            "category", "signal", "ratio", "regime", "start", "end", "steepness", "midpoint", "fallback",
        ])?;
        for signal in Signal::ALL {
            for (category, curves) in calibration.regimes.get(signal) {
                let ratio = calibration
                    .ratios
                    .get(signal)
                    .get(category)
                    .copied()
                    .unwrap_or(f64::NAN);
                for regime in Regime::ALL {
                    let curve = curves.curve(regime);
                    writer.write_record(&[
                        category.to_string(),
                        signal.to_string(),
                        ratio.to_string(),
                        regime.to_string(),
                        curve.start.to_string(),
                        curve.end.to_string(),
                        curve.steepness.to_string(),
                        curve.midpoint.to_string(),
                        curves.outcome(regime).is_fallback().to_string(),
                    ])?;
                }
            }
        }
        writer.flush()?;
        Ok(path)
    }

    pub fn write_icu(&self, icu: &IcuCoefficients) -> Result<PathBuf, SimulationError> {
        let path = self.path("icu_coefficients.csv");
        let mut writer = csv_writer(&path)?;
        writer.write_record(["regressor", "coefficient"])?;
        for (category, coefficient) in &icu.coefficients {
            writer.write_record(&[category.to_string(), coefficient.to_string()])?;
        }
        writer.write_record(&["intercept".to_string(), icu.intercept.to_string()])?;
        writer.flush()?;
        Ok(path)
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, SimulationError> {
        let path = self.path(name);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(path)
    }

    /// Percentile levels in wide form: one column per compartment and level
    pub fn write_ensemble(&self, run: &ScenarioRun) -> Result<PathBuf, SimulationError> {
        let path = self.path(&format!("ensemble_{}.csv", run.scenario.name));
        let ensemble = &run.ensemble;
        let mut writer = csv_writer(&path)?;
        let columns = ensemble_columns(ensemble);
        let mut header = vec!["day".to_string()];
        header.extend(columns.iter().map(|(c, z, _)| format!("{}_{}", c, z)));
        writer.write_record(&header)?;

        for t in 0..ensemble.horizon() {
            let mut row = vec![t.to_string()];
            row.extend(
                columns
                    .iter()
                    .map(|(_, _, series)| series.get(t).copied().unwrap_or(0.0).to_string()),
            );
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    pub fn write_equipment(&self, run: &ScenarioRun, origin: NaiveDate) -> Result<PathBuf, SimulationError> {
        let path = self.path(&format!("equipment_{}.csv", run.scenario.name));
        let EquipmentCensus { ward, icu, ventilator } = &run.equipment;
        let mut writer = csv_writer(&path)?;
        writer.write_record(["date", "ward", "icu", "ventilator"])?;
        for t in 0..ward.len() {
            writer.write_record(&[
                day(origin, t),
                ward[t].to_string(),
                icu[t].to_string(),
                ventilator[t].to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Baseline, both branches and their deviations, one row per day
    pub fn write_scenario(&self, run: &ScenarioRun) -> Result<PathBuf, SimulationError> {
        let path = self.path(&format!("scenario_{}.csv", run.scenario.name));
        let outcome = &run.outcome;
        let mut writer = csv_writer(&path)?;
        writer.write_record(&scenario_header())?;
        for t in 0..outcome.baseline.len() {
            writer.write_record(&scenario_row(outcome, t))?;
        }
        writer.flush()?;
        Ok(path)
    }
}

fn ensemble_columns(ensemble: &PercentileEnsemble) -> Vec<(Compartment, usize, &[f64])> {
    Compartment::ALL
        .iter()
        .flat_map(|c| {
            (0..=ensemble.gradations)
                .filter_map(move |z| ensemble.level(*c, z).map(|series| (*c, z, series)))
        })
        .collect()
}

fn scenario_header() -> Vec<String> {
    let mut header = vec!["date".to_string()];
    for branch in [Branch::Action, Branch::NoAction] {
        header.push(format!("{}_mode", branch));
    }
    for measure in Measure::ALL {
        header.push(format!("baseline_{}", measure));
        for branch in [Branch::Action, Branch::NoAction] {
            header.push(format!("{}_{}", branch, measure));
            header.push(format!("{}_{}_deviation", branch, measure));
        }
    }
    header
}

fn scenario_row(outcome: &ScenarioOutcome, t: usize) -> Vec<String> {
    let mut row = vec![day(outcome.origin, t)];
    for branch in [Branch::Action, Branch::NoAction] {
        let mode = t
            .checked_sub(outcome.simulation_start)
            .and_then(|i| outcome.branch(branch).modes.get(i))
            .map(|m| m.to_string())
            .unwrap_or_else(|| "observed".to_string());
        row.push(mode);
    }
    for measure in Measure::ALL {
        row.push(outcome.baseline.get(measure)[t].to_string());
        for branch in [Branch::Action, Branch::NoAction] {
            let trajectory = outcome.branch(branch);
            row.push(trajectory.workload.get(measure)[t].to_string());
            row.push(trajectory.deviation.get(measure)[t].to_string());
        }
    }
    row
}

/// Parameter tables for audit
#[derive(Serialize)]
struct CalibrationSummary<'a> {
    capacity_ratio: f64,
    ratios: &'a caseload_calibration::TrendRatios,
    regimes: &'a caseload_calibration::RegimeParameters,
    icu: &'a IcuCoefficients,
    baseline: &'a caseload_calibration::SeasonalBaseline,
}

impl<'a> From<&'a Calibration> for CalibrationSummary<'a> {
    fn from(calibration: &'a Calibration) -> Self {
        Self {
            capacity_ratio: calibration.capacity_ratio,
            ratios: &calibration.ratios,
            regimes: &calibration.regimes,
            icu: &calibration.icu,
            baseline: &calibration.baseline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::tests::fixture;
    use crate::simulator::{ScenarioSimulator, SimulatorConfig};
    use std::collections::BTreeMap;

    #[test]
    fn test_scenario_table_has_one_row_per_day() {
        let fixture = fixture();
        let outcome = ScenarioSimulator::new(SimulatorConfig::default())
            .simulate(&fixture.inputs())
            .unwrap();
        let run = ScenarioRun {
            scenario: caseload_epidemic::TransmissionScenario::low(),
            ensemble: PercentileEnsemble {
                gradations: 1,
                levels: BTreeMap::new(),
            },
            equipment: EquipmentCensus {
                ward: vec![1.0; 3],
                icu: vec![0.5; 3],
                ventilator: vec![0.25; 3],
            },
            outcome,
        };

        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(&dir.path().join("out")).unwrap();
        let path = writer.write_scenario(&run).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), scenario_header().len());
        assert_eq!(&headers[0], "date");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 320);
        assert_eq!(&rows[0][0], "2020-03-01");
        assert_eq!(&rows[0][1], "observed");
        assert_eq!(&rows[256][1], "suspended");

        let equipment = writer
            .write_equipment(&run, NaiveDate::from_ymd_opt(2020, 3, 1).unwrap())
            .unwrap();
        let lines = fs::read_to_string(equipment).unwrap();
        assert_eq!(lines.lines().count(), 4);
        assert!(lines.lines().nth(1).unwrap().starts_with("2020-03-01,1,0.5,0.25"));
    }
}

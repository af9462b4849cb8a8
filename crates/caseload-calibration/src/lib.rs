//! Calibration stages of the caseload forecast: seasonal baselines, pre-onset
//! ratios, chained regime curves and the ICU regression.

pub mod baseline;
pub mod calibration_problem;
pub mod error;
pub mod icu;
pub mod optimization;
pub mod regime;
pub mod trend;
pub mod types;

pub use baseline::{estimate_baseline, BaselineConfig, ReferenceOverride, SeasonalBaseline};
pub use calibration_problem::CurveFitProblem;
pub use error::CalibrationError;
pub use icu::{
    backfill_covid_icu, calibrate_icu, nnls, non_covid_icu, IcuCoefficients, IcuDesign,
    IcuRegressionConfig,
};
pub use optimization::{
    optimize, NelderMeadConfig, OptimizationAlgorithm, OptimizationConfig, ParticleSwarmConfig,
};
pub use regime::{
    deviation_table, DeviationTable, RegimeCalibrator, RegimeConfig, RegimeCurves,
    RegimeParameters,
};
pub use trend::{pre_onset_ratios, TrendRatios};
pub use types::{
    CalibrationParameter, CalibrationResult, CurveObservation, FallbackReason, FitOutcome,
    LossConfig,
};

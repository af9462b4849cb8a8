//! Capacity-triggered elective procedure scenarios.
//!
//! Combines the calibrated regime curves and ICU regression with projected
//! COVID load to simulate an "action" branch, which cancels elective procedures
//! when ICU capacity runs out, against a "no-action" branch driven only by
//! voluntary patient behaviour.

pub mod curves;
pub mod error;
pub mod output;
pub mod oxygen;
pub mod pipeline;
pub mod policy;
pub mod residuals;
pub mod simulator;

pub use curves::{deviation, historical_deviation, CurveTiming};
pub use error::SimulationError;
pub use output::OutputWriter;
pub use oxygen::{
    EquipmentCensus, EquipmentTier, OxygenConfig, OxygenTranslator, TierCurves, UsageCohort, UsageTable,
};
pub use pipeline::{
    calibrate, run_pipeline, run_scenario, Calibration, InputBundle, PipelineConfig, PipelineOutput,
    ScenarioRun,
};
pub use policy::{
    transition, Branch, PolicyMode, PolicyObservation, PolicyRules, PolicyState, PolicyThresholds,
};
pub use residuals::{BinnedResiduals, ResidualConfig};
pub use simulator::{
    BranchTrajectory, Measure, RecoveryAnchor, ScenarioOutcome, ScenarioSimulator, SimulationInputs,
    SimulatorConfig, Workload,
};

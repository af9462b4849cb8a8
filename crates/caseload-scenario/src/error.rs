use chrono::NaiveDate;

use caseload_calibration::CalibrationError;
use caseload_core::CoreError;
use caseload_epidemic::EpidemicError;

use crate::policy::Branch;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Epidemic(#[from] EpidemicError),
    #[error("Policy invariant violated at timestep {timestep} on the {branch} branch: {state}")]
    PolicyInvariant {
        timestep: usize,
        branch: Branch,
        state: String,
    },
    #[error("No equipment-usage curves for probability set '{set}', tier {tier}")]
    MissingUsageCurves { set: String, tier: String },
    #[error("Not enough history for {what}: need {needed} days, have {available}")]
    InsufficientHistory {
        what: String,
        needed: usize,
        available: usize,
    },
    #[error("Invalid configuration field `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },
    #[error("The {what} {date} precedes the study origin {origin}")]
    DateBeforeOrigin {
        what: String,
        date: NaiveDate,
        origin: NaiveDate,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

use caseload_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum EpidemicError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Not enough admission history: need {needed} days, have {available}")]
    InsufficientHistory { needed: usize, available: usize },
    #[error("Admission back-fill needs a non-zero calibration level at day {0}")]
    ZeroCalibrationLevel(usize),
    #[error("Invalid projector configuration: {0}")]
    InvalidConfig(String),
}

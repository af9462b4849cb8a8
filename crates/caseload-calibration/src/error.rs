use caseload_core::{Category, CoreError, Signal};
use chrono::NaiveDate;

/// Errors raised while building calibration inputs or running the optimizer
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Seasonal baseline for {category} {signal} sums to zero over the trend window")]
    ZeroBaseline { category: Category, signal: Signal },
    #[error("Invalid calibration problem: {0}")]
    InvalidProblem(String),
    #[error("Optimization failed: {0}")]
    Optimization(String),
    #[error("Non-negative least squares failed: {0}")]
    LeastSquares(String),
    #[error("No reference data for {category} on {date}")]
    MissingReference { category: Category, date: NaiveDate },
}

use chrono::NaiveDate;

use crate::category::Category;

/// Errors raised by the shared data model when an input violates its contract
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown category key: {0}")]
    UnknownCategory(String),
    #[error("MDC code out of range (expected 1..=25 or PRE): {0}")]
    InvalidMdc(String),
    #[error("Category {0} is missing from the table")]
    MissingCategory(Category),
    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },
    #[error("Empty or out-of-range window [{start}, {end}) for {what}")]
    EmptyWindow {
        what: String,
        start: usize,
        end: usize,
    },
    #[error("Date {date} is outside the series starting {origin} ({len} days)")]
    DateOutOfRange {
        date: NaiveDate,
        origin: NaiveDate,
        len: usize,
    },
    #[error("Negative value {value} in {what} at day {index}")]
    NegativeValue {
        what: String,
        index: usize,
        value: f64,
    },
    #[error("Zero denominator while computing {0}")]
    ZeroDenominator(String),
    #[error("Invalid period schedule: {0}")]
    InvalidSchedule(String),
    #[error("Region '{region}' has no {metric} series")]
    MissingMetric { region: String, metric: String },
    #[error("No facilities supplied for region '{0}'")]
    EmptyRegion(String),
    #[error("Unknown engine parameter: {0}")]
    UnknownParameter(String),
    #[error("Least squares solve failed: {0}")]
    LeastSquares(String),
}

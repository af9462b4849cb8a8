//! Fixed-origin daily time series

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stats;

/// Number of slots in the seasonal calendar
pub const SEASONAL_SLOTS: usize = 365;

/// Day-of-year slot on the 365-day seasonal calendar.
///
/// In leap years every date after February 28 is shifted back one slot so that
/// March 1 always lands on slot 59; February 29 shares February 28's slot.
pub fn seasonal_slot(date: NaiveDate) -> usize {
    let ordinal = date.ordinal0() as usize;
    let leap = NaiveDate::from_ymd_opt(date.year(), 2, 29).is_some();
    let slot = if leap && ordinal >= 59 {
        ordinal - 1
    } else {
        ordinal
    };
    slot.min(SEASONAL_SLOTS - 1)
}

/// Gap-free sequence of daily values indexed by day offset from `origin`.
///
/// Indices before `start_index` have not started yet (for example the lookback of
/// a trailing moving average) and hold zero; zeros at or after `start_index` are
/// genuine observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    origin: NaiveDate,
    #[serde(default)]
    start_index: usize,
    values: Vec<f64>,
}

impl DailySeries {
    pub fn new(origin: NaiveDate, values: Vec<f64>) -> Self {
        Self {
            origin,
            start_index: 0,
            values,
        }
    }

    pub fn zeros(origin: NaiveDate, len: usize) -> Self {
        Self::new(origin, vec![0.0; len])
    }

    pub fn with_start_index(
        origin: NaiveDate,
        start_index: usize,
        values: Vec<f64>,
    ) -> Result<Self, CoreError> {
        if start_index > values.len() {
            return Err(CoreError::LengthMismatch {
                what: "series start index".to_string(),
                expected: values.len(),
                actual: start_index,
            });
        }
        Ok(Self {
            origin,
            start_index,
            values,
        })
    }

    pub fn origin(&self) -> NaiveDate {
        self.origin
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Whether `index` is inside the started part of the series
    pub fn is_started(&self, index: usize) -> bool {
        index >= self.start_index && index < self.values.len()
    }

    /// Last day covered by the series
    pub fn end_date(&self) -> NaiveDate {
        self.date_of(self.values.len().saturating_sub(1))
    }

    pub fn date_of(&self, index: usize) -> NaiveDate {
        self.origin + Duration::days(index as i64)
    }

    /// Offset of `date` from the origin, failing when it falls outside the series
    pub fn index_of(&self, date: NaiveDate) -> Result<usize, CoreError> {
        let offset = (date - self.origin).num_days();
        if offset < 0 || offset as usize >= self.values.len() {
            return Err(CoreError::DateOutOfRange {
                date,
                origin: self.origin,
                len: self.values.len(),
            });
        }
        Ok(offset as usize)
    }

    pub fn value_on(&self, date: NaiveDate) -> Result<f64, CoreError> {
        Ok(self.values[self.index_of(date)?])
    }

    pub fn window(&self, start: usize, end: usize) -> Result<&[f64], CoreError> {
        if start >= end || end > self.values.len() {
            return Err(CoreError::EmptyWindow {
                what: format!("series starting {}", self.origin),
                start,
                end,
            });
        }
        Ok(&self.values[start..end])
    }

    pub fn window_mean(&self, start: usize, end: usize) -> Result<f64, CoreError> {
        let window = self.window(start, end)?;
        Ok(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Trailing moving average over `window` days, multiplied by `scale`.
    ///
    /// The first `window - 1` days lack lookback; they are zeroed and the start
    /// index advances past them.
    pub fn trailing_mean(&self, window: usize, scale: f64) -> DailySeries {
        let window = window.max(1);
        let values = stats::trailing_mean(&self.values, window)
            .into_iter()
            .map(|v| v * scale)
            .collect();
        DailySeries {
            origin: self.origin,
            start_index: (self.start_index + window - 1).min(self.values.len()),
            values,
        }
    }

    /// Re-index onto a new origin and length, failing if any requested day is
    /// outside the series
    pub fn aligned(&self, origin: NaiveDate, len: usize) -> Result<Vec<f64>, CoreError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let first = self.index_of(origin)?;
        let last = origin + Duration::days(len as i64 - 1);
        self.index_of(last)?;
        Ok(self.values[first..first + len].to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.date_of(i), *v))
    }
}

//! Named pandemic-response periods
//!
//! Each period is described by two date windows: a start window (the first
//! few days of the regime) and an end window (where the regime has settled). A
//! regime curve is fitted from the first day of the start window to the last day
//! of the end window. Windows of consecutive periods may overlap.

use std::fmt;
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The three fitted regimes, in calendar order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Elective procedures cancelled, admissions fall to a trough
    Suspension,
    /// Restrictions lifted, admissions rebound
    Recovery,
    /// No mandate, admissions decline as patients avoid hospitals
    VoluntaryDecline,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Suspension, Regime::Recovery, Regime::VoluntaryDecline];

    pub fn label(&self) -> &'static str {
        match self {
            Regime::Suspension => "P1",
            Regime::Recovery => "P2",
            Regime::VoluntaryDecline => "P3",
        }
    }

    pub fn previous(&self) -> Option<Regime> {
        match self {
            Regime::Suspension => None,
            Regime::Recovery => Some(Regime::Suspension),
            Regime::VoluntaryDecline => Some(Regime::Recovery),
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Half-open date window `[first, until)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub first: NaiveDate,
    pub until: NaiveDate,
}

impl DateWindow {
    pub fn new(first: NaiveDate, until: NaiveDate) -> Self {
        Self { first, until }
    }

    /// Day-offset range relative to `origin`
    pub fn to_range(&self, origin: NaiveDate) -> Result<Range<usize>, CoreError> {
        let start = (self.first - origin).num_days();
        let end = (self.until - origin).num_days();
        if start < 0 || end <= start {
            return Err(CoreError::InvalidSchedule(format!(
                "window {}..{} is empty or precedes origin {}",
                self.first, self.until, origin
            )));
        }
        Ok(start as usize..end as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: DateWindow,
    pub end: DateWindow,
}

/// A period resolved to day offsets from the study origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodIndices {
    pub start: Range<usize>,
    pub end: Range<usize>,
}

impl PeriodIndices {
    /// Number of days the regime curve is fitted over
    pub fn fit_len(&self) -> usize {
        self.end.end - self.start.start
    }

    /// Local time at which the curve's terminal level is read off
    pub fn terminal_offset(&self) -> usize {
        self.end.start - self.start.start
    }

    /// Absolute range fitted by the regime curve
    pub fn fit_range(&self) -> Range<usize> {
        self.start.start..self.end.end
    }
}

pub(crate) fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// Calendar of the three regimes relative to a study origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSchedule {
    pub origin: NaiveDate,
    pub suspension: PeriodWindow,
    pub recovery: PeriodWindow,
    pub voluntary_decline: PeriodWindow,
}

impl Default for PeriodSchedule {
    fn default() -> Self {
        let window = |a: NaiveDate, b: NaiveDate| DateWindow::new(a, b);
        Self {
            origin: ymd(2020, 3, 1),
            suspension: PeriodWindow {
                start: window(ymd(2020, 3, 1), ymd(2020, 3, 13)),
                end: window(ymd(2020, 4, 10), ymd(2020, 4, 30)),
            },
            recovery: PeriodWindow {
                start: window(ymd(2020, 4, 10), ymd(2020, 4, 30)),
                end: window(ymd(2020, 9, 1), ymd(2020, 9, 10)),
            },
            voluntary_decline: PeriodWindow {
                start: window(ymd(2020, 9, 1), ymd(2020, 9, 10)),
                end: window(ymd(2020, 12, 20), ymd(2021, 1, 4)),
            },
        }
    }
}

impl PeriodSchedule {
    pub fn window(&self, regime: Regime) -> &PeriodWindow {
        match regime {
            Regime::Suspension => &self.suspension,
            Regime::Recovery => &self.recovery,
            Regime::VoluntaryDecline => &self.voluntary_decline,
        }
    }

    pub fn indices(&self, regime: Regime) -> Result<PeriodIndices, CoreError> {
        let window = self.window(regime);
        let indices = PeriodIndices {
            start: window.start.to_range(self.origin)?,
            end: window.end.to_range(self.origin)?,
        };
        if indices.end.start < indices.start.start {
            return Err(CoreError::InvalidSchedule(format!(
                "{} end window precedes its start window",
                regime
            )));
        }
        Ok(indices)
    }

    /// Check every window resolves and the regimes are in calendar order
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut previous_start = None;
        for regime in Regime::ALL {
            let indices = self.indices(regime)?;
            if let Some(prev) = previous_start {
                if indices.start.start < prev {
                    return Err(CoreError::InvalidSchedule(format!(
                        "{} starts before the previous period",
                        regime
                    )));
                }
            }
            previous_start = Some(indices.start.start);
        }
        Ok(())
    }

    /// Last day offset covered by any regime fit
    pub fn fit_end(&self) -> Result<usize, CoreError> {
        Ok(self.indices(Regime::VoluntaryDecline)?.end.end)
    }

    /// Regime governing historical day `t`: the first whose end window has not
    /// begun yet, or the voluntary-decline regime after that
    pub fn regime_at(&self, t: usize) -> Result<Regime, CoreError> {
        for regime in Regime::ALL {
            if t < self.indices(regime)?.end.start {
                return Ok(regime);
            }
        }
        Ok(Regime::VoluntaryDecline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_offsets() {
        let schedule = PeriodSchedule::default();
        schedule.validate().unwrap();

        let p1 = schedule.indices(Regime::Suspension).unwrap();
        assert_eq!(p1.start, 0..12);
        assert_eq!(p1.end, 40..60);
        assert_eq!(p1.fit_len(), 60);
        assert_eq!(p1.terminal_offset(), 40);

        let p3 = schedule.indices(Regime::VoluntaryDecline).unwrap();
        assert_eq!(p3.start, 184..193);
        assert_eq!(p3.end, 294..309);
    }

    #[test]
    fn test_regime_at() {
        let schedule = PeriodSchedule::default();
        assert_eq!(schedule.regime_at(0).unwrap(), Regime::Suspension);
        assert_eq!(schedule.regime_at(39).unwrap(), Regime::Suspension);
        assert_eq!(schedule.regime_at(40).unwrap(), Regime::Recovery);
        assert_eq!(schedule.regime_at(184).unwrap(), Regime::VoluntaryDecline);
        assert_eq!(schedule.regime_at(400).unwrap(), Regime::VoluntaryDecline);
    }

    #[test]
    fn test_rejects_window_before_origin() {
        let mut schedule = PeriodSchedule::default();
        schedule.origin = ymd(2020, 3, 5);
        assert!(schedule.validate().is_err());
    }
}

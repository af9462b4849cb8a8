use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::category::{Category, CategoryMap};
use crate::error::CoreError;
use crate::series::DailySeries;

/// The two per-category workload signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Daily admission count
    Admissions,
    /// Daily case-weight (MS-DRG relative weight) total
    CaseWeight,
}

impl Signal {
    pub const ALL: [Signal; 2] = [Signal::Admissions, Signal::CaseWeight];
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Admissions => write!(f, "admissions"),
            Signal::CaseWeight => write!(f, "case_weight"),
        }
    }
}

/// A per-category value for each signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTable<T> {
    pub admissions: CategoryMap<T>,
    pub case_weight: CategoryMap<T>,
}

impl<T> Default for SignalTable<T> {
    fn default() -> Self {
        Self {
            admissions: CategoryMap::new(),
            case_weight: CategoryMap::new(),
        }
    }
}

impl<T> SignalTable<T> {
    pub fn new(admissions: CategoryMap<T>, case_weight: CategoryMap<T>) -> Self {
        Self {
            admissions,
            case_weight,
        }
    }

    pub fn get(&self, signal: Signal) -> &CategoryMap<T> {
        match signal {
            Signal::Admissions => &self.admissions,
            Signal::CaseWeight => &self.case_weight,
        }
    }

    pub fn get_mut(&mut self, signal: Signal) -> &mut CategoryMap<T> {
        match signal {
            Signal::Admissions => &mut self.admissions,
            Signal::CaseWeight => &mut self.case_weight,
        }
    }

    pub fn require(&self, signal: Signal, category: &Category) -> Result<&T, CoreError> {
        self.get(signal).require(category)
    }
}

/// Daily admission counts and case-weight sums per category, as delivered by the
/// ingestion layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTable {
    pub origin: NaiveDate,
    pub admissions: CategoryMap<Vec<f64>>,
    pub case_weight: CategoryMap<Vec<f64>>,
}

impl CategoryTable {
    /// Every category must be present in both signals with equal-length columns
    pub fn validate(&self) -> Result<usize, CoreError> {
        let len = self.admissions.values().map(Vec::len).max().unwrap_or(0);
        for signal in Signal::ALL {
            let columns = match signal {
                Signal::Admissions => &self.admissions,
                Signal::CaseWeight => &self.case_weight,
            };
            for (category, column) in columns {
                if column.len() != len {
                    return Err(CoreError::LengthMismatch {
                        what: format!("{} {}", category, signal),
                        expected: len,
                        actual: column.len(),
                    });
                }
            }
        }
        for category in self.admissions.keys() {
            self.case_weight.require(category)?;
        }
        for category in self.case_weight.keys() {
            self.admissions.require(category)?;
        }
        Ok(len)
    }

    /// Trailing moving averages scaled by `scale` (the regional capacity ratio)
    pub fn smoothed(&self, window: usize, scale: f64) -> Result<SignalTable<DailySeries>, CoreError> {
        self.validate()?;
        let smooth = |columns: &CategoryMap<Vec<f64>>| {
            columns.map_values(|_, column| {
                DailySeries::new(self.origin, column.clone()).trailing_mean(window, scale)
            })
        };
        Ok(SignalTable::new(
            smooth(&self.admissions),
            smooth(&self.case_weight),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_ragged_columns() {
        let origin = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let mut admissions = CategoryMap::new();
        admissions.insert(Category::CovidLike, vec![1.0; 10]);
        let mut case_weight = CategoryMap::new();
        case_weight.insert(Category::CovidLike, vec![1.0; 9]);
        let table = CategoryTable {
            origin,
            admissions,
            case_weight,
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_smoothed_scales_moving_average() {
        let origin = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let category: Category = "EI_05".parse().unwrap();
        let mut admissions = CategoryMap::new();
        admissions.insert(category, vec![2.0; 14]);
        let mut case_weight = CategoryMap::new();
        case_weight.insert(category, vec![3.0; 14]);
        let table = CategoryTable {
            origin,
            admissions,
            case_weight,
        };

        let smoothed = table.smoothed(7, 1.5).unwrap();
        let series = smoothed.require(Signal::Admissions, &category).unwrap();
        assert_eq!(series.start_index(), 6);
        assert_eq!(series.values()[13], 3.0);
        let series = smoothed.require(Signal::CaseWeight, &category).unwrap();
        assert_eq!(series.values()[6], 4.5);
    }
}

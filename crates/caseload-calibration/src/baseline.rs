//! Day-of-year seasonal baselines from the reference years

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use caseload_core::{
    seasonal_slot, AdmissionRoute, Category, CategoryMap, CoreError, DailySeries, Mdc, Signal,
    SignalTable, SEASONAL_SLOTS,
};

use crate::error::CalibrationError;

/// Reference years used for one category when it departs from the default set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceOverride {
    pub years: Vec<i32>,
    /// Whether the cold-start slots are filled from slot `cold_start_days`
    pub cold_start: bool,
}

/// Configuration for the seasonal baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Calendar years averaged into the baseline
    pub reference_years: Vec<i32>,

    /// Leading day-of-year slots whose moving average lacks lookback in the first
    /// reference year. They receive the value of slot `cold_start_days` instead.
    pub cold_start_days: usize,

    /// Per-category reference years
    pub overrides: CategoryMap<ReferenceOverride>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        // MDC 14 (pregnancy and childbirth) coding changed during 2018
        let single_year = ReferenceOverride {
            years: vec![2019],
            cold_start: false,
        };
        let overrides = AdmissionRoute::ALL
            .iter()
            .filter_map(|route| {
                Mdc::new(14)
                    .ok()
                    .map(|mdc| (Category::diagnostic(mdc, *route), single_year.clone()))
            })
            .collect();
        Self {
            reference_years: vec![2018, 2019],
            cold_start_days: 11,
            overrides,
        }
    }
}

impl BaselineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference_years(mut self, years: Vec<i32>) -> Self {
        self.reference_years = years;
        self
    }

    pub fn with_cold_start_days(mut self, days: usize) -> Self {
        self.cold_start_days = days;
        self
    }

    pub fn with_override(mut self, category: Category, years: Vec<i32>, cold_start: bool) -> Self {
        self.overrides
            .insert(category, ReferenceOverride { years, cold_start });
        self
    }

    fn reference_for(&self, category: &Category) -> ReferenceOverride {
        self.overrides
            .get(category)
            .cloned()
            .unwrap_or_else(|| ReferenceOverride {
                years: self.reference_years.clone(),
                cold_start: true,
            })
    }
}

/// Expected daily admissions and case-weight for every day-of-year slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonalBaseline {
    table: SignalTable<Vec<f64>>,
}

impl SeasonalBaseline {
    pub fn from_table(table: SignalTable<Vec<f64>>) -> Result<Self, CalibrationError> {
        for signal in Signal::ALL {
            for (category, slots) in table.get(signal) {
                if slots.len() != SEASONAL_SLOTS {
                    return Err(CoreError::LengthMismatch {
                        what: format!("{} {} baseline", category, signal),
                        expected: SEASONAL_SLOTS,
                        actual: slots.len(),
                    }
                    .into());
                }
            }
        }
        Ok(Self { table })
    }

    pub fn slots(&self, signal: Signal, category: &Category) -> Result<&[f64], CalibrationError> {
        Ok(self.table.require(signal, category)?)
    }

    /// Baseline value for the seasonal slot of `date`
    pub fn expected(
        &self,
        signal: Signal,
        category: &Category,
        date: NaiveDate,
    ) -> Result<f64, CalibrationError> {
        Ok(self.slots(signal, category)?[seasonal_slot(date)])
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.table.admissions.keys()
    }

    pub fn table(&self) -> &SignalTable<Vec<f64>> {
        &self.table
    }
}

/// Average the smoothed reference-year series onto the 365-slot calendar.
///
/// `smoothed` holds the trailing 7-day moving averages of every category. Each
/// reference year contributes `1 / years` of its value to the slot of each date;
/// February 29 is skipped since it shares February 28's slot.
pub fn estimate_baseline(
    smoothed: &SignalTable<DailySeries>,
    config: &BaselineConfig,
) -> Result<SeasonalBaseline, CalibrationError> {
    let mut table = SignalTable::default();
    for signal in Signal::ALL {
        let baselines = smoothed.get(signal).try_map_values(|category, series| {
            let reference = config.reference_for(category);
            category_baseline(category, signal, series, &reference, config.cold_start_days)
        })?;
        *table.get_mut(signal) = baselines;
    }
    info!(
        categories = table.admissions.len(),
        years = ?config.reference_years,
        "estimated seasonal baselines"
    );
    SeasonalBaseline::from_table(table)
}

fn category_baseline(
    category: &Category,
    signal: Signal,
    series: &DailySeries,
    reference: &ReferenceOverride,
    cold_start_days: usize,
) -> Result<Vec<f64>, CalibrationError> {
    let mut slots = vec![0.0; SEASONAL_SLOTS];
    if reference.years.is_empty() {
        return Ok(slots);
    }
    let weight = 1.0 / reference.years.len() as f64;

    for year in &reference.years {
        let mut date = NaiveDate::from_ymd_opt(*year, 1, 1).ok_or_else(|| {
            CalibrationError::InvalidProblem(format!("reference year {} is not a valid year", year))
        })?;
        while date.year() == *year {
            let current = date;
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
            if current.month() == 2 && current.day() == 29 {
                continue;
            }

            let index = series
                .index_of(current)
                .map_err(|_| CalibrationError::MissingReference {
                    category: *category,
                    date: current,
                })?;
            let value = series.values()[index];
            if value < 0.0 {
                return Err(CoreError::NegativeValue {
                    what: format!("{} {}", category, signal),
                    index,
                    value,
                }
                .into());
            }

            let slot = seasonal_slot(current);
            let contribution = value * weight;
            if !reference.cold_start {
                slots[slot] += contribution;
            } else if slot == cold_start_days {
                for cold in slots.iter_mut().take(cold_start_days + 1) {
                    *cold += contribution;
                }
            } else if slot > cold_start_days {
                slots[slot] += contribution;
            }
        }
    }

    debug!(%category, %signal, years = ?reference.years, "baseline slots filled");
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn origin() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
    }

    fn table_with(category: Category, admissions: Vec<f64>) -> SignalTable<DailySeries> {
        let mut a = CategoryMap::new();
        let mut c = CategoryMap::new();
        let weights = admissions.iter().map(|v| v * 1.5).collect();
        a.insert(category, DailySeries::new(origin(), admissions));
        c.insert(category, DailySeries::new(origin(), weights));
        SignalTable::new(a, c)
    }

    #[test]
    fn test_constant_series_gives_constant_baseline() {
        let category: Category = "EI_05".parse().unwrap();
        let smoothed = table_with(category, vec![4.0; 800]);
        let baseline = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap();

        for signal in Signal::ALL {
            let slots = baseline.slots(signal, &category).unwrap();
            assert_eq!(slots.len(), 365);
            assert!(slots.iter().all(|v| *v >= 0.0));
        }
        let slots = baseline.slots(Signal::Admissions, &category).unwrap();
        for value in slots {
            assert_relative_eq!(*value, 4.0, epsilon = 1e-12);
        }
        assert_relative_eq!(baseline.slots(Signal::CaseWeight, &category).unwrap()[200], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cold_start_slots_take_day_eleven() {
        let category: Category = "IP_03".parse().unwrap();
        let values: Vec<f64> = (0..800).map(|d| (d % 365) as f64).collect();
        let smoothed = table_with(category, values);
        let baseline = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap();
        let slots = baseline.slots(Signal::Admissions, &category).unwrap();
        for slot in slots.iter().take(12) {
            assert_relative_eq!(*slot, 11.0, epsilon = 1e-12);
        }
        assert_relative_eq!(slots[12], 12.0, epsilon = 1e-12);
        assert_relative_eq!(slots[364], 364.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mdc_14_uses_single_reference_year() {
        let category: Category = "EI_14".parse().unwrap();
        let values: Vec<f64> = (0..800).map(|d| if d < 365 { 100.0 } else { 2.0 }).collect();
        let smoothed = table_with(category, values);
        let baseline = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap();
        let slots = baseline.slots(Signal::Admissions, &category).unwrap();
        assert_relative_eq!(slots[0], 2.0);
        assert_relative_eq!(slots[300], 2.0);
    }

    #[test]
    fn test_negative_input_is_rejected() {
        let category: Category = "EI_05".parse().unwrap();
        let mut values = vec![1.0; 800];
        values[40] = -0.5;
        let smoothed = table_with(category, values);
        let err = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap_err();
        assert!(matches!(err, CalibrationError::Core(CoreError::NegativeValue { index: 40, .. })));
    }

    #[test]
    fn test_missing_reference_year_is_reported() {
        let category: Category = "EI_05".parse().unwrap();
        let smoothed = table_with(category, vec![1.0; 400]);
        let err = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap_err();
        assert!(matches!(err, CalibrationError::MissingReference { .. }));
    }

    #[test]
    fn test_expected_reads_seasonal_slot() {
        let category: Category = "EI_05".parse().unwrap();
        let values: Vec<f64> = (0..800).map(|d| (d % 365) as f64).collect();
        let baseline = estimate_baseline(&table_with(category, values), &BaselineConfig::default()).unwrap();
        let leap_day = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();
        let march = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        assert_relative_eq!(baseline.expected(Signal::Admissions, &category, leap_day).unwrap(), 58.0);
        assert_relative_eq!(baseline.expected(Signal::Admissions, &category, march).unwrap(), 59.0);
    }
}

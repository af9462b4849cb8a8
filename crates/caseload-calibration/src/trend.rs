//! Pre-onset trend ratios
//!
//! Admissions in the weeks before the pandemic onset already differed from the
//! reference-year average. The ratio of observed to baseline volume over that
//! window rescales the baseline before deviations are measured.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use caseload_core::{DailySeries, DateWindow, Signal, SignalTable};

use crate::baseline::SeasonalBaseline;
use crate::error::CalibrationError;

/// Observed/baseline volume ratio per category and signal
pub type TrendRatios = SignalTable<f64>;

/// Compute `Σ observed / Σ baseline` over `window` for every non-COVID category.
///
/// An all-zero baseline slice is an input-data fault and fails with
/// [`CalibrationError::ZeroBaseline`].
pub fn pre_onset_ratios(
    smoothed: &SignalTable<DailySeries>,
    baseline: &SeasonalBaseline,
    window: &DateWindow,
) -> Result<TrendRatios, CalibrationError> {
    let days = (window.until - window.first).num_days();
    if days <= 0 {
        return Err(CalibrationError::InvalidProblem(format!(
            "trend window {}..{} is empty",
            window.first, window.until
        )));
    }

    let mut ratios = TrendRatios::default();
    for signal in Signal::ALL {
        for (category, series) in smoothed.get(signal) {
            if category.is_covid_like() {
                continue;
            }
            let mut observed = 0.0;
            let mut expected = 0.0;
            for offset in 0..days {
                let date = window.first + Duration::days(offset);
                observed += series.value_on(date)?;
                expected += baseline.expected(signal, category, date)?;
            }
            if expected == 0.0 {
                return Err(CalibrationError::ZeroBaseline {
                    category: *category,
                    signal,
                });
            }
            let ratio = observed / expected;
            debug!(%category, %signal, ratio, "pre-onset ratio");
            ratios.get_mut(signal).insert(*category, ratio);
        }
    }
    Ok(ratios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{estimate_baseline, BaselineConfig};
    use approx::assert_relative_eq;
    use caseload_core::{Category, CategoryMap};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn smoothed(category: Category, reference: f64, current: f64) -> SignalTable<DailySeries> {
        let values: Vec<f64> = (0..900).map(|d| if d < 730 { reference } else { current }).collect();
        let mut admissions = CategoryMap::new();
        admissions.insert(category, DailySeries::new(date(2018, 1, 1), values.clone()));
        admissions.insert(Category::CovidLike, DailySeries::new(date(2018, 1, 1), vec![0.0; 900]));
        let mut case_weight = CategoryMap::new();
        case_weight.insert(category, DailySeries::new(date(2018, 1, 1), values));
        SignalTable::new(admissions, case_weight)
    }

    #[test]
    fn test_ratio_of_observed_to_baseline() {
        let category: Category = "EI_04".parse().unwrap();
        let series = smoothed(category, 10.0, 12.0);
        let baseline = estimate_baseline(&series, &BaselineConfig::default()).unwrap();
        let window = DateWindow::new(date(2020, 1, 1), date(2020, 3, 10));
        let ratios = pre_onset_ratios(&series, &baseline, &window).unwrap();
        assert_relative_eq!(*ratios.require(Signal::Admissions, &category).unwrap(), 1.2, epsilon = 1e-12);
        assert!(!ratios.admissions.contains(&Category::CovidLike));
    }

    #[test]
    fn test_zero_baseline_is_fatal() {
        let category: Category = "IP_09".parse().unwrap();
        let series = smoothed(category, 0.0, 3.0);
        let baseline = estimate_baseline(&series, &BaselineConfig::default()).unwrap();
        let window = DateWindow::new(date(2020, 1, 1), date(2020, 3, 10));
        let err = pre_onset_ratios(&series, &baseline, &window).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ZeroBaseline { signal: Signal::Admissions, .. }
        ));
    }
}

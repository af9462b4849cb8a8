//! Non-negative regression of non-COVID ICU census on admission deviations

use chrono::{Duration, NaiveDate};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use caseload_core::{stats, Category, CategoryMap, CoreError, DailySeries, DateWindow};

use crate::error::CalibrationError;

/// Days used to estimate the early COVID ICU growth rate
const BACKFILL_GROWTH_DAYS: usize = 5;

/// Back-fill COVID ICU census between the first ICU report and the first COVID
/// ICU report.
///
/// The day before the first COVID report steps down by the mean daily growth of
/// the first five reported days, capped at one fifth of the first reported value.
/// Earlier days back to (but excluding) the first ICU report hold that value.
pub fn backfill_covid_icu(total_icu: &[f64], covid_icu: &mut [f64]) {
    let Some(first_total) = total_icu.iter().position(|v| *v > 0.0) else {
        return;
    };
    let Some(first_covid) = covid_icu.iter().position(|v| *v > 0.0) else {
        return;
    };

    let last = (first_covid + BACKFILL_GROWTH_DAYS).min(covid_icu.len() - 1);
    let mut slope = (first_covid + 1..=last)
        .map(|z| (covid_icu[z] - covid_icu[z - 1]) / BACKFILL_GROWTH_DAYS as f64)
        .sum::<f64>();

    for day in (first_total + 1..first_covid).rev() {
        let next = covid_icu[day + 1];
        covid_icu[day] = next - slope.min(next / 5.0);
        slope = 0.0;
    }
}

/// Total ICU census minus COVID ICU census, after back-filling the COVID series
pub fn non_covid_icu(total_icu: &[f64], covid_icu: &[f64]) -> Result<Vec<f64>, CalibrationError> {
    if total_icu.len() != covid_icu.len() {
        return Err(CoreError::LengthMismatch {
            what: "COVID ICU census".to_string(),
            expected: total_icu.len(),
            actual: covid_icu.len(),
        }
        .into());
    }
    let mut covid = covid_icu.to_vec();
    backfill_covid_icu(total_icu, &mut covid);
    Ok(total_icu.iter().zip(&covid).map(|(t, c)| t - c).collect())
}

/// Solve `min ||A x - b||` subject to `x >= 0` with the Lawson–Hanson active set
/// method
pub fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, CalibrationError> {
    let (rows, cols) = a.shape();
    if rows != b.len() {
        return Err(CalibrationError::LeastSquares(format!(
            "design has {} rows but target has {}",
            rows,
            b.len()
        )));
    }

    let norm_1 = (0..cols)
        .map(|j| a.column(j).iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let tolerance = 10.0 * f64::EPSILON * norm_1 * rows.max(cols) as f64;
    let max_iterations = 3 * cols.max(1);

    let mut x = DVector::zeros(cols);
    let mut passive = vec![false; cols];
    let mut gradient = a.transpose() * (b - a * &x);

    for _ in 0..max_iterations {
        let candidate = (0..cols)
            .filter(|j| !passive[*j])
            .max_by(|i, j| gradient[*i].total_cmp(&gradient[*j]));
        let Some(entering) = candidate else { break };
        if gradient[entering] <= tolerance {
            break;
        }
        passive[entering] = true;

        loop {
            let trial = passive_least_squares(a, b, &passive)?;
            let feasible = (0..cols).all(|j| !passive[j] || trial[j] > tolerance);
            if feasible {
                x = trial;
                break;
            }

            let step = (0..cols)
                .filter(|j| passive[*j] && trial[*j] <= tolerance)
                .map(|j| x[j] / (x[j] - trial[j]))
                .filter(|s| s.is_finite())
                .fold(1.0, f64::min);
            let delta = (trial - &x) * step;
            x += delta;
            for j in 0..cols {
                if passive[j] && x[j] <= tolerance {
                    passive[j] = false;
                    x[j] = 0.0;
                }
            }
            if !passive.iter().any(|p| *p) {
                break;
            }
        }

        gradient = a.transpose() * (b - a * &x);
    }

    Ok(x)
}

/// Unconstrained least squares over the passive columns, zero elsewhere
fn passive_least_squares(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    passive: &[bool],
) -> Result<DVector<f64>, CalibrationError> {
    let columns: Vec<usize> = (0..passive.len()).filter(|j| passive[*j]).collect();
    let sub = a.select_columns(&columns);
    let solution = sub
        .svd(true, true)
        .solve(b, 1e-12)
        .map_err(|e| CalibrationError::LeastSquares(e.to_string()))?;

    let mut full = DVector::zeros(passive.len());
    for (k, j) in columns.iter().enumerate() {
        full[*j] = solution[k];
    }
    Ok(full)
}

/// Date windows of the ICU regression
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IcuRegressionConfig {
    /// Window whose means define "normal" admissions and ICU census
    pub baseline: DateWindow,
    /// Days entering the regression
    pub calibration: DateWindow,
}

impl Default for IcuRegressionConfig {
    fn default() -> Self {
        let ymd = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
        Self {
            baseline: DateWindow::new(ymd(2020, 9, 10), ymd(2020, 9, 30)),
            calibration: DateWindow::new(ymd(2020, 6, 4), ymd(2020, 12, 20)),
        }
    }
}

/// Design matrix and target of the ICU regression
#[derive(Debug, Clone)]
pub struct IcuDesign {
    pub categories: Vec<Category>,
    /// One column per category plus a trailing constant column
    pub matrix: DMatrix<f64>,
    pub target: DVector<f64>,
}

fn window_dates(window: &DateWindow) -> Vec<NaiveDate> {
    let days = (window.until - window.first).num_days().max(0);
    (0..days).map(|d| window.first + Duration::days(d)).collect()
}

fn window_mean(series: &DailySeries, window: &DateWindow) -> Result<f64, CalibrationError> {
    let values = window_dates(window)
        .into_iter()
        .map(|date| series.value_on(date))
        .collect::<Result<Vec<_>, _>>()?;
    stats::mean(&values).ok_or_else(|| {
        CalibrationError::InvalidProblem(format!(
            "window {}..{} is empty",
            window.first, window.until
        ))
    })
}

impl IcuDesign {
    /// Columns are `baseline mean admissions - admissions` per category; the target
    /// is `baseline mean ICU - ICU`. COVID-like admissions are not regressors.
    pub fn build(
        admissions: &CategoryMap<DailySeries>,
        non_covid_icu: &DailySeries,
        config: &IcuRegressionConfig,
    ) -> Result<Self, CalibrationError> {
        let categories: Vec<Category> = admissions
            .keys()
            .filter(|c| !c.is_covid_like())
            .copied()
            .collect();
        let dates = window_dates(&config.calibration);
        if dates.is_empty() || categories.is_empty() {
            return Err(CalibrationError::InvalidProblem(
                "ICU regression needs at least one day and one category".to_string(),
            ));
        }

        let mut matrix = DMatrix::zeros(dates.len(), categories.len() + 1);
        for (col, category) in categories.iter().enumerate() {
            let series = admissions.require(category)?;
            let base = window_mean(series, &config.baseline)?;
            for (row, date) in dates.iter().enumerate() {
                matrix[(row, col)] = base - series.value_on(*date)?;
            }
        }
        matrix.column_mut(categories.len()).fill(1.0);

        let icu_base = window_mean(non_covid_icu, &config.baseline)?;
        let target = dates
            .iter()
            .map(|date| -> Result<f64, CalibrationError> {
                Ok(icu_base - non_covid_icu.value_on(*date)?)
            })
            .collect::<Result<Vec<f64>, _>>()?;

        Ok(Self {
            categories,
            matrix,
            target: DVector::from_vec(target),
        })
    }

    pub fn fit(&self) -> Result<IcuCoefficients, CalibrationError> {
        let solution = nnls(&self.matrix, &self.target)?;
        let coefficients = self
            .categories
            .iter()
            .enumerate()
            .map(|(j, category)| (*category, solution[j]))
            .collect();
        let intercept = solution[self.categories.len()];
        let fitted = &self.matrix * &solution;
        let residual = (&self.target - fitted).norm();
        info!(
            categories = self.categories.len(),
            days = self.target.len(),
            intercept,
            residual,
            "fitted ICU regression"
        );
        Ok(IcuCoefficients {
            coefficients,
            intercept,
        })
    }
}

/// Non-negative map from admission deviations to ICU census deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcuCoefficients {
    pub coefficients: CategoryMap<f64>,
    pub intercept: f64,
}

impl IcuCoefficients {
    /// `intercept + Σ coefficient * (baseline - admissions)` for each regressor
    pub fn predict(&self, admission_drops: &CategoryMap<f64>) -> Result<f64, CoreError> {
        let mut total = self.intercept;
        for (category, coefficient) in &self.coefficients {
            total += coefficient * admission_drops.require(category)?;
        }
        Ok(total)
    }

    pub fn coefficient(&self, category: &Category) -> f64 {
        self.coefficients.get(category).copied().unwrap_or(0.0)
    }

    pub fn is_non_negative(&self) -> bool {
        self.intercept >= 0.0 && self.coefficients.values().all(|c| *c >= 0.0)
    }
}

/// Back-fill, build and fit in one step
pub fn calibrate_icu(
    admissions: &CategoryMap<DailySeries>,
    total_icu: &DailySeries,
    covid_icu: &DailySeries,
    config: &IcuRegressionConfig,
) -> Result<IcuCoefficients, CalibrationError> {
    let non_covid = DailySeries::new(
        total_icu.origin(),
        non_covid_icu(total_icu.values(), covid_icu.values())?,
    );
    let design = IcuDesign::build(admissions, &non_covid, config)?;
    debug!(rows = design.matrix.nrows(), cols = design.matrix.ncols(), "ICU design matrix");
    design.fit()
}

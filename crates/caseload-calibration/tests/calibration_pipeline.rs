use caseload_calibration::{
    deviation_table, estimate_baseline, pre_onset_ratios, BaselineConfig, RegimeCalibrator,
    RegimeConfig,
};
use caseload_core::{
    Category, CategoryMap, CategoryTable, DateWindow, PeriodSchedule, Regime, Signal,
};
use chrono::NaiveDate;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Three years of reference data followed by a pandemic-shaped dip
fn synthetic_table() -> CategoryTable {
    let origin = date(2018, 1, 1);
    let len = 1150;
    let study_start = (date(2020, 3, 1) - origin).num_days() as usize;

    let mut admissions = CategoryMap::new();
    let mut case_weight = CategoryMap::new();
    for (k, key) in ["EI_05", "IP_08", "MED_EI"].iter().enumerate() {
        let category: Category = key.parse().unwrap();
        let level = 10.0 + 5.0 * k as f64;
        let column: Vec<f64> = (0..len)
            .map(|d| {
                let seasonal = level + (d as f64 * 2.0 * std::f64::consts::PI / 365.0).sin();
                if d < study_start {
                    seasonal
                } else {
                    let t = (d - study_start) as f64;
                    let dip = 0.4 / (1.0 + (-(t - 15.0) * 0.3).exp());
                    let rebound = 0.3 / (1.0 + (-(t - 90.0) * 0.1).exp());
                    seasonal * (1.0 - dip + rebound)
                }
            })
            .collect();
        let weights = column.iter().map(|v| v * 1.8).collect();
        admissions.insert(category, column);
        case_weight.insert(category, weights);
    }
    admissions.insert(Category::CovidLike, vec![1.0; len]);
    case_weight.insert(Category::CovidLike, vec![2.0; len]);

    CategoryTable {
        origin,
        admissions,
        case_weight,
    }
}

fn run_once() -> caseload_calibration::RegimeParameters {
    let table = synthetic_table();
    let smoothed = table.smoothed(7, 1.0).unwrap();
    let baseline = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap();
    let trend_window = DateWindow::new(date(2020, 1, 1), date(2020, 3, 10));
    let ratios = pre_onset_ratios(&smoothed, &baseline, &trend_window).unwrap();
    let schedule = PeriodSchedule::default();
    let deviations = deviation_table(&smoothed, &baseline, &ratios, schedule.origin).unwrap();
    RegimeCalibrator::new(RegimeConfig::default())
        .calibrate(&deviations, &schedule)
        .unwrap()
}

#[test]
fn test_baseline_shape_and_sign() {
    let smoothed = synthetic_table().smoothed(7, 1.0).unwrap();
    let baseline = estimate_baseline(&smoothed, &BaselineConfig::default()).unwrap();
    for signal in Signal::ALL {
        for category in baseline.categories() {
            let slots = baseline.slots(signal, category).unwrap();
            assert_eq!(slots.len(), 365);
            assert!(slots.iter().all(|v| *v >= 0.0));
        }
    }
}

#[test]
fn test_regime_curves_are_continuous() {
    let parameters = run_once();
    let schedule = PeriodSchedule::default();
    assert!(!parameters.admissions.contains(&Category::CovidLike));
    assert_eq!(parameters.admissions.len(), 3);

    for signal in Signal::ALL {
        for (category, curves) in parameters.get(signal) {
            for regime in [Regime::Recovery, Regime::VoluntaryDecline] {
                let previous = regime.previous().unwrap();
                let offset = schedule.indices(previous).unwrap().terminal_offset() as f64;
                let terminal = curves.curve(previous).evaluate(offset);
                let start = curves.curve(regime).start;
                assert!(
                    (start - terminal).abs() <= 1e-6 + 1e-9,
                    "{} {} {}: start {} vs terminal {}",
                    category,
                    signal,
                    regime,
                    start,
                    terminal
                );
            }
        }
    }
}

#[test]
fn test_reruns_are_bit_identical() {
    let first = run_once();
    let second = run_once();
    assert_eq!(first, second);
}

//! Small numeric helpers shared by the calibration and simulation stages

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Trailing moving average; positions without a full window are zero
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = vec![0.0; values.len()];
    for i in (window - 1)..values.len() {
        out[i] = values[i + 1 - window..=i].iter().sum::<f64>() / window as f64;
    }
    out
}

/// Collapse a sample into `gradations + 1` ordered levels.
///
/// Level `z < gradations` is the order statistic at `floor(n * z / gradations)`;
/// the last level is the sample maximum.
pub fn percentile_levels(sample: &[f64], gradations: usize) -> Vec<f64> {
    if sample.is_empty() {
        return vec![0.0; gradations + 1];
    }
    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mut levels: Vec<f64> = (0..gradations)
        .map(|z| sorted[(n * z / gradations).min(n - 1)])
        .collect();
    levels.push(sorted[n - 1]);
    levels
}

/// Linear-interpolated quantile of a sorted slice, `q` in `[0, 1]`
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

/// Equal-count bin edges (`bins + 1` values, first is the minimum, last the maximum)
pub fn quantile_edges(values: &[f64], bins: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    (0..=bins)
        .map(|k| quantile_sorted(&sorted, k as f64 / bins as f64))
        .collect()
}

/// Bin of `value` given edges from [`quantile_edges`]; values outside the range
/// land in the first or last bin
pub fn bin_index(value: f64, edges: &[f64]) -> usize {
    let bins = edges.len().saturating_sub(1).max(1);
    let interior = edges.get(1..edges.len().saturating_sub(1)).unwrap_or(&[]);
    interior
        .iter()
        .take_while(|edge| value >= **edge)
        .count()
        .min(bins - 1)
}

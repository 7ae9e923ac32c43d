//! Descriptive statistics and regression metrics.

/// Small constant added to the total sum of squares in [`r_squared`].
pub const R2_EPS: f64 = 1e-7;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (`ddof = 0`).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Percentile `q` in `[0, 100]` with linear interpolation between order statistics.
///
/// NaN values are ignored; an all-NaN input yields NaN.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q)
}

/// [`percentile`] on data that is already sorted and NaN-free.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 100.0);
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        &y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p) * (t - p))
            .collect::<Vec<_>>(),
    )
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        &y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).abs())
            .collect::<Vec<_>>(),
    )
}

/// Coefficient of determination: `1 - SS_res / (SS_tot + eps)`.
pub fn r_squared(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let m = mean(y_true);
    let ss_res: f64 = y_true.iter().zip(y_pred.iter()).map(|(t, p)| (t - p) * (t - p)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - m) * (t - m)).sum();
    1.0 - ss_res / (ss_tot + R2_EPS)
}

/// Column means and standard deviations of equally long series, truncated to the
/// shortest one.
pub fn mean_std_columns(series: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let len = series.iter().map(Vec::len).min().unwrap_or(0);
    let mut means = Vec::with_capacity(len);
    let mut stds = Vec::with_capacity(len);
    for i in 0..len {
        let column: Vec<f64> = series.iter().map(|s| s[i]).collect();
        means.push(mean(&column));
        stds.push(std_dev(&column));
    }
    (means, stds)
}

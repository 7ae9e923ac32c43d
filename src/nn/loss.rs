//! Mean squared logarithmic error and regression metrics on batches.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::math::{mae, mse, r_squared};

/// Floor applied to predictions and targets before `log1p`.
pub const MSLE_EPS: f64 = 1e-7;

/// `mean((log(max(p, ε) + 1) - log(max(t, ε) + 1))²)` over all elements.
pub fn msle(pred: &DMatrix<f64>, target: &DMatrix<f64>) -> f64 {
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(target.iter())
        .map(|(&p, &t)| {
            let d = p.max(MSLE_EPS).ln_1p() - t.max(MSLE_EPS).ln_1p();
            d * d
        })
        .sum::<f64>()
        / n
}

/// Gradient of [`msle`] with respect to the predictions.
pub fn msle_grad(pred: &DMatrix<f64>, target: &DMatrix<f64>) -> DMatrix<f64> {
    let n = pred.len().max(1) as f64;
    pred.zip_map(target, |p, t| {
        if p <= MSLE_EPS {
            return 0.0;
        }
        let d = p.ln_1p() - t.max(MSLE_EPS).ln_1p();
        2.0 * d / ((p + 1.0) * n)
    })
}

/// Loss and metrics for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub loss: f64,
    pub mean_squared_error: f64,
    pub mean_absolute_error: f64,
    pub r_squared: f64,
}

impl Metrics {
    pub fn evaluate(pred: &DMatrix<f64>, target: &DMatrix<f64>) -> Self {
        let p = pred.as_slice();
        let t = target.as_slice();
        Self {
            loss: msle(pred, target),
            mean_squared_error: mse(t, p),
            mean_absolute_error: mae(t, p),
            r_squared: r_squared(t, p),
        }
    }

    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("loss", self.loss),
            ("mean_squared_error", self.mean_squared_error),
            ("mean_absolute_error", self.mean_absolute_error),
            ("r_squared", self.r_squared),
        ]
    }

    /// Average of per-batch metrics weighted by batch size.
    pub fn weighted_mean(parts: &[(Metrics, usize)]) -> Self {
        let total: usize = parts.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Self::default();
        }
        let w = |f: fn(&Metrics) -> f64| parts.iter().map(|(m, n)| f(m) * *n as f64).sum::<f64>() / total as f64;
        Self {
            loss: w(|m| m.loss),
            mean_squared_error: w(|m| m.mean_squared_error),
            mean_absolute_error: w(|m| m.mean_absolute_error),
            r_squared: w(|m| m.r_squared),
        }
    }
}

/// `1 - (1 - R²) (n - 1) / (n - p - 1)`; NaN when `n <= p + 1`.
pub fn adjusted_r_squared(r2: f64, n: usize, p: usize) -> f64 {
    if n <= p + 1 {
        return f64::NAN;
    }
    1.0 - (1.0 - r2) * ((n - 1) as f64 / (n - p - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msle_is_zero_on_perfect_predictions() {
        let a = DMatrix::from_row_slice(2, 2, &[0.1, 0.5, 0.9, 0.0]);
        assert_eq!(msle(&a, &a), 0.0);
        assert!(Metrics::evaluate(&a, &a).r_squared > 0.999);
    }

    #[test]
    fn msle_gradient_matches_finite_differences() {
        let p = DMatrix::from_row_slice(1, 3, &[0.2, 0.6, 0.9]);
        let t = DMatrix::from_row_slice(1, 3, &[0.3, 0.5, 0.1]);
        let g = msle_grad(&p, &t);
        let h = 1e-7;
        for k in 0..3 {
            let mut up = p.clone();
            up[k] += h;
            let mut down = p.clone();
            down[k] -= h;
            let numeric = (msle(&up, &t) - msle(&down, &t)) / (2.0 * h);
            assert!((numeric - g[k]).abs() < 1e-6);
        }
    }

    #[test]
    fn adjusted_r2_penalises_predictors() {
        assert!((adjusted_r_squared(0.9, 101, 10) - (1.0 - 0.1 * 100.0 / 90.0)).abs() < 1e-12);
        assert!(adjusted_r_squared(0.9, 5, 10).is_nan());
    }
}

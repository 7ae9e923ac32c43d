//! Ordinary least squares.
//!
//! Used for the calibration line of emulator predictions against XSPEC flux:
//!
//! ```text
//! minimize Σ (y_i - a - b x_i)^2
//! ```
//!
//! The design matrix is tall (one row per flux bin), so we solve through SVD.
//! (Nalgebra's `QR::solve` is intended for square systems and panics otherwise.)

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    for &tol in &[1e-12, 1e-9, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}

/// `y ≈ intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
    pub r_squared: f64,
}

/// Fit a straight line through finite `(x, y)` pairs.
///
/// Returns `None` with fewer than two usable points or a degenerate `x`.
pub fn fit_line(x: &[f64], y: &[f64]) -> Option<LineFit> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let mut design = DMatrix::zeros(pairs.len(), 2);
    let mut target = DVector::zeros(pairs.len());
    for (i, &(a, b)) in pairs.iter().enumerate() {
        design[(i, 0)] = 1.0;
        design[(i, 1)] = a;
        target[i] = b;
    }
    let beta = solve_least_squares(&design, &target)?;

    let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let fitted: Vec<f64> = pairs.iter().map(|p| beta[0] + beta[1] * p.0).collect();
    Some(LineFit {
        intercept: beta[0],
        slope: beta[1],
        r_squared: crate::math::r_squared(&ys, &fitted),
    })
}

//! Integrated autocorrelation time of ensemble chains.
//!
//! The normalised autocorrelation function is averaged over walkers, summed into
//! a running estimate `τ(M) = 2 Σ_{t<=M} ρ(t) - 1`, and the window `M` is the first
//! lag with `M >= c τ(M)`. Lags are accumulated incrementally, so the cost is
//! `O(n M)` rather than `O(n²)`.

/// Default window constant.
pub const AUTOCORR_C: f64 = 5.0;

/// Chains shorter than `TOLERANCE * τ` give unreliable estimates.
pub const AUTOCORR_TOLERANCE: f64 = 50.0;

/// Integrated autocorrelation time of one parameter.
///
/// `walkers` holds one series per walker, all of the same length. Walkers with zero
/// variance are ignored; if no walker varies the result is NaN.
pub fn integrated_time(walkers: &[Vec<f64>], c: f64) -> f64 {
    let n = walkers.iter().map(Vec::len).min().unwrap_or(0);
    if n < 2 {
        return f64::NAN;
    }

    let centered: Vec<(Vec<f64>, f64)> = walkers
        .iter()
        .filter_map(|w| {
            let w = &w[..n];
            let mean = w.iter().sum::<f64>() / n as f64;
            let x: Vec<f64> = w.iter().map(|v| v - mean).collect();
            let denom: f64 = x.iter().map(|v| v * v).sum();
            (denom > 0.0 && denom.is_finite()).then_some((x, denom))
        })
        .collect();
    if centered.is_empty() {
        return f64::NAN;
    }

    let mut cumulative = 0.0;
    let mut tau = f64::NAN;
    for lag in 0..n {
        let rho = centered
            .iter()
            .map(|(x, denom)| {
                x[..n - lag]
                    .iter()
                    .zip(x[lag..].iter())
                    .map(|(a, b)| a * b)
                    .sum::<f64>()
                    / denom
            })
            .sum::<f64>()
            / centered.len() as f64;
        cumulative += rho;
        tau = 2.0 * cumulative - 1.0;
        if (lag as f64) >= c * tau {
            break;
        }
    }
    tau
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use rand_distr::StandardNormal;

    fn ar1(rng: &mut StdRng, phi: f64, n: usize) -> Vec<f64> {
        let mut x = 0.0;
        (0..n)
            .map(|_| {
                let e: f64 = rng.sample(StandardNormal);
                x = phi * x + e;
                x
            })
            .collect()
    }

    #[test]
    fn white_noise_has_unit_time() {
        let mut rng = StdRng::seed_from_u64(7);
        let walkers: Vec<Vec<f64>> = (0..32).map(|_| ar1(&mut rng, 0.0, 4000)).collect();
        let tau = integrated_time(&walkers, AUTOCORR_C);
        assert!((0.7..1.3).contains(&tau), "tau = {tau}");
    }

    #[test]
    fn ar1_matches_closed_form() {
        // τ = (1 + φ) / (1 - φ) = 3 for φ = 0.5.
        let mut rng = StdRng::seed_from_u64(11);
        let walkers: Vec<Vec<f64>> = (0..32).map(|_| ar1(&mut rng, 0.5, 4000)).collect();
        let tau = integrated_time(&walkers, AUTOCORR_C);
        assert!((2.4..3.6).contains(&tau), "tau = {tau}");
    }

    #[test]
    fn constant_chain_is_nan() {
        let walkers = vec![vec![1.0; 100]; 4];
        assert!(integrated_time(&walkers, AUTOCORR_C).is_nan());
    }
}

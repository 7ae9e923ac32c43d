//! Convergence diagnostics and posterior summaries of a finished chain.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::math::{AUTOCORR_C, AUTOCORR_TOLERANCE, integrated_time, mean, percentile};
use crate::mcmc::Chain;

/// Integrated autocorrelation time of every coordinate.
pub fn autocorr_times(chain: &Chain) -> Vec<f64> {
    (0..chain.ndim())
        .into_par_iter()
        .map(|d| integrated_time(&chain.series(d), AUTOCORR_C))
        .collect()
}

/// Burn-in `⌊2 max τ⌋` and thinning `max(1, ⌊0.5 min τ⌋)`, ignoring NaN times.
///
/// Burn-in is capped at half the chain so a short run still leaves samples.
pub fn burn_and_thin(tau: &[f64], n_steps: usize) -> (usize, usize) {
    let finite: Vec<f64> = tau.iter().copied().filter(|t| t.is_finite()).collect();
    if finite.is_empty() {
        return (0, 1);
    }
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let burn = ((2.0 * max) as usize).min(n_steps / 2);
    let thin = ((0.5 * min) as usize).max(1);
    (burn, thin)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub label: String,
    pub p16: f64,
    pub median: f64,
    pub p84: f64,
    pub truth: Option<f64>,
}

impl ParamSummary {
    pub fn minus(&self) -> f64 {
        self.median - self.p16
    }

    pub fn plus(&self) -> f64 {
        self.p84 - self.median
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub params: Vec<ParamSummary>,
    pub tau: Vec<f64>,
    pub burn: usize,
    pub thin: usize,
    pub n_steps: usize,
    pub n_walkers: usize,
    pub n_samples: usize,
    pub acceptance_fraction: Option<f64>,
    /// False when the chain is shorter than `50 τ` for some coordinate.
    pub converged: bool,
    pub max_likelihood: Option<Vec<f64>>,
    pub max_log_prob: Option<f64>,
}

/// Percentile summary of the burned-in, thinned chain.
///
/// `truth` is aligned with the chain labels when given.
pub fn summarize(chain: &Chain, truth: Option<&[f64]>, max_likelihood: Option<Vec<f64>>) -> Result<PosteriorSummary, AppError> {
    if chain.n_steps() < 2 {
        return Err(AppError::new(3, "Chain needs at least two steps to summarise."));
    }
    let tau = autocorr_times(chain);
    let (burn, thin) = burn_and_thin(&tau, chain.n_steps());

    let too_short: Vec<&str> = chain
        .labels
        .iter()
        .zip(tau.iter())
        .filter(|(_, t)| !t.is_finite() || (chain.n_steps() as f64) < AUTOCORR_TOLERANCE * **t)
        .map(|(l, _)| l.as_str())
        .collect();
    if !too_short.is_empty() {
        warn!(params = ?too_short, steps = chain.n_steps(), "chain shorter than 50 autocorrelation times");
    }

    let flat = chain.flat(burn, thin);
    let params = chain
        .labels
        .iter()
        .enumerate()
        .map(|(d, label)| {
            let column: Vec<f64> = flat.iter().map(|p| p[d]).collect();
            ParamSummary {
                label: label.clone(),
                p16: percentile(&column, 16.0),
                median: percentile(&column, 50.0),
                p84: percentile(&column, 84.0),
                truth: truth.and_then(|t| t.get(d).copied()),
            }
        })
        .collect();

    let acceptance = chain.acceptance_fraction();
    info!(burn, thin, samples = flat.len(), "posterior summarised");
    Ok(PosteriorSummary {
        params,
        tau,
        burn,
        thin,
        n_steps: chain.n_steps(),
        n_walkers: chain.n_walkers,
        n_samples: flat.len(),
        acceptance_fraction: (!acceptance.is_empty()).then(|| mean(&acceptance)),
        converged: too_short.is_empty(),
        max_likelihood,
        max_log_prob: chain.best().map(|(_, lp)| lp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn burn_and_thin_follow_tau() {
        assert_eq!(burn_and_thin(&[10.0, 40.5, f64::NAN], 1000), (81, 5));
        assert_eq!(burn_and_thin(&[1.2], 1000), (2, 1));
        assert_eq!(burn_and_thin(&[400.0], 100), (50, 200));
        assert_eq!(burn_and_thin(&[f64::NAN], 100), (0, 1));
    }

    #[test]
    fn percentiles_of_independent_draws() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut chain = Chain::new(vec!["u".into()], 0);
        for _ in 0..2000 {
            let pos: Vec<Vec<f64>> = (0..8).map(|_| vec![rng.r#gen::<f64>()]).collect();
            chain.push_step(pos, vec![0.0; 8], vec![0.0; 8]).unwrap();
        }
        let summary = summarize(&chain, Some(&[0.5][..]), None).unwrap();
        let p = &summary.params[0];
        assert!((p.median - 0.5).abs() < 0.02);
        assert!((p.p16 - 0.16).abs() < 0.02);
        assert!((p.p84 - 0.84).abs() < 0.02);
        assert_eq!(p.truth, Some(0.5));
        assert!(summary.tau[0] < 2.0);
        assert!(summary.converged);
        assert_eq!(summary.acceptance_fraction, None);
    }
}

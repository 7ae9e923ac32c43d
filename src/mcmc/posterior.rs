//! Posterior of a spectral model given an observed spectrum.
//!
//! The parameter vector is `θ = [model params..., log_f]`, where `log_f` scales a
//! fractional model error added in quadrature to the measurement error:
//!
//! ```text
//! σ² = yerr² + m² exp(2 log_f)
//! ln L = -0.5 Σ ((y - m)² / σ² + ln σ²)
//! ```

use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, info};

use crate::domain::ObservedSpectrum;
use crate::error::AppError;
use crate::math::{Minimum, NelderMeadOptions, nelder_mead};
use crate::models::SpectralModel;

/// Jitter applied to the starting point of the maximum-likelihood search.
pub const ML_JITTER: f64 = 0.1;

pub struct Posterior<'a, M: SpectralModel + ?Sized> {
    pub model: &'a M,
    pub data: &'a ObservedSpectrum,
    /// Inclusive prior box for every entry of θ (last one is `log_f`).
    pub bounds: Vec<[f64; 2]>,
}

impl<'a, M: SpectralModel + ?Sized> Posterior<'a, M> {
    pub fn new(model: &'a M, data: &'a ObservedSpectrum, bounds: Vec<[f64; 2]>) -> Result<Self, AppError> {
        if bounds.len() < 2 {
            return Err(AppError::new(2, "Posterior needs at least one model parameter plus log_f."));
        }
        if data.is_empty() {
            return Err(AppError::new(3, "Observed spectrum has no bins."));
        }
        if let Some(i) = bounds.iter().position(|b| !(b[0] < b[1])) {
            return Err(AppError::new(2, format!("Prior bound {i} is empty: {:?}.", bounds[i])));
        }
        Ok(Self { model, data, bounds })
    }

    pub fn ndim(&self) -> usize {
        self.bounds.len()
    }

    /// Uniform box prior: `0` inside, `-inf` outside.
    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        let inside = theta.len() == self.bounds.len()
            && theta
                .iter()
                .zip(self.bounds.iter())
                .all(|(&v, b)| v.is_finite() && v >= b[0] && v <= b[1]);
        if inside { 0.0 } else { f64::NEG_INFINITY }
    }

    /// Gaussian log-likelihood with fractional model error. Model failures give `-inf`.
    pub fn log_likelihood(&self, theta: &[f64]) -> f64 {
        let Some((&log_f, params)) = theta.split_last() else {
            return f64::NEG_INFINITY;
        };
        let model = match self.model.evaluate_at(params, &self.data.energy) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "model evaluation failed");
                return f64::NEG_INFINITY;
            }
        };
        let f2 = (2.0 * log_f).exp();
        let ll = -0.5
            * self
                .data
                .y
                .iter()
                .zip(self.data.yerr.iter())
                .zip(model.iter())
                .map(|((&y, &yerr), &m)| {
                    let sigma2 = yerr * yerr + m * m * f2;
                    (y - m).powi(2) / sigma2 + sigma2.ln()
                })
                .sum::<f64>();
        if ll.is_finite() { ll } else { f64::NEG_INFINITY }
    }

    /// `(log posterior, log prior)`; the likelihood is skipped outside the prior.
    pub fn log_probability(&self, theta: &[f64]) -> (f64, f64) {
        let lp = self.log_prior(theta);
        if !lp.is_finite() {
            return (f64::NEG_INFINITY, lp);
        }
        let total = lp + self.log_likelihood(theta);
        (if total.is_finite() { total } else { f64::NEG_INFINITY }, lp)
    }

    /// Nelder–Mead on `-ln L` from `start + 0.1 N(0, 1)`, restricted to the prior box.
    ///
    /// The jittered start is pulled back to `start` coordinate-wise when it leaves
    /// the prior.
    pub fn max_likelihood<R: Rng>(&self, start: &[f64], rng: &mut R) -> Result<Minimum, AppError> {
        if start.len() != self.ndim() {
            return Err(AppError::new(
                2,
                format!("Starting point has {} values, expected {}.", start.len(), self.ndim()),
            ));
        }
        let x0: Vec<f64> = start
            .iter()
            .zip(self.bounds.iter())
            .map(|(&s, b)| {
                let z: f64 = rng.sample(StandardNormal);
                let v = s + ML_JITTER * z;
                if v >= b[0] && v <= b[1] { v } else { s }
            })
            .collect();
        if !self.log_prior(&x0).is_finite() {
            return Err(AppError::new(2, "Maximum-likelihood starting point lies outside the prior."));
        }

        let nll = |theta: &[f64]| {
            if self.log_prior(theta).is_finite() {
                -self.log_likelihood(theta)
            } else {
                f64::INFINITY
            }
        };
        let result = nelder_mead(nll, &x0, NelderMeadOptions::default());
        if !result.fun.is_finite() {
            return Err(AppError::new(4, "Maximum-likelihood search found no finite likelihood."));
        }
        info!(
            nll = result.fun,
            iterations = result.iterations,
            evaluations = result.evaluations,
            converged = result.converged,
            "maximum likelihood"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::PowerLaw;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn observed(model: &PowerLaw, truth: &[f64]) -> ObservedSpectrum {
        let energy: Vec<f64> = (1..=20).map(|i| 0.5 * i as f64).collect();
        let y = model.evaluate_at(truth, &energy).unwrap();
        ObservedSpectrum {
            energy_err: vec![0.25; energy.len()],
            yerr: y.iter().map(|v| 0.05 * v).collect(),
            y,
            energy,
        }
    }

    fn bounds() -> Vec<[f64; 2]> {
        vec![[0.5, 3.5], [-2.0, 2.0], [-5.0, 1.0]]
    }

    #[test]
    fn prior_is_a_box() {
        let model = PowerLaw::new(64);
        let data = observed(&model, &[2.0, 0.0]);
        let post = Posterior::new(&model, &data, bounds()).unwrap();
        assert_eq!(post.log_prior(&[2.0, 0.0, -3.0]), 0.0);
        assert_eq!(post.log_prior(&[4.0, 0.0, -3.0]), f64::NEG_INFINITY);
        assert_eq!(post.log_prior(&[2.0, 0.0]), f64::NEG_INFINITY);
        let (lp, prior) = post.log_probability(&[2.0, 0.0, 2.0]);
        assert_eq!((lp, prior), (f64::NEG_INFINITY, f64::NEG_INFINITY));
    }

    #[test]
    fn likelihood_peaks_at_the_truth() {
        let model = PowerLaw::new(256);
        let data = observed(&model, &[2.0, 0.0]);
        let post = Posterior::new(&model, &data, bounds()).unwrap();
        let at_truth = post.log_likelihood(&[2.0, 0.0, -5.0]);
        assert!(at_truth > post.log_likelihood(&[2.2, 0.0, -5.0]));
        assert!(at_truth > post.log_likelihood(&[2.0, 0.1, -5.0]));
    }

    #[test]
    fn likelihood_matches_the_closed_form() {
        let model = PowerLaw::new(16);
        let data = ObservedSpectrum {
            energy: vec![1.0],
            energy_err: vec![0.1],
            y: vec![2.0],
            yerr: vec![0.5],
        };
        let post = Posterior::new(&model, &data, bounds()).unwrap();
        // index 0, norm 1 -> m = 1 everywhere
        let log_f = 0.5f64.ln();
        let sigma2 = 0.25 + 0.25;
        let expected = -0.5 * (1.0 / sigma2 + f64::ln(sigma2));
        assert!((post.log_likelihood(&[0.0, 0.0, log_f]) - expected).abs() < 1e-12);
    }

    #[test]
    fn max_likelihood_recovers_the_parameters() {
        let model = PowerLaw::new(512);
        let data = observed(&model, &[2.0, 0.3]);
        let post = Posterior::new(&model, &data, bounds()).unwrap();
        let ml = post
            .max_likelihood(&[1.8, 0.2, -3.0], &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert!((ml.x[0] - 2.0).abs() < 0.1, "{:?}", ml.x);
        assert!((ml.x[1] - 0.3).abs() < 0.1, "{:?}", ml.x);
    }

    #[test]
    fn empty_prior_interval_is_rejected() {
        let model = PowerLaw::new(8);
        let data = observed(&model, &[2.0, 0.0]);
        let err = Posterior::new(&model, &data, vec![[1.0, 1.0], [0.0, 1.0]]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}

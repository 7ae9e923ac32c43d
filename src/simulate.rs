//! Synthetic target spectra for fitting.
//!
//! Folded targets come straight from XSPEC `fakeit`. Model-space targets take a
//! model spectrum `m` and add noise:
//!
//! ```text
//! yerr = 0.01 + 0.05 U
//! y    = m + |f m| U + yerr U        (U ~ Uniform[0, 1), drawn per bin)
//! ```

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ObservedSpectrum, Spectrum};
use crate::error::AppError;
use crate::models::{SpectralModel, XspecModel};

/// Default fractional model error of the noise recipe.
pub const DEFAULT_FRACTION: f64 = 0.1;

/// A target spectrum together with the noiseless model it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub observed: ObservedSpectrum,
    pub model: Spectrum,
    pub params: Vec<f64>,
    /// Fractional model error of the noise recipe; `None` for XSPEC fake data.
    pub fraction: Option<f64>,
}

impl Simulation {
    /// Truth in fit space: the parameters followed by `ln f` when known.
    pub fn truth(&self) -> Vec<f64> {
        let mut truth = self.params.clone();
        if let Some(f) = self.fraction.filter(|f| *f > 0.0) {
            truth.push(f.ln());
        }
        truth
    }
}

/// Half of each bin's width, with bin edges at the midpoints between centres.
pub fn half_widths(energy: &[f64]) -> Vec<f64> {
    let n = energy.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            let lo = if i == 0 { energy[0] - 0.5 * (energy[1] - energy[0]) } else { 0.5 * (energy[i - 1] + energy[i]) };
            let hi = if i == n - 1 {
                energy[n - 1] + 0.5 * (energy[n - 1] - energy[n - 2])
            } else {
                0.5 * (energy[i] + energy[i + 1])
            };
            0.5 * (hi - lo)
        })
        .collect()
}

pub fn add_noise<R: Rng>(model: &Spectrum, fraction: f64, rng: &mut R) -> ObservedSpectrum {
    let yerr: Vec<f64> = model.flux.iter().map(|_| 0.01 + 0.05 * rng.r#gen::<f64>()).collect();
    let y = model
        .flux
        .iter()
        .zip(yerr.iter())
        .map(|(&m, &e)| {
            let scatter = (fraction * m).abs() * rng.r#gen::<f64>();
            m + scatter + e * rng.r#gen::<f64>()
        })
        .collect();
    ObservedSpectrum {
        energy: model.energy.clone(),
        energy_err: half_widths(&model.energy),
        y,
        yerr,
    }
}

/// Model-space target from any spectral model (XSPEC or the emulator).
pub fn simulate_model<M, R>(model: &M, params: &[f64], fraction: f64, rng: &mut R) -> Result<Simulation, AppError>
where
    M: SpectralModel + ?Sized,
    R: Rng,
{
    let spectrum = model.evaluate(params)?;
    let observed = add_noise(&spectrum, fraction, rng);
    info!(source = %model.label(), bins = observed.len(), fraction, "target simulated");
    Ok(Simulation {
        observed,
        model: spectrum,
        params: params.to_vec(),
        fraction: Some(fraction),
    })
}

/// Folded target faked through the configured response; `fak_file` receives the
/// XSPEC `.fak` spectrum.
pub fn simulate_folded(model: &XspecModel, params: &[f64], fak_file: &Path) -> Result<Simulation, AppError> {
    let (observed, folded) = model.fake_data(params, fak_file)?;
    if observed.is_empty() {
        return Err(AppError::new(5, "fakeit produced no channels inside the noticed range."));
    }
    info!(channels = observed.len(), file = %fak_file.display(), "folded target simulated");
    Ok(Simulation {
        observed,
        model: folded,
        params: params.to_vec(),
        fraction: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::PowerLaw;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn half_widths_split_neighbouring_bins() {
        assert_eq!(half_widths(&[1.0, 2.0, 4.0]), vec![0.5, 0.75, 1.0]);
        assert_eq!(half_widths(&[3.0]), vec![0.0]);
    }

    #[test]
    fn noise_only_adds_positive_offsets() {
        let spectrum = Spectrum {
            energy: vec![1.0, 2.0, 3.0, 4.0],
            flux: vec![10.0, 5.0, 2.0, 1.0],
        };
        let obs = add_noise(&spectrum, 0.1, &mut StdRng::seed_from_u64(5));
        for i in 0..4 {
            assert!((0.01..0.06).contains(&obs.yerr[i]));
            let excess = obs.y[i] - spectrum.flux[i];
            assert!(excess >= 0.0 && excess < 0.1 * spectrum.flux[i] + obs.yerr[i]);
        }
    }

    #[test]
    fn simulation_keeps_the_noiseless_model() {
        let model = PowerLaw::new(32);
        let sim = simulate_model(&model, &[1.5, 0.0], DEFAULT_FRACTION, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(sim.model.energy, sim.observed.energy);
        assert_eq!(sim.params, vec![1.5, 0.0]);
        assert_eq!(sim.observed.len(), 32);
        let truth = sim.truth();
        assert_eq!(truth.len(), 3);
        assert!((truth[2] - DEFAULT_FRACTION.ln()).abs() < 1e-12);
    }
}

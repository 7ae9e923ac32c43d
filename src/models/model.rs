//! The model trait and spectrum post-processing.

use crate::domain::Spectrum;
use crate::error::AppError;
use crate::math::interp_many;

/// A forward model evaluated at sampling-space parameters.
///
/// `Sync` so fits and generators can evaluate from rayon workers.
pub trait SpectralModel: Sync {
    /// Short human-readable name for logs and plot titles.
    fn label(&self) -> String;

    /// Spectrum on the model's native energy grid.
    fn evaluate(&self, params: &[f64]) -> Result<Spectrum, AppError>;

    /// Flux linearly interpolated onto `energies` (clamped at the grid ends).
    fn evaluate_at(&self, params: &[f64], energies: &[f64]) -> Result<Vec<f64>, AppError> {
        let spectrum = self.evaluate(params)?;
        if spectrum.is_empty() {
            return Err(AppError::new(4, format!("{} returned an empty spectrum.", self.label())));
        }
        Ok(interp_many(energies, &spectrum.energy, &spectrum.flux))
    }
}

/// Average every `m` consecutive bins of energy and flux.
///
/// A trailing group shorter than `m` is dropped; `m <= 1` returns the input.
pub fn smooth(spectrum: &Spectrum, m: usize) -> Spectrum {
    if m <= 1 {
        return spectrum.clone();
    }
    let block_mean = |values: &[f64]| -> Vec<f64> {
        values
            .chunks_exact(m)
            .map(|c| c.iter().sum::<f64>() / m as f64)
            .collect()
    };
    Spectrum {
        energy: block_mean(&spectrum.energy),
        flux: block_mean(&spectrum.flux),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Power law `norm * E^-index` on a fixed log grid; params = `[index, log10(norm)]`.
    pub struct PowerLaw {
        pub energy: Vec<f64>,
    }

    impl PowerLaw {
        /// `n >= 2` bins log-spaced over 0.5-20 keV.
        pub fn new(n: usize) -> Self {
            let (lo, hi) = (0.5f64.log10(), 20f64.log10());
            Self {
                energy: (0..n).map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / (n - 1) as f64)).collect(),
            }
        }
    }

    impl SpectralModel for PowerLaw {
        fn label(&self) -> String {
            "powerlaw".to_string()
        }

        fn evaluate(&self, params: &[f64]) -> Result<Spectrum, AppError> {
            let norm = 10f64.powf(params[1]);
            Ok(Spectrum {
                energy: self.energy.clone(),
                flux: self.energy.iter().map(|e| norm * e.powf(-params[0])).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::PowerLaw;
    use super::*;

    #[test]
    fn smooth_averages_blocks_and_drops_the_tail() {
        let s = Spectrum {
            energy: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            flux: vec![10.0, 20.0, 30.0, 40.0, 50.0],
        };
        let out = smooth(&s, 2);
        assert_eq!(out.energy, vec![1.5, 3.5]);
        assert_eq!(out.flux, vec![15.0, 35.0]);
        assert_eq!(smooth(&s, 1), s);
    }

    #[test]
    fn evaluate_at_interpolates_onto_new_energies() {
        let model = PowerLaw {
            energy: vec![1.0, 2.0, 3.0],
        };
        let flux = model.evaluate_at(&[-1.0, 0.0], &[1.5, 10.0]).unwrap();
        assert!((flux[0] - 1.5).abs() < 1e-12);
        assert!((flux[1] - 3.0).abs() < 1e-12);
    }
}

use std::path::Path;

use nalgebra::DMatrix;

use crate::dataset::Scalers;
use crate::domain::Spectrum;
use crate::error::AppError;
use crate::io::{read_json, write_json};
use crate::math::interp_many;
use crate::models::SpectralModel;
use crate::nn::network::{Network, NetworkRecord};

/// Trained network plus the scalers that map physical rows into its space.
#[derive(Debug, Clone, PartialEq)]
pub struct Emulator {
    pub network: Network,
    pub scalers: Scalers,
}

impl Emulator {
    pub fn new(network: Network, scalers: Scalers) -> Result<Self, AppError> {
        let kept = scalers.labels.len().saturating_sub(scalers.removed.len());
        if network.n_inputs() != kept {
            return Err(AppError::new(
                2,
                format!("Network expects {} inputs but the scalers keep {kept} parameters.", network.n_inputs()),
            ));
        }
        if network.n_outputs() != scalers.energy.len() {
            return Err(AppError::new(
                2,
                format!(
                    "Network predicts {} bins but the energy grid has {}.",
                    network.n_outputs(),
                    scalers.energy.len()
                ),
            ));
        }
        Ok(Self { network, scalers })
    }

    pub fn load(network_path: &Path, scalers_path: &Path) -> Result<Self, AppError> {
        let record: NetworkRecord = read_json(network_path)?;
        let scalers: Scalers = read_json(scalers_path)?;
        Self::new(Network::from_record(&record)?, scalers)
    }

    pub fn save_network(&self, path: &Path) -> Result<(), AppError> {
        write_json(path, &self.network.to_record())
    }

    pub fn labels(&self) -> &[String] {
        &self.scalers.labels
    }

    pub fn energy(&self) -> &[f64] {
        &self.scalers.energy
    }

    /// Flux on the training grid for one full parameter row.
    pub fn predict(&self, params: &[f64]) -> Result<Vec<f64>, AppError> {
        let x = self.scalers.normalize_params(params)?;
        Ok(self.scalers.denormalize_flux(&self.network.predict_row(&x)))
    }

    /// Batched [`Emulator::predict`].
    pub fn predict_many(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, AppError> {
        let normalized = rows
            .iter()
            .map(|r| self.scalers.normalize_params(r))
            .collect::<Result<Vec<_>, _>>()?;
        let n_in = self.network.n_inputs();
        let x = DMatrix::from_fn(normalized.len(), n_in, |i, j| normalized[i][j]);
        let y = self.network.predict(&x);
        Ok(y.row_iter()
            .map(|row| self.scalers.denormalize_flux(&row.iter().copied().collect::<Vec<_>>()))
            .collect())
    }
}

impl SpectralModel for Emulator {
    fn label(&self) -> String {
        "emulator".to_string()
    }

    fn evaluate(&self, params: &[f64]) -> Result<Spectrum, AppError> {
        Ok(Spectrum {
            energy: self.scalers.energy.clone(),
            flux: self.predict(params)?,
        })
    }

    fn evaluate_at(&self, params: &[f64], energies: &[f64]) -> Result<Vec<f64>, AppError> {
        let flux = self.predict(params)?;
        Ok(interp_many(energies, &self.scalers.energy, &flux))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::dataset::MinMaxScaler;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn emulator() -> Emulator {
        let cfg = NetworkConfig {
            neurons: 4,
            hidden: 1,
            dropout: 0.1,
        };
        let network = Network::build(2, 3, &cfg, &mut StdRng::seed_from_u64(4));
        let scale = |lo: f64, hi: f64, range: [f64; 2]| MinMaxScaler::fit([lo, hi], range).unwrap();
        let scalers = Scalers {
            labels: vec!["a".into(), "fixed".into(), "b".into()],
            removed: vec![1],
            params: vec![scale(0.0, 1.0, [-1.0, 1.0]), scale(0.0, 10.0, [-1.0, 1.0])],
            flux: vec![scale(0.0, 2.0, [0.0, 1.0]), scale(0.0, 4.0, [0.0, 1.0]), scale(1.0, 3.0, [0.0, 1.0])],
            energy: vec![1.0, 2.0, 4.0],
        };
        Emulator::new(network, scalers).unwrap()
    }

    #[test]
    fn predictions_stay_inside_the_flux_ranges() {
        let emu = emulator();
        let flux = emu.predict(&[0.5, 7.0, 3.0]).unwrap();
        assert_eq!(flux.len(), 3);
        assert!((0.0..=2.0).contains(&flux[0]));
        assert!((1.0..=3.0).contains(&flux[2]));
        assert!(emu.predict(&[0.5, 3.0]).is_err());
    }

    #[test]
    fn batch_and_single_predictions_agree() {
        let emu = emulator();
        let rows = vec![vec![0.1, 0.0, 9.0], vec![0.9, 0.0, 1.0]];
        let batch = emu.predict_many(&rows).unwrap();
        for (row, b) in rows.iter().zip(batch.iter()) {
            let single = emu.predict(row).unwrap();
            assert!(single.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9));
        }
    }

    #[test]
    fn evaluate_at_clamps_outside_the_grid() {
        let emu = emulator();
        let row = [0.2, 0.0, 5.0];
        let flux = emu.predict(&row).unwrap();
        let at = emu.evaluate_at(&row, &[0.1, 3.0, 100.0]).unwrap();
        assert_eq!(at[0], flux[0]);
        assert!((at[1] - 0.5 * (flux[1] + flux[2])).abs() < 1e-12);
        assert_eq!(at[2], flux[2]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let emu = emulator();
        let mut scalers = emu.scalers.clone();
        scalers.energy.push(8.0);
        assert_eq!(Emulator::new(emu.network.clone(), scalers).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn saved_network_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let emu = emulator();
        let net_path = dir.path().join("network.json");
        let scalers_path = dir.path().join("scalers.json");
        emu.save_network(&net_path).unwrap();
        write_json(&scalers_path, &emu.scalers).unwrap();
        let back = Emulator::load(&net_path, &scalers_path).unwrap();
        let row = [0.3, 0.0, 2.0];
        let (a, b) = (emu.predict(&row).unwrap(), back.predict(&row).unwrap());
        assert!(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9));
    }
}

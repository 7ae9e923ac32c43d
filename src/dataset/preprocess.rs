//! Model files to normalized training arrays.
//!
//! Steps:
//!
//! 1. read every `*.ipac` model (in parallel), check that parameter names and the
//!    energy grid agree across files
//! 2. drop parameter columns that never vary
//! 3. scale parameters per column and flux per energy bin
//! 4. drop rows whose normalized flux is not finite

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PreprocessConfig;
use crate::dataset::{MinMaxScaler, fit_columns, inverse_transform_row, transform_row};
use crate::error::AppError;
use crate::io::read_model_ipac;

/// Relative tolerance when comparing energy grids of different files.
const GRID_RTOL: f64 = 1e-9;

/// Raw models as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModels {
    pub labels: Vec<String>,
    pub energy: Vec<f64>,
    pub params: Vec<Vec<f64>>,
    pub flux: Vec<Vec<f64>>,
    pub files: Vec<PathBuf>,
}

impl LoadedModels {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Training arrays (raw and normalized) over the kept parameter columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub labels: Vec<String>,
    pub energy: Vec<f64>,
    pub inputs: Vec<Vec<f64>>,
    pub inputs_norm: Vec<Vec<f64>>,
    pub outputs: Vec<Vec<f64>>,
    pub outputs_norm: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn n_inputs(&self) -> usize {
        self.labels.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.energy.len()
    }
}

/// Everything needed to map between physical rows and network space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalers {
    /// All parameter labels, in file order.
    pub labels: Vec<String>,
    /// Indices (into `labels`) of the uniform columns that were dropped.
    pub removed: Vec<usize>,
    pub params: Vec<MinMaxScaler>,
    pub flux: Vec<MinMaxScaler>,
    pub energy: Vec<f64>,
}

impl Scalers {
    pub fn kept_labels(&self) -> Vec<String> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.removed.contains(i))
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Keep only the columns the network was trained on.
    pub fn select_kept(&self, full_row: &[f64]) -> Vec<f64> {
        full_row
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.removed.contains(i))
            .map(|(_, &v)| v)
            .collect()
    }

    /// Full parameter row to normalized network input.
    pub fn normalize_params(&self, full_row: &[f64]) -> Result<Vec<f64>, AppError> {
        if full_row.len() != self.labels.len() {
            return Err(AppError::new(
                2,
                format!("Expected {} parameters, got {}.", self.labels.len(), full_row.len()),
            ));
        }
        Ok(transform_row(&self.params, &self.select_kept(full_row)))
    }

    pub fn denormalize_flux(&self, norm: &[f64]) -> Vec<f64> {
        inverse_transform_row(&self.flux, norm)
    }
}

pub fn list_model_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::new(2, format!("Failed to read models dir '{}': {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "ipac"))
        .collect();
    files.sort();
    Ok(files)
}

pub fn load_models(dir: &Path) -> Result<LoadedModels, AppError> {
    let files = list_model_files(dir)?;
    if files.is_empty() {
        return Err(AppError::new(3, format!("No .ipac model files in '{}'.", dir.display())));
    }

    let records = files
        .par_iter()
        .map(|p| read_model_ipac(p))
        .collect::<Result<Vec<_>, AppError>>()?;

    let first = &records[0];
    let labels = first.names.clone();
    let energy = first.spectrum.energy.clone();

    for (rec, path) in records.iter().zip(files.iter()).skip(1) {
        if rec.names != labels {
            return Err(AppError::new(
                2,
                format!("Parameter names in '{}' differ from '{}'.", path.display(), files[0].display()),
            ));
        }
        if !same_grid(&rec.spectrum.energy, &energy) {
            return Err(AppError::new(
                2,
                format!("Energy grid in '{}' differs from '{}'.", path.display(), files[0].display()),
            ));
        }
    }

    debug!(files = files.len(), bins = energy.len(), "models loaded");
    let (params, flux) = records.into_iter().map(|r| (r.values, r.spectrum.flux)).unzip();
    Ok(LoadedModels {
        labels,
        energy,
        params,
        flux,
        files,
    })
}

fn same_grid(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= GRID_RTOL * x.abs().max(y.abs()))
}

/// Drop columns whose value is identical in every row.
///
/// Returns the reduced rows and the removed column indices.
pub fn remove_uniform_columns(rows: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<usize>) {
    let Some(first) = rows.first() else {
        return (Vec::new(), Vec::new());
    };
    let removed: Vec<usize> = (0..first.len())
        .filter(|&c| rows.iter().all(|r| r[c] == first[c]))
        .collect();
    let kept = rows
        .iter()
        .map(|r| {
            r.iter()
                .enumerate()
                .filter(|(i, _)| !removed.contains(i))
                .map(|(_, &v)| v)
                .collect()
        })
        .collect();
    (kept, removed)
}

pub fn preprocess(models: &LoadedModels, cfg: &PreprocessConfig) -> Result<(Dataset, Scalers), AppError> {
    if models.is_empty() {
        return Err(AppError::new(3, "No models to preprocess."));
    }

    let (params, removed) = remove_uniform_columns(&models.params);
    if !removed.is_empty() {
        let names: Vec<&str> = removed.iter().map(|&i| models.labels[i].as_str()).collect();
        info!(?names, "removed uniform parameter columns");
    }

    let param_scalers = fit_columns(&params, cfg.param_range);
    let flux_scalers = fit_columns(&models.flux, cfg.flux_range);

    let mut dataset = Dataset {
        labels: Vec::new(),
        energy: models.energy.clone(),
        inputs: Vec::new(),
        inputs_norm: Vec::new(),
        outputs: Vec::new(),
        outputs_norm: Vec::new(),
    };
    let mut dropped = 0usize;
    for (p, f) in params.iter().zip(models.flux.iter()) {
        let f_norm = transform_row(&flux_scalers, f);
        if f_norm.len() != dataset.energy.len() || f_norm.iter().any(|v| !v.is_finite()) {
            dropped += 1;
            continue;
        }
        dataset.inputs_norm.push(transform_row(&param_scalers, p));
        dataset.inputs.push(p.clone());
        dataset.outputs.push(f.clone());
        dataset.outputs_norm.push(f_norm);
    }
    if dropped > 0 {
        warn!(dropped, "removed rows with non-finite flux");
    }
    if dataset.is_empty() {
        return Err(AppError::new(3, "No usable rows remain after preprocessing."));
    }

    let scalers = Scalers {
        labels: models.labels.clone(),
        removed,
        params: param_scalers,
        flux: flux_scalers,
        energy: models.energy.clone(),
    };
    dataset.labels = scalers.kept_labels();
    Ok((dataset, scalers))
}

//! Mini-batch training, early stopping and k-fold cross-validation.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{NetworkConfig, TrainingConfig};
use crate::dataset::{Dataset, kfold};
use crate::error::AppError;
use crate::math::mean_std_columns;
use crate::nn::loss::{Metrics, adjusted_r_squared, msle_grad};
use crate::nn::network::Network;
use crate::nn::optim::{Adam, AdamConfig};

/// Per-epoch metric series keyed `loss`, `mean_squared_error`, ... and `val_*`.
pub type History = BTreeMap<String, Vec<f64>>;

/// Fold histories merged per metric: `{metric: [[epochs of fold 1], [fold 2], ...]}`.
pub type FoldHistories = BTreeMap<String, Vec<Vec<f64>>>;

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    /// Network with the weights of the best validation epoch.
    pub network: Network,
    pub history: History,
    /// Zero-based epoch of the lowest validation loss.
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub epochs_run: usize,
}

/// Rows `x` and targets `y` as matrices.
pub struct Split<'a> {
    pub x: &'a DMatrix<f64>,
    pub y: &'a DMatrix<f64>,
}

pub fn rows_to_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let cols = rows.first().map_or(0, Vec::len);
    DMatrix::from_fn(rows.len(), cols, |i, j| rows[i][j])
}

fn record(history: &mut History, prefix: &str, m: &Metrics) {
    for (name, value) in m.named() {
        history.entry(format!("{prefix}{name}")).or_default().push(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Improved,
    Waiting,
    Stop,
}

/// Tracks the lowest validation loss; `patience == 0` never stops.
#[derive(Debug, Clone, Copy)]
struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    fn update(&mut self, loss: f64) -> Progress {
        if loss < self.best {
            self.best = loss;
            self.wait = 0;
            return Progress::Improved;
        }
        self.wait += 1;
        if self.patience > 0 && self.wait >= self.patience {
            Progress::Stop
        } else {
            Progress::Waiting
        }
    }
}

/// Train `network` with Adam on MSLE, validating after each epoch.
///
/// Stops after `patience` epochs without a lower validation loss (never when
/// `patience` is 0) and returns the best-epoch weights.
pub fn fit(
    mut network: Network,
    train: Split<'_>,
    val: Split<'_>,
    cfg: &TrainingConfig,
    seed: u64,
) -> Result<TrainOutcome, AppError> {
    let n = train.x.nrows();
    if n == 0 || val.x.nrows() == 0 {
        return Err(AppError::new(3, "Training and validation sets must not be empty."));
    }
    let batch = cfg.batch_size.clamp(1, n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut adam = Adam::new(AdamConfig::new(cfg.learning_rate, cfg.clipnorm));

    let mut history = History::new();
    let mut best = (network.clone(), 0usize);
    let mut stopper = EarlyStopping::new(cfg.patience);
    let mut order: Vec<usize> = (0..n).collect();
    let mut epochs_run = 0;

    for epoch in 0..cfg.epochs {
        order.shuffle(&mut rng);
        let mut parts = Vec::with_capacity(n.div_ceil(batch));
        for idx in order.chunks(batch) {
            let xb = train.x.select_rows(idx);
            let yb = train.y.select_rows(idx);
            let (pred, caches) = network.forward_train(&xb, &mut rng);
            parts.push((Metrics::evaluate(&pred, &yb), idx.len()));
            let grads = network.backward(&caches, msle_grad(&pred, &yb));
            adam.step(&mut network.params_mut(), &grads);
        }
        epochs_run = epoch + 1;

        let train_metrics = Metrics::weighted_mean(&parts);
        let val_metrics = Metrics::evaluate(&network.predict(val.x), val.y);
        if !val_metrics.loss.is_finite() {
            return Err(AppError::new(4, format!("Validation loss became non-finite at epoch {epochs_run}.")));
        }
        record(&mut history, "", &train_metrics);
        record(&mut history, "val_", &val_metrics);
        debug!(epoch = epochs_run, loss = train_metrics.loss, val_loss = val_metrics.loss, "epoch");

        match stopper.update(val_metrics.loss) {
            Progress::Improved => best = (network.clone(), epoch),
            Progress::Waiting => {}
            Progress::Stop => {
                info!(epoch = epochs_run, best_epoch = best.1 + 1, "early stopping");
                break;
            }
        }
    }

    let (network, best_epoch) = best;
    let best_val_loss = stopper.best;
    Ok(TrainOutcome {
        network,
        history,
        best_epoch,
        best_val_loss,
        epochs_run,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub test: Metrics,
    pub adjusted_r_squared: f64,
}

#[derive(Debug, Clone)]
pub struct CrossValidation {
    pub reports: Vec<FoldReport>,
    pub histories: FoldHistories,
    /// Network of the fold with the lowest best validation loss.
    pub best_fold: usize,
    pub network: Network,
}

/// Train one freshly initialised network per fold, in parallel.
///
/// Fold `i` uses seed `seed + i` for initialisation, shuffling and dropout.
pub fn cross_validate(
    dataset: &Dataset,
    net_cfg: &NetworkConfig,
    cfg: &TrainingConfig,
) -> Result<CrossValidation, AppError> {
    let folds = kfold(dataset.len(), cfg.folds, cfg.seed)?;
    let x = rows_to_matrix(&dataset.inputs_norm);
    let y = rows_to_matrix(&dataset.outputs_norm);
    info!(
        rows = dataset.len(),
        inputs = x.ncols(),
        outputs = y.ncols(),
        folds = folds.len(),
        "cross-validation started"
    );

    let results = folds
        .par_iter()
        .enumerate()
        .map(|(i, fold)| {
            let seed = cfg.seed + i as u64;
            let net = Network::build(x.ncols(), y.ncols(), net_cfg, &mut StdRng::seed_from_u64(seed));
            debug!(fold = i, params = net.param_count(), "network built");
            let (xt, yt) = (x.select_rows(&fold.train), y.select_rows(&fold.train));
            let (xv, yv) = (x.select_rows(&fold.validation), y.select_rows(&fold.validation));
            let outcome = fit(net, Split { x: &xt, y: &yt }, Split { x: &xv, y: &yv }, cfg, seed)?;

            let test = Metrics::evaluate(&outcome.network.predict(&xv), &yv);
            let report = FoldReport {
                fold: i + 1,
                epochs_run: outcome.epochs_run,
                best_epoch: outcome.best_epoch + 1,
                test,
                adjusted_r_squared: adjusted_r_squared(test.r_squared, yv.nrows(), yv.ncols()),
            };
            info!(
                fold = report.fold,
                loss = test.loss,
                mse = test.mean_squared_error,
                mae = test.mean_absolute_error,
                r2 = test.r_squared,
                adj_r2 = report.adjusted_r_squared,
                "fold finished"
            );
            Ok((report, outcome))
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let mut histories = FoldHistories::new();
    for (_, outcome) in &results {
        for (name, series) in &outcome.history {
            histories.entry(name.clone()).or_default().push(series.clone());
        }
    }
    if results.iter().any(|(r, _)| r.adjusted_r_squared.is_nan()) {
        warn!("adjusted R² is undefined for folds with too few rows");
    }

    let best = results
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.1.best_val_loss.total_cmp(&b.1.1.best_val_loss))
        .map(|(i, _)| i)
        .ok_or_else(|| AppError::new(3, "No folds were trained."))?;

    let mut reports = Vec::with_capacity(results.len());
    let mut network = None;
    for (i, (report, outcome)) in results.into_iter().enumerate() {
        if i == best {
            network = Some(outcome.network);
        }
        reports.push(report);
    }
    let network = network.ok_or_else(|| AppError::new(3, "No folds were trained."))?;
    info!(best_fold = best + 1, "cross-validation finished");

    Ok(CrossValidation {
        reports,
        histories,
        best_fold: best + 1,
        network,
    })
}

/// Per-epoch mean and standard deviation of one metric across folds,
/// truncated to the shortest fold.
pub fn mean_std_per_epoch(folds: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    mean_std_columns(folds)
}

//! Network layers over row-major batches (`batch × features`).
//!
//! Every layer has a training forward pass that returns a cache, an inference
//! forward pass, and a backward pass that turns the upstream gradient into the
//! input gradient plus parameter gradients.

use nalgebra::{DMatrix, RowDVector};
use rand::Rng;
use rand::distributions::Uniform;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Fully connected layer `y = x W + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub weights: DMatrix<f64>,
    pub bias: RowDVector<f64>,
}

/// Weight initialisation schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Init {
    /// Truncated normal with `σ = sqrt(2 / fan_in)` (redrawn beyond 2σ).
    HeNormal,
    /// Uniform on `±sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform,
}

impl Dense {
    pub fn new<R: Rng>(n_in: usize, n_out: usize, init: Init, rng: &mut R) -> Self {
        let weights = match init {
            Init::HeNormal => {
                let std = (2.0 / n_in.max(1) as f64).sqrt();
                DMatrix::from_fn(n_in, n_out, |_, _| loop {
                    let z: f64 = StandardNormal.sample(rng);
                    if z.abs() <= 2.0 {
                        break z * std;
                    }
                })
            }
            Init::GlorotUniform => {
                let limit = (6.0 / (n_in + n_out).max(1) as f64).sqrt();
                let uniform = Uniform::new_inclusive(-limit, limit);
                DMatrix::from_fn(n_in, n_out, |_, _| uniform.sample(rng))
            }
        };
        Self {
            weights,
            bias: RowDVector::zeros(n_out),
        }
    }

    pub fn n_in(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_out(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut y = x * &self.weights;
        for mut row in y.row_iter_mut() {
            row += &self.bias;
        }
        y
    }

    /// Returns `(dx, dW, db)`.
    pub fn backward(&self, x: &DMatrix<f64>, dy: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>, RowDVector<f64>) {
        let dw = x.transpose() * dy;
        let db = dy.row_sum();
        let dx = dy * self.weights.transpose();
        (dx, dw, db)
    }
}

/// Batch normalisation with learned scale/offset and running statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    pub gamma: RowDVector<f64>,
    pub beta: RowDVector<f64>,
    pub running_mean: RowDVector<f64>,
    pub running_var: RowDVector<f64>,
    pub momentum: f64,
    pub eps: f64,
}

/// Values kept from a training forward pass of [`BatchNorm`].
#[derive(Debug, Clone)]
pub struct BatchNormCache {
    x_hat: DMatrix<f64>,
    inv_std: RowDVector<f64>,
}

impl BatchNorm {
    pub const MOMENTUM: f64 = 0.99;
    pub const EPS: f64 = 1e-3;

    pub fn new(n: usize) -> Self {
        Self {
            gamma: RowDVector::from_element(n, 1.0),
            beta: RowDVector::zeros(n),
            running_mean: RowDVector::zeros(n),
            running_var: RowDVector::from_element(n, 1.0),
            momentum: Self::MOMENTUM,
            eps: Self::EPS,
        }
    }

    pub fn forward_inference(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut y = x.clone();
        for (j, mut col) in y.column_iter_mut().enumerate() {
            let inv_std = 1.0 / (self.running_var[j] + self.eps).sqrt();
            for v in col.iter_mut() {
                *v = (*v - self.running_mean[j]) * inv_std * self.gamma[j] + self.beta[j];
            }
        }
        y
    }

    /// Normalise with batch statistics and update the running averages.
    pub fn forward_train(&mut self, x: &DMatrix<f64>) -> (DMatrix<f64>, BatchNormCache) {
        let n = x.nrows().max(1) as f64;
        let mut x_hat = x.clone();
        let mut inv_std = RowDVector::zeros(x.ncols());

        for (j, mut col) in x_hat.column_iter_mut().enumerate() {
            let mean = col.iter().sum::<f64>() / n;
            let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let s = 1.0 / (var + self.eps).sqrt();
            for v in col.iter_mut() {
                *v = (*v - mean) * s;
            }
            inv_std[j] = s;
            self.running_mean[j] = self.momentum * self.running_mean[j] + (1.0 - self.momentum) * mean;
            self.running_var[j] = self.momentum * self.running_var[j] + (1.0 - self.momentum) * var;
        }

        let mut y = x_hat.clone();
        for (j, mut col) in y.column_iter_mut().enumerate() {
            for v in col.iter_mut() {
                *v = *v * self.gamma[j] + self.beta[j];
            }
        }
        (y, BatchNormCache { x_hat, inv_std })
    }

    /// Returns `(dx, dgamma, dbeta)`.
    pub fn backward(&self, cache: &BatchNormCache, dy: &DMatrix<f64>) -> (DMatrix<f64>, RowDVector<f64>, RowDVector<f64>) {
        let n = dy.nrows().max(1) as f64;
        let cols = dy.ncols();
        let mut dx = DMatrix::zeros(dy.nrows(), cols);
        let mut dgamma = RowDVector::zeros(cols);
        let mut dbeta = RowDVector::zeros(cols);

        for j in 0..cols {
            let dy_j = dy.column(j);
            let xh_j = cache.x_hat.column(j);
            dbeta[j] = dy_j.sum();
            dgamma[j] = dy_j.dot(&xh_j);

            // dx̂ = dy · γ
            let g = self.gamma[j];
            let sum_dxh = g * dbeta[j];
            let sum_dxh_xh = g * dgamma[j];
            let scale = cache.inv_std[j] / n;
            for i in 0..dy.nrows() {
                let dxh = dy_j[i] * g;
                dx[(i, j)] = scale * (n * dxh - sum_dxh - xh_j[i] * sum_dxh_xh);
            }
        }
        (dx, dgamma, dbeta)
    }
}

pub fn relu(x: &DMatrix<f64>) -> DMatrix<f64> {
    x.map(|v| v.max(0.0))
}

/// Gradient through ReLU given the pre-activation input.
pub fn relu_backward(x: &DMatrix<f64>, dy: &DMatrix<f64>) -> DMatrix<f64> {
    dy.zip_map(x, |g, v| if v > 0.0 { g } else { 0.0 })
}

pub fn sigmoid(x: &DMatrix<f64>) -> DMatrix<f64> {
    x.map(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Gradient through the sigmoid given its output.
pub fn sigmoid_backward(y: &DMatrix<f64>, dy: &DMatrix<f64>) -> DMatrix<f64> {
    dy.zip_map(y, |g, s| g * s * (1.0 - s))
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`.
pub fn dropout_mask<R: Rng>(rows: usize, cols: usize, rate: f64, rng: &mut R) -> DMatrix<f64> {
    let keep = 1.0 - rate;
    DMatrix::from_fn(rows, cols, |_, _| if rng.r#gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
}

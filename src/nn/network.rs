//! Sequential dense emulator network.
//!
//! Architecture:
//!
//! ```text
//! Dense(n) -> BatchNorm -> ReLU
//! hidden x [ Dense(n) -> ReLU -> Dropout -> BatchNorm ]
//! Dense(out) -> Sigmoid
//! ```

use nalgebra::{DMatrix, RowDVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::error::AppError;
use crate::nn::layers::{
    BatchNorm, BatchNormCache, Dense, Init, dropout_mask, relu, relu_backward, sigmoid, sigmoid_backward,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Dense(Dense),
    BatchNorm(BatchNorm),
    Relu,
    Sigmoid,
    Dropout(f64),
}

/// Per-layer state kept from a training forward pass.
#[derive(Debug, Clone)]
pub enum Cache {
    /// Layer input (Dense, ReLU).
    Input(DMatrix<f64>),
    BatchNorm(BatchNormCache),
    /// Layer output (Sigmoid).
    Output(DMatrix<f64>),
    Mask(DMatrix<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    pub fn build<R: Rng>(n_in: usize, n_out: usize, cfg: &NetworkConfig, rng: &mut R) -> Self {
        let n = cfg.neurons;
        let mut layers = vec![
            Layer::Dense(Dense::new(n_in, n, Init::HeNormal, rng)),
            Layer::BatchNorm(BatchNorm::new(n)),
            Layer::Relu,
        ];
        for _ in 0..cfg.hidden {
            layers.push(Layer::Dense(Dense::new(n, n, Init::HeNormal, rng)));
            layers.push(Layer::Relu);
            if cfg.dropout > 0.0 {
                layers.push(Layer::Dropout(cfg.dropout));
            }
            layers.push(Layer::BatchNorm(BatchNorm::new(n)));
        }
        layers.push(Layer::Dense(Dense::new(n, n_out, Init::GlorotUniform, rng)));
        layers.push(Layer::Sigmoid);
        Self { layers }
    }

    pub fn n_inputs(&self) -> usize {
        self.layers
            .iter()
            .find_map(|l| match l {
                Layer::Dense(d) => Some(d.n_in()),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn n_outputs(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|l| match l {
                Layer::Dense(d) => Some(d.n_out()),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Inference pass (running statistics, no dropout).
    pub fn predict(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        self.layers.iter().fold(x.clone(), |h, layer| match layer {
            Layer::Dense(d) => d.forward(&h),
            Layer::BatchNorm(bn) => bn.forward_inference(&h),
            Layer::Relu => relu(&h),
            Layer::Sigmoid => sigmoid(&h),
            Layer::Dropout(_) => h,
        })
    }

    pub fn predict_row(&self, x: &[f64]) -> Vec<f64> {
        let input = DMatrix::from_row_slice(1, x.len(), x);
        self.predict(&input).iter().copied().collect()
    }

    /// Training pass: batch statistics, dropout, caches for [`Network::backward`].
    pub fn forward_train<R: Rng>(&mut self, x: &DMatrix<f64>, rng: &mut R) -> (DMatrix<f64>, Vec<Cache>) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();
        for layer in self.layers.iter_mut() {
            h = match layer {
                Layer::Dense(d) => {
                    let out = d.forward(&h);
                    caches.push(Cache::Input(h));
                    out
                }
                Layer::BatchNorm(bn) => {
                    let (out, cache) = bn.forward_train(&h);
                    caches.push(Cache::BatchNorm(cache));
                    out
                }
                Layer::Relu => {
                    let out = relu(&h);
                    caches.push(Cache::Input(h));
                    out
                }
                Layer::Sigmoid => {
                    let out = sigmoid(&h);
                    caches.push(Cache::Output(out.clone()));
                    out
                }
                Layer::Dropout(rate) => {
                    let mask = dropout_mask(h.nrows(), h.ncols(), *rate, rng);
                    let out = h.component_mul(&mask);
                    caches.push(Cache::Mask(mask));
                    out
                }
            };
        }
        (h, caches)
    }

    /// Back-propagate `dy` and return parameter gradients in [`Network::params_mut`] order.
    pub fn backward(&self, caches: &[Cache], dy: DMatrix<f64>) -> Vec<Vec<f64>> {
        let mut grads: Vec<Vec<f64>> = Vec::new();
        let mut g = dy;
        for (layer, cache) in self.layers.iter().zip(caches.iter()).rev() {
            g = match (layer, cache) {
                (Layer::Dense(d), Cache::Input(x)) => {
                    let (dx, dw, db) = d.backward(x, &g);
                    grads.push(db.as_slice().to_vec());
                    grads.push(dw.as_slice().to_vec());
                    dx
                }
                (Layer::BatchNorm(bn), Cache::BatchNorm(c)) => {
                    let (dx, dgamma, dbeta) = bn.backward(c, &g);
                    grads.push(dbeta.as_slice().to_vec());
                    grads.push(dgamma.as_slice().to_vec());
                    dx
                }
                (Layer::Relu, Cache::Input(x)) => relu_backward(x, &g),
                (Layer::Sigmoid, Cache::Output(y)) => sigmoid_backward(y, &g),
                (Layer::Dropout(_), Cache::Mask(m)) => g.component_mul(m),
                _ => g,
            };
        }
        grads.reverse();
        grads
    }

    /// Trainable tensors: `(W, b)` per Dense, `(γ, β)` per BatchNorm, input to output.
    pub fn params_mut(&mut self) -> Vec<&mut [f64]> {
        let mut out: Vec<&mut [f64]> = Vec::new();
        for layer in self.layers.iter_mut() {
            match layer {
                Layer::Dense(d) => {
                    out.push(d.weights.as_mut_slice());
                    out.push(d.bias.as_mut_slice());
                }
                Layer::BatchNorm(bn) => {
                    out.push(bn.gamma.as_mut_slice());
                    out.push(bn.beta.as_mut_slice());
                }
                _ => {}
            }
        }
        out
    }

    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| match l {
                Layer::Dense(d) => d.weights.len() + d.bias.len(),
                Layer::BatchNorm(bn) => bn.gamma.len() + bn.beta.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn to_record(&self) -> NetworkRecord {
        NetworkRecord {
            layers: self
                .layers
                .iter()
                .map(|l| match l {
                    Layer::Dense(d) => LayerRecord::Dense {
                        n_in: d.n_in(),
                        n_out: d.n_out(),
                        weights: d.weights.as_slice().to_vec(),
                        bias: d.bias.as_slice().to_vec(),
                    },
                    Layer::BatchNorm(bn) => LayerRecord::BatchNorm {
                        gamma: bn.gamma.as_slice().to_vec(),
                        beta: bn.beta.as_slice().to_vec(),
                        running_mean: bn.running_mean.as_slice().to_vec(),
                        running_var: bn.running_var.as_slice().to_vec(),
                        momentum: bn.momentum,
                        eps: bn.eps,
                    },
                    Layer::Relu => LayerRecord::Relu,
                    Layer::Sigmoid => LayerRecord::Sigmoid,
                    Layer::Dropout(rate) => LayerRecord::Dropout { rate: *rate },
                })
                .collect(),
        }
    }

    pub fn from_record(record: &NetworkRecord) -> Result<Self, AppError> {
        let layers = record
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| match l {
                LayerRecord::Dense { n_in, n_out, weights, bias } => {
                    if weights.len() != n_in * n_out || bias.len() != *n_out {
                        return Err(AppError::new(2, format!("Network layer {i}: dense shape mismatch.")));
                    }
                    Ok(Layer::Dense(Dense {
                        weights: DMatrix::from_column_slice(*n_in, *n_out, weights),
                        bias: RowDVector::from_row_slice(bias),
                    }))
                }
                LayerRecord::BatchNorm { gamma, beta, running_mean, running_var, momentum, eps } => {
                    let n = gamma.len();
                    if beta.len() != n || running_mean.len() != n || running_var.len() != n {
                        return Err(AppError::new(2, format!("Network layer {i}: batch-norm shape mismatch.")));
                    }
                    Ok(Layer::BatchNorm(BatchNorm {
                        gamma: RowDVector::from_row_slice(gamma),
                        beta: RowDVector::from_row_slice(beta),
                        running_mean: RowDVector::from_row_slice(running_mean),
                        running_var: RowDVector::from_row_slice(running_var),
                        momentum: *momentum,
                        eps: *eps,
                    }))
                }
                LayerRecord::Relu => Ok(Layer::Relu),
                LayerRecord::Sigmoid => Ok(Layer::Sigmoid),
                LayerRecord::Dropout { rate } => Ok(Layer::Dropout(*rate)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layers })
    }
}

/// Serializable network: shapes plus flat (column-major) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub layers: Vec<LayerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerRecord {
    Dense {
        n_in: usize,
        n_out: usize,
        weights: Vec<f64>,
        bias: Vec<f64>,
    },
    BatchNorm {
        gamma: Vec<f64>,
        beta: Vec<f64>,
        running_mean: Vec<f64>,
        running_var: Vec<f64>,
        momentum: f64,
        eps: f64,
    },
    Relu,
    Sigmoid,
    Dropout {
        rate: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small() -> Network {
        let cfg = NetworkConfig {
            neurons: 6,
            hidden: 2,
            dropout: 0.3,
        };
        Network::build(3, 4, &cfg, &mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn architecture_follows_the_layer_recipe() {
        let net = small();
        let kinds: Vec<&str> = net
            .layers
            .iter()
            .map(|l| match l {
                Layer::Dense(_) => "dense",
                Layer::BatchNorm(_) => "bn",
                Layer::Relu => "relu",
                Layer::Sigmoid => "sigmoid",
                Layer::Dropout(_) => "dropout",
            })
            .collect();
        assert_eq!(
            kinds,
            [
                "dense", "bn", "relu", "dense", "relu", "dropout", "bn", "dense", "relu", "dropout", "bn", "dense",
                "sigmoid"
            ]
        );
        assert_eq!(net.n_inputs(), 3);
        assert_eq!(net.n_outputs(), 4);
        // 3*6+6 + 2*6 + 2*(6*6+6 + 2*6) + 6*4+4
        assert_eq!(net.param_count(), 24 + 12 + 2 * 54 + 28);
    }

    #[test]
    fn outputs_are_probabilities() {
        let net = small();
        let y = net.predict_row(&[0.1, -0.5, 0.9]);
        assert_eq!(y.len(), 4);
        assert!(y.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn gradients_align_with_parameters() {
        let mut net = small();
        let x = DMatrix::from_fn(5, 3, |i, j| (i as f64 - j as f64) * 0.1);
        let mut rng = StdRng::seed_from_u64(2);
        let (y, caches) = net.forward_train(&x, &mut rng);
        let grads = net.backward(&caches, DMatrix::from_element(y.nrows(), y.ncols(), 1.0));
        let shapes: Vec<usize> = net.params_mut().iter().map(|p| p.len()).collect();
        assert_eq!(grads.iter().map(Vec::len).collect::<Vec<_>>(), shapes);
    }

    #[test]
    fn dense_gradient_matches_finite_differences() {
        let cfg = NetworkConfig {
            neurons: 4,
            hidden: 0,
            dropout: 0.0,
        };
        let mut net = Network::build(2, 2, &cfg, &mut StdRng::seed_from_u64(5));
        let x = DMatrix::from_row_slice(3, 2, &[0.2, -0.4, 1.0, 0.3, -0.7, 0.8]);
        let mut rng = StdRng::seed_from_u64(0);

        let loss = |n: &mut Network| {
            let (y, _) = n.forward_train(&x, &mut StdRng::seed_from_u64(0));
            y.sum()
        };
        let (y, caches) = net.forward_train(&x, &mut rng);
        let grads = net.backward(&caches, DMatrix::from_element(y.nrows(), y.ncols(), 1.0));

        // Last dense layer weights are the second-to-last tensor.
        let idx = grads.len() - 2;
        let h = 1e-6;
        for k in 0..grads[idx].len() {
            let mut plus = net.clone();
            plus.params_mut()[idx][k] += h;
            let mut minus = net.clone();
            minus.params_mut()[idx][k] -= h;
            let numeric = (loss(&mut plus) - loss(&mut minus)) / (2.0 * h);
            assert!((numeric - grads[idx][k]).abs() < 1e-5, "{numeric} vs {}", grads[idx][k]);
        }
    }

    #[test]
    fn record_restores_identical_predictions() {
        let net = small();
        let json = serde_json::to_string(&net.to_record()).unwrap();
        let back = Network::from_record(&serde_json::from_str(&json).unwrap()).unwrap();
        let x = [0.3, 0.2, -0.1];
        for (a, b) in net.predict_row(&x).iter().zip(back.predict_row(&x).iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(Network::from_record(&net.to_record()).unwrap(), net);
    }
}

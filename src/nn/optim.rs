//! Adam with per-tensor gradient-norm clipping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Rescale each tensor's gradient to at most this L2 norm (`<= 0` disables).
    pub clipnorm: f64,
}

impl AdamConfig {
    pub fn new(learning_rate: f64, clipnorm: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            clipnorm,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    pub cfg: AdamConfig,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    t: u64,
}

impl Adam {
    pub fn new(cfg: AdamConfig) -> Self {
        Self {
            cfg,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    /// Apply one update. `params` and `grads` are aligned tensor by tensor.
    pub fn step(&mut self, params: &mut [&mut [f64]], grads: &[Vec<f64>]) {
        if self.m.is_empty() {
            self.m = grads.iter().map(|g| vec![0.0; g.len()]).collect();
            self.v = grads.iter().map(|g| vec![0.0; g.len()]).collect();
        }
        self.t += 1;
        let AdamConfig { learning_rate, beta1, beta2, eps, clipnorm } = self.cfg;
        let t = self.t as f64;
        let lr_t = learning_rate * (1.0 - beta2.powf(t)).sqrt() / (1.0 - beta1.powf(t));

        for (i, (p, g)) in params.iter_mut().zip(grads.iter()).enumerate() {
            let norm = g.iter().map(|x| x * x).sum::<f64>().sqrt();
            let clip = if clipnorm > 0.0 && norm > clipnorm { clipnorm / norm } else { 1.0 };
            let (m, v) = (&mut self.m[i], &mut self.v[i]);
            for k in 0..p.len() {
                let gk = g[k] * clip;
                m[k] = beta1 * m[k] + (1.0 - beta1) * gk;
                v[k] = beta2 * v[k] + (1.0 - beta2) * gk * gk;
                p[k] -= lr_t * m[k] / (v[k].sqrt() + eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut adam = Adam::new(AdamConfig::new(0.1, 0.0));
        let mut w = vec![1.0, -1.0];
        adam.step(&mut [w.as_mut_slice()], &[vec![0.5, -2.0]]);
        assert!((w[0] - 0.9).abs() < 1e-6);
        assert!((w[1] + 0.9).abs() < 1e-6);
    }

    #[test]
    fn minimises_a_quadratic() {
        let mut adam = Adam::new(AdamConfig::new(0.05, 1.0));
        let mut w = vec![3.0];
        for _ in 0..2000 {
            let g = vec![2.0 * (w[0] - 1.0)];
            adam.step(&mut [w.as_mut_slice()], &[g]);
        }
        assert!((w[0] - 1.0).abs() < 1e-2, "{}", w[0]);
    }
}

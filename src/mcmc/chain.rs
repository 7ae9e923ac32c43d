//! Walker history of an ensemble run.

use crate::error::AppError;

pub const LOG_PROB_LABEL: &str = "log_prob";
pub const LOG_PRIOR_LABEL: &str = "log_prior";

/// Positions indexed `[step][walker][dim]`, with per-step log-probability and
/// log-prior of every walker.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub labels: Vec<String>,
    pub n_walkers: usize,
    pub positions: Vec<Vec<Vec<f64>>>,
    pub log_prob: Vec<Vec<f64>>,
    pub log_prior: Vec<Vec<f64>>,
    /// Accepted proposals per walker (empty for chains read back from disk).
    pub accepted: Vec<usize>,
}

impl Chain {
    /// `n_walkers == 0` lets the first pushed step fix the walker count.
    pub fn new(labels: Vec<String>, n_walkers: usize) -> Self {
        Self {
            labels,
            n_walkers,
            positions: Vec::new(),
            log_prob: Vec::new(),
            log_prior: Vec::new(),
            accepted: Vec::new(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.labels.len()
    }

    pub fn n_steps(&self) -> usize {
        self.positions.len()
    }

    pub fn push_step(
        &mut self,
        positions: Vec<Vec<f64>>,
        log_prob: Vec<f64>,
        log_prior: Vec<f64>,
    ) -> Result<(), AppError> {
        if self.n_walkers == 0 {
            self.n_walkers = positions.len();
        }
        let step = self.n_steps();
        if positions.len() != self.n_walkers || log_prob.len() != self.n_walkers || log_prior.len() != self.n_walkers
        {
            return Err(AppError::new(
                2,
                format!("Chain step {step}: expected {} walkers, got {}.", self.n_walkers, positions.len()),
            ));
        }
        if let Some(bad) = positions.iter().position(|p| p.len() != self.ndim()) {
            return Err(AppError::new(
                2,
                format!("Chain step {step}, walker {bad}: expected {} coordinates.", self.ndim()),
            ));
        }
        self.positions.push(positions);
        self.log_prob.push(log_prob);
        self.log_prior.push(log_prior);
        Ok(())
    }

    /// One coordinate as `[walker][step]`.
    pub fn series(&self, dim: usize) -> Vec<Vec<f64>> {
        (0..self.n_walkers)
            .map(|w| self.positions.iter().map(|step| step[w][dim]).collect())
            .collect()
    }

    fn kept_steps(&self, discard: usize, thin: usize) -> impl Iterator<Item = usize> + '_ {
        (discard.min(self.n_steps())..self.n_steps()).step_by(thin.max(1))
    }

    /// Samples after burn-in and thinning, step-major (`emcee` `flat=True` order).
    pub fn flat(&self, discard: usize, thin: usize) -> Vec<Vec<f64>> {
        self.kept_steps(discard, thin)
            .flat_map(|s| self.positions[s].iter().cloned())
            .collect()
    }

    pub fn flat_log_prob(&self, discard: usize, thin: usize) -> Vec<f64> {
        self.kept_steps(discard, thin)
            .flat_map(|s| self.log_prob[s].iter().copied())
            .collect()
    }

    pub fn flat_log_prior(&self, discard: usize, thin: usize) -> Vec<f64> {
        self.kept_steps(discard, thin)
            .flat_map(|s| self.log_prior[s].iter().copied())
            .collect()
    }

    /// [`Chain::flat`] with the log-probability and log-prior of every sample
    /// appended as two extra columns.
    pub fn flat_with_blobs(&self, discard: usize, thin: usize) -> (Vec<String>, Vec<Vec<f64>>) {
        let mut labels = self.labels.clone();
        labels.extend([LOG_PROB_LABEL.to_string(), LOG_PRIOR_LABEL.to_string()]);
        let rows = self
            .flat(discard, thin)
            .into_iter()
            .zip(self.flat_log_prob(discard, thin))
            .zip(self.flat_log_prior(discard, thin))
            .map(|((mut row, lp), prior)| {
                row.extend([lp, prior]);
                row
            })
            .collect();
        (labels, rows)
    }

    /// Fraction of accepted proposals per walker.
    pub fn acceptance_fraction(&self) -> Vec<f64> {
        let steps = self.n_steps().max(1) as f64;
        self.accepted.iter().map(|&a| a as f64 / steps).collect()
    }

    /// Highest log-probability position seen.
    pub fn best(&self) -> Option<(Vec<f64>, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for (s, row) in self.log_prob.iter().enumerate() {
            for (w, &lp) in row.iter().enumerate() {
                if lp.is_finite() && best.is_none_or(|b| lp > b.2) {
                    best = Some((s, w, lp));
                }
            }
        }
        best.map(|(s, w, lp)| (self.positions[s][w].clone(), lp))
    }
}

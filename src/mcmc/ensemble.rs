//! Affine-invariant ensemble sampler.
//!
//! Each step picks one move from the weighted list, randomly splits the walkers
//! into two halves and updates each half against the other. Walkers of a half are
//! independent given the complementary half, so they are proposed and evaluated in
//! parallel; every walker draws from its own RNG seeded by the step RNG.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::mcmc::Chain;

/// Attempts per walker when drawing initial positions inside the prior.
pub const INIT_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Stretch,
    #[serde(rename = "de")]
    DifferentialEvolution,
}

/// One entry of the move mixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveSpec {
    pub kind: MoveKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Stretch scale.
    #[serde(default = "default_a")]
    pub a: f64,
    /// Relative jitter of the DE scale.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// DE scale; `2.38 / sqrt(2 ndim)` when absent.
    #[serde(default)]
    pub gamma0: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_a() -> f64 {
    2.0
}

fn default_sigma() -> f64 {
    1e-5
}

impl MoveSpec {
    pub fn stretch(weight: f64) -> Self {
        Self {
            kind: MoveKind::Stretch,
            weight,
            a: default_a(),
            sigma: default_sigma(),
            gamma0: None,
        }
    }

    pub fn differential_evolution(weight: f64) -> Self {
        Self {
            kind: MoveKind::DifferentialEvolution,
            ..Self::stretch(weight)
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.weight > 0.0 && self.weight.is_finite()) {
            return Err(AppError::new(2, "mcmc.moves: weight must be positive."));
        }
        if self.kind == MoveKind::Stretch && !(self.a > 1.0) {
            return Err(AppError::new(2, "mcmc.moves: stretch scale `a` must exceed 1."));
        }
        Ok(())
    }

    /// Proposal and the log of its Metropolis correction factor.
    fn propose<R: Rng>(&self, x: &[f64], complement: &[&Vec<f64>], rng: &mut R) -> (Vec<f64>, f64) {
        let ndim = x.len();
        match self.kind {
            MoveKind::Stretch => {
                let c = complement[rng.gen_range(0..complement.len())];
                let u: f64 = rng.r#gen();
                let z = ((self.a - 1.0) * u + 1.0).powi(2) / self.a;
                let q = x.iter().zip(c.iter()).map(|(&xi, &ci)| ci + z * (xi - ci)).collect();
                (q, (ndim as f64 - 1.0) * z.ln())
            }
            MoveKind::DifferentialEvolution => {
                let picked: Vec<&&Vec<f64>> = complement.choose_multiple(rng, 2).collect();
                let g0 = self.gamma0.unwrap_or(2.38 / (2.0 * ndim as f64).sqrt());
                let z: f64 = rng.sample(StandardNormal);
                let gamma = g0 * (1.0 + self.sigma * z);
                let q = x
                    .iter()
                    .zip(picked[0].iter().zip(picked[1].iter()))
                    .map(|(&xi, (&a, &b))| xi + gamma * (a - b))
                    .collect();
                (q, 0.0)
            }
        }
    }
}

/// Draw `n` walkers around `center` with `spread · N(0, 1)`, redrawing any that fall
/// where `log_prior` is not finite.
pub fn initial_walkers<R, P>(center: &[f64], spread: f64, n: usize, log_prior: P, rng: &mut R) -> Result<Vec<Vec<f64>>, AppError>
where
    R: Rng,
    P: Fn(&[f64]) -> f64,
{
    (0..n)
        .map(|w| {
            for _ in 0..INIT_ATTEMPTS {
                let p: Vec<f64> = center
                    .iter()
                    .map(|&c| {
                        let z: f64 = rng.sample(StandardNormal);
                        c + spread * z
                    })
                    .collect();
                if log_prior(&p).is_finite() {
                    return Ok(p);
                }
            }
            Err(AppError::new(
                4,
                format!("Could not place walker {w} inside the prior after {INIT_ATTEMPTS} attempts."),
            ))
        })
        .collect()
}

/// Current positions with their log-probability and log-prior.
#[derive(Debug, Clone)]
pub struct State {
    pub positions: Vec<Vec<f64>>,
    pub log_prob: Vec<f64>,
    pub log_prior: Vec<f64>,
}

pub struct EnsembleSampler<F> {
    log_prob_fn: F,
    moves: Vec<MoveSpec>,
    labels: Vec<String>,
}

impl<F> EnsembleSampler<F>
where
    F: Fn(&[f64]) -> (f64, f64) + Sync,
{
    pub fn new(labels: Vec<String>, log_prob_fn: F, moves: Vec<MoveSpec>) -> Result<Self, AppError> {
        if moves.is_empty() {
            return Err(AppError::new(2, "At least one MCMC move is required."));
        }
        for m in &moves {
            m.validate()?;
        }
        Ok(Self {
            log_prob_fn,
            moves,
            labels,
        })
    }

    fn pick_move<R: Rng>(&self, rng: &mut R) -> MoveSpec {
        let total: f64 = self.moves.iter().map(|m| m.weight).sum();
        let mut u = rng.r#gen::<f64>() * total;
        for m in &self.moves {
            if u < m.weight {
                return *m;
            }
            u -= m.weight;
        }
        self.moves[self.moves.len() - 1]
    }

    /// Run `steps` iterations from `initial`, calling `on_step` after every step.
    pub fn run<S>(&self, initial: Vec<Vec<f64>>, steps: usize, seed: u64, mut on_step: S) -> Result<Chain, AppError>
    where
        S: FnMut(usize, &State) -> Result<(), AppError>,
    {
        let n = initial.len();
        let ndim = self.labels.len();
        if n < 2 * ndim || n < 4 {
            return Err(AppError::new(
                2,
                format!("{n} walkers are too few for {ndim} dimensions (need at least {}).", (2 * ndim).max(4)),
            ));
        }
        if let Some(w) = initial.iter().position(|p| p.len() != ndim) {
            return Err(AppError::new(2, format!("Initial walker {w} has the wrong dimension.")));
        }

        let (log_prob, log_prior): (Vec<f64>, Vec<f64>) = initial.par_iter().map(|p| (self.log_prob_fn)(p)).unzip();
        if let Some(w) = log_prob.iter().position(|lp| !lp.is_finite()) {
            return Err(AppError::new(4, format!("Initial walker {w} has a non-finite log-probability.")));
        }

        let mut state = State {
            positions: initial,
            log_prob,
            log_prior,
        };
        let mut chain = Chain::new(self.labels.clone(), n);
        chain.accepted = vec![0; n];
        let mut rng = StdRng::seed_from_u64(seed);
        let every = (steps / 10).max(1);

        for step in 0..steps {
            let mv = self.pick_move(&mut rng);
            let mut halves: Vec<usize> = (0..n).map(|i| i % 2).collect();
            halves.shuffle(&mut rng);

            for half in 0..2 {
                let active: Vec<usize> = (0..n).filter(|&i| halves[i] == half).collect();
                let complement: Vec<&Vec<f64>> =
                    (0..n).filter(|&i| halves[i] != half).map(|i| &state.positions[i]).collect();
                let seeds: Vec<u64> = active.iter().map(|_| rng.r#gen()).collect();

                let updates: Vec<Option<(Vec<f64>, f64, f64)>> = active
                    .par_iter()
                    .zip(seeds.par_iter())
                    .map(|(&k, &s)| {
                        let mut wrng = StdRng::seed_from_u64(s);
                        let (q, log_factor) = mv.propose(&state.positions[k], &complement, &mut wrng);
                        let (lp, prior) = (self.log_prob_fn)(&q);
                        let diff = log_factor + lp - state.log_prob[k];
                        let u: f64 = wrng.r#gen();
                        (lp.is_finite() && diff > u.ln()).then_some((q, lp, prior))
                    })
                    .collect();

                for (&k, update) in active.iter().zip(updates) {
                    if let Some((q, lp, prior)) = update {
                        state.positions[k] = q;
                        state.log_prob[k] = lp;
                        state.log_prior[k] = prior;
                        chain.accepted[k] += 1;
                    }
                }
            }

            chain.push_step(state.positions.clone(), state.log_prob.clone(), state.log_prior.clone())?;
            on_step(step, &state)?;
            if (step + 1) % every == 0 {
                let mean_acc = chain.accepted.iter().sum::<usize>() as f64 / (n * (step + 1)) as f64;
                info!(step = step + 1, of = steps, acceptance = mean_acc, "mcmc progress");
            }
        }
        debug!(steps, walkers = n, "mcmc finished");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{mean, std_dev};

    fn gaussian(theta: &[f64]) -> (f64, f64) {
        if theta.iter().any(|v| v.abs() > 10.0) {
            return (f64::NEG_INFINITY, f64::NEG_INFINITY);
        }
        let lp = -0.5 * ((theta[0] - 1.0).powi(2) + (theta[1] / 2.0).powi(2));
        (lp, 0.0)
    }

    fn sample(moves: Vec<MoveSpec>) -> Chain {
        let labels = vec!["x".to_string(), "y".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        let init = initial_walkers(&[0.0, 0.0], 0.5, 16, |p| gaussian(p).1, &mut rng).unwrap();
        let sampler = EnsembleSampler::new(labels, gaussian, moves).unwrap();
        sampler.run(init, 3000, 7, |_, _| Ok(())).unwrap()
    }

    #[test]
    fn stretch_move_samples_a_gaussian() {
        let chain = sample(vec![MoveSpec::stretch(1.0)]);
        let flat = chain.flat(500, 1);
        let xs: Vec<f64> = flat.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = flat.iter().map(|p| p[1]).collect();
        assert!((mean(&xs) - 1.0).abs() < 0.15, "{}", mean(&xs));
        assert!((std_dev(&ys) - 2.0).abs() < 0.3, "{}", std_dev(&ys));
        let acc = mean(&chain.acceptance_fraction());
        assert!(acc > 0.2 && acc < 0.9, "{acc}");
    }

    #[test]
    fn mixed_moves_sample_a_gaussian() {
        let chain = sample(vec![MoveSpec::differential_evolution(0.8), MoveSpec::stretch(0.2)]);
        let xs: Vec<f64> = chain.flat(500, 1).iter().map(|p| p[0]).collect();
        assert!((mean(&xs) - 1.0).abs() < 0.15, "{}", mean(&xs));
    }

    #[test]
    fn runs_are_reproducible() {
        let a = sample(vec![MoveSpec::stretch(1.0)]);
        let b = sample(vec![MoveSpec::stretch(1.0)]);
        assert_eq!(a.positions[100], b.positions[100]);
    }

    #[test]
    fn too_few_walkers_are_rejected() {
        let sampler = EnsembleSampler::new(vec!["x".into(), "y".into(), "z".into()], |_: &[f64]| (0.0, 0.0), vec![
            MoveSpec::stretch(1.0),
        ])
        .unwrap();
        let err = sampler.run(vec![vec![0.0; 3]; 4], 1, 0, |_, _| Ok(())).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn initial_walkers_respect_the_prior() {
        let mut rng = StdRng::seed_from_u64(3);
        let prior = |p: &[f64]| if p[0] > 0.0 { 0.0 } else { f64::NEG_INFINITY };
        let walkers = initial_walkers(&[0.0], 1.0, 50, prior, &mut rng).unwrap();
        assert!(walkers.iter().all(|w| w[0] > 0.0));
        assert!(initial_walkers(&[-100.0], 1.0, 1, prior, &mut rng).is_err());
    }

    #[test]
    fn moves_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrap {
            moves: Vec<MoveSpec>,
        }
        let w: Wrap = toml::from_str("[[moves]]\nkind = \"de\"\nweight = 0.8\n[[moves]]\nkind = \"stretch\"\n").unwrap();
        assert_eq!(w.moves[0].kind, MoveKind::DifferentialEvolution);
        assert_eq!(w.moves[1], MoveSpec::stretch(1.0));
    }
}

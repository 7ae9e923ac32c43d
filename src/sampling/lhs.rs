//! Latin hypercube sampling.

use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::config::SamplingConfig;
use crate::domain::ParameterSpace;
use crate::error::AppError;

/// Parameter samples in sampling space; one row per model to generate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub labels: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r.get(col).copied()).collect()
    }
}

/// `n` points in the unit hypercube `[0, 1)^d`.
///
/// Each column places exactly one point in each of the `n` strata `[i/n, (i+1)/n)`,
/// in random order, with a uniform offset inside the stratum. Columns listed in
/// `linked` share one stratum order, so their values are co-ranked.
pub fn latin_hypercube<R: Rng>(d: usize, n: usize, linked: &[usize], rng: &mut R) -> Vec<Vec<f64>> {
    let mut rows = vec![vec![0.0; d]; n];
    if n == 0 {
        return rows;
    }

    let mut shared: Vec<usize> = (0..n).collect();
    shared.shuffle(rng);

    for col in 0..d {
        let perm = if linked.contains(&col) {
            shared.clone()
        } else {
            let mut p: Vec<usize> = (0..n).collect();
            p.shuffle(rng);
            p
        };
        for (row, &stratum) in rows.iter_mut().zip(perm.iter()) {
            let jitter: f64 = rng.r#gen();
            row[col] = (stratum as f64 + jitter) / n as f64;
        }
    }
    rows
}

/// Affine map of unit-cube rows onto `[lower, upper]` per column.
pub fn scale(rows: &mut [Vec<f64>], lower: &[f64], upper: &[f64]) {
    for row in rows.iter_mut() {
        for ((v, lo), hi) in row.iter_mut().zip(lower.iter()).zip(upper.iter()) {
            *v = lo + *v * (hi - lo);
        }
    }
}

/// Draw the full training design: LHS, scale to sampling bounds, apply rules.
pub fn create_samples(space: &ParameterSpace, cfg: &SamplingConfig) -> Result<SampleSet, AppError> {
    if cfg.n == 0 {
        return Err(AppError::new(2, "Sample count must be > 0."));
    }

    let linked = cfg
        .linked
        .iter()
        .map(|label| {
            space
                .position(label)
                .ok_or_else(|| AppError::new(2, format!("Unknown linked parameter '{label}'.")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut rows = latin_hypercube(space.len(), cfg.n, &linked, &mut rng);
    let (lower, upper) = space.bounds();
    scale(&mut rows, &lower, &upper);
    debug!(n = cfg.n, d = space.len(), ?linked, "latin hypercube drawn");

    for rule in &cfg.rules {
        let redrawn = rule.apply_all(&mut rows, space, &mut rng)?;
        info!(
            target_param = %rule.target,
            when = %rule.when,
            redrawn,
            "conditional rule applied"
        );
    }

    Ok(SampleSet {
        labels: space.labels(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stratum_is_hit_once() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = 50;
        let rows = latin_hypercube(3, n, &[], &mut rng);
        for col in 0..3 {
            let mut strata: Vec<usize> = rows.iter().map(|r| (r[col] * n as f64) as usize).collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn linked_columns_share_strata() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 40;
        let rows = latin_hypercube(4, n, &[0, 2], &mut rng);
        for r in &rows {
            assert_eq!((r[0] * n as f64) as usize, (r[2] * n as f64) as usize);
        }
    }

    #[test]
    fn scaled_rows_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut rows = latin_hypercube(2, 100, &[], &mut rng);
        scale(&mut rows, &[-1.0, 10.0], &[1.0, 20.0]);
        assert!(rows.iter().all(|r| (-1.0..1.0).contains(&r[0]) && (10.0..20.0).contains(&r[1])));
    }
}

//! Conditional redraw rules that couple two sampled parameters.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::ParameterSpace;
use crate::error::AppError;

/// If the physical value of `when` lies below `threshold` while `target > split`,
/// `target` is redrawn uniformly from `below`; if it lies above `threshold` while
/// `target < split`, `target` is redrawn from `above`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    pub when: String,
    pub threshold: f64,
    pub target: String,
    pub split: f64,
    pub below: [f64; 2],
    pub above: [f64; 2],
}

impl ConditionalRule {
    pub fn validate(&self, space: &ParameterSpace) -> Result<(), AppError> {
        for label in [&self.when, &self.target] {
            if space.position(label).is_none() {
                return Err(AppError::new(
                    2,
                    format!("sampling rule references unknown free parameter '{label}'."),
                ));
            }
        }
        if self.when == self.target {
            return Err(AppError::new(2, "sampling rule must couple two different parameters."));
        }
        for range in [self.below, self.above] {
            if !(range[0].is_finite() && range[1].is_finite() && range[1] > range[0]) {
                return Err(AppError::new(2, format!("sampling rule range {range:?} is invalid.")));
            }
        }
        Ok(())
    }

    /// Apply the rule to one row. Returns true when `target` was redrawn.
    pub fn apply<R: Rng>(&self, row: &mut [f64], when_col: usize, target_col: usize, space: &ParameterSpace, rng: &mut R) -> bool {
        let driver = space.physical_value(when_col, row[when_col]);
        let target = row[target_col];
        let range = if driver < self.threshold && target > self.split {
            self.below
        } else if driver > self.threshold && target < self.split {
            self.above
        } else {
            return false;
        };
        row[target_col] = rng.gen_range(range[0]..range[1]);
        true
    }

    /// Apply to every row, returning the number of redrawn values.
    pub fn apply_all<R: Rng>(&self, rows: &mut [Vec<f64>], space: &ParameterSpace, rng: &mut R) -> Result<usize, AppError> {
        self.validate(space)?;
        let when_col = space.position(&self.when).unwrap_or_default();
        let target_col = space.position(&self.target).unwrap_or_default();
        Ok(rows
            .iter_mut()
            .filter(|row| row.len() == space.len())
            .map(|row| self.apply(row, when_col, target_col, space, rng))
            .filter(|&changed| changed)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FreeParam;
    use rand::{SeedableRng, rngs::StdRng};

    fn space() -> ParameterSpace {
        let p = |index, label: &str, log, lower, upper| FreeParam {
            index,
            label: label.to_string(),
            log,
            lower,
            upper,
            prior: [lower, upper],
        };
        ParameterSpace {
            params: vec![
                p(13, "comptb.alpha", false, 0.1, 3.0),
                p(15, "log10(comptb.kTe)", true, 0.3, 3.0),
            ],
        }
    }

    fn rule() -> ConditionalRule {
        ConditionalRule {
            when: "log10(comptb.kTe)".to_string(),
            threshold: 6.0,
            target: "comptb.alpha".to_string(),
            split: 1.5,
            below: [0.1, 1.5],
            above: [1.5, 3.0],
        }
    }

    #[test]
    fn cool_corona_gets_flat_alpha() {
        let mut rng = StdRng::seed_from_u64(5);
        // kTe = 10^0.5 ≈ 3.2 keV < 6
        let mut rows = vec![vec![2.5, 0.5], vec![1.0, 0.5]];
        let n = rule().apply_all(&mut rows, &space(), &mut rng).unwrap();
        assert_eq!(n, 1);
        assert!((0.1..1.5).contains(&rows[0][0]));
        assert_eq!(rows[1][0], 1.0);
    }

    #[test]
    fn hot_corona_gets_steep_alpha() {
        let mut rng = StdRng::seed_from_u64(6);
        // kTe = 100 keV > 6
        let mut rows = vec![vec![0.4, 2.0], vec![2.0, 2.0]];
        let n = rule().apply_all(&mut rows, &space(), &mut rng).unwrap();
        assert_eq!(n, 1);
        assert!((1.5..3.0).contains(&rows[0][0]));
        assert_eq!(rows[1][0], 2.0);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let mut r = rule();
        r.target = "nope".to_string();
        assert_eq!(r.validate(&space()).unwrap_err().exit_code(), 2);
    }
}

//! Shuffled k-fold cross-validation indices.

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Split `0..n` into `k` folds after a seeded shuffle.
///
/// The first `n % k` folds hold one extra element. Each fold's validation set is
/// that fold; its training set is everything else.
pub fn kfold(n: usize, k: usize, seed: u64) -> Result<Vec<Fold>, AppError> {
    if k < 2 {
        return Err(AppError::new(2, "k-fold needs at least 2 folds."));
    }
    if n < k {
        return Err(AppError::new(3, format!("Cannot split {n} rows into {k} folds.")));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        let stop = start + size;
        let validation = indices[start..stop].to_vec();
        let train = indices[..start].iter().chain(indices[stop..].iter()).copied().collect();
        folds.push(Fold { train, validation });
        start = stop;
    }
    Ok(folds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_the_rows() {
        let folds = kfold(11, 3, 42).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.validation.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);

        let mut all: Vec<usize> = folds.iter().flat_map(|f| f.validation.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());

        for f in &folds {
            assert_eq!(f.train.len() + f.validation.len(), 11);
            assert!(f.train.iter().all(|i| !f.validation.contains(i)));
        }
    }

    #[test]
    fn same_seed_same_folds() {
        assert_eq!(kfold(20, 5, 1).unwrap(), kfold(20, 5, 1).unwrap());
        assert_ne!(kfold(20, 5, 1).unwrap(), kfold(20, 5, 2).unwrap());
    }

    #[test]
    fn too_few_rows() {
        assert_eq!(kfold(2, 5, 0).unwrap_err().exit_code(), 3);
        assert_eq!(kfold(10, 1, 0).unwrap_err().exit_code(), 2);
    }
}

//! Reporting utilities: column statistics and formatted terminal output.

pub mod format;

pub use format::*;

use crate::math::mean;
use crate::sampling::SampleSet;

/// Range and mean of one sample column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub label: String,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Per-column statistics of a sample set, ignoring non-finite values.
pub fn column_stats(set: &SampleSet) -> Vec<ColumnStats> {
    set.labels
        .iter()
        .enumerate()
        .map(|(col, label)| {
            let values: Vec<f64> = set.column(col).into_iter().filter(|v| v.is_finite()).collect();
            ColumnStats {
                label: label.clone(),
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                mean: if values.is_empty() { f64::NAN } else { mean(&values) },
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_stats_skip_non_finite() {
        let set = SampleSet {
            labels: vec!["a".into(), "b".into()],
            rows: vec![vec![1.0, f64::NAN], vec![3.0, 2.0], vec![2.0, 4.0]],
        };
        let stats = column_stats(&set);
        assert_eq!(stats[0].min, 1.0);
        assert_eq!(stats[0].max, 3.0);
        assert!((stats[0].mean - 2.0).abs() < 1e-12);
        assert!((stats[1].mean - 3.0).abs() < 1e-12);
    }
}

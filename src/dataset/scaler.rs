//! Min–max scaling onto a target range.

use serde::{Deserialize, Serialize};

/// Maps `[data_min, data_max]` linearly onto `feature_range`.
///
/// Non-finite values are ignored while fitting and propagate through `transform`.
/// A constant input gets unit scale, so it maps onto `feature_range[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub feature_range: [f64; 2],
    pub data_min: f64,
    pub data_max: f64,
    pub scale: f64,
    pub min: f64,
}

impl MinMaxScaler {
    /// Returns `None` when no finite value is available.
    pub fn fit(values: impl IntoIterator<Item = f64>, feature_range: [f64; 2]) -> Option<Self> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if !(lo.is_finite() && hi.is_finite()) {
            return None;
        }
        let range = if hi - lo == 0.0 { 1.0 } else { hi - lo };
        let scale = (feature_range[1] - feature_range[0]) / range;
        Some(Self {
            feature_range,
            data_min: lo,
            data_max: hi,
            scale,
            min: feature_range[0] - lo * scale,
        })
    }

    pub fn transform(&self, v: f64) -> f64 {
        v * self.scale + self.min
    }

    pub fn inverse_transform(&self, v: f64) -> f64 {
        (v - self.min) / self.scale
    }
}

/// Fit one scaler per column of `rows`.
///
/// Columns without a single finite value get the scaler fitted on `[0, 1]`.
pub fn fit_columns(rows: &[Vec<f64>], feature_range: [f64; 2]) -> Vec<MinMaxScaler> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    (0..ncols)
        .filter_map(|c| {
            MinMaxScaler::fit(rows.iter().map(|r| r[c]), feature_range)
                .or_else(|| MinMaxScaler::fit([0.0, 1.0], feature_range))
        })
        .collect()
}

pub fn transform_row(scalers: &[MinMaxScaler], row: &[f64]) -> Vec<f64> {
    scalers.iter().zip(row.iter()).map(|(s, &v)| s.transform(v)).collect()
}

pub fn inverse_transform_row(scalers: &[MinMaxScaler], row: &[f64]) -> Vec<f64> {
    scalers.iter().zip(row.iter()).map(|(s, &v)| s.inverse_transform(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_the_feature_range() {
        let s = MinMaxScaler::fit([2.0, 4.0, f64::NAN, 6.0], [-1.0, 1.0]).unwrap();
        assert_eq!(s.data_min, 2.0);
        assert_eq!(s.data_max, 6.0);
        assert_eq!(s.transform(2.0), -1.0);
        assert_eq!(s.transform(4.0), 0.0);
        assert_eq!(s.transform(6.0), 1.0);
        assert!((s.inverse_transform(0.5) - 5.0).abs() < 1e-12);
        assert!(s.transform(f64::NAN).is_nan());
    }

    #[test]
    fn constant_column_maps_to_the_lower_bound() {
        let s = MinMaxScaler::fit([3.0, 3.0], [0.0, 1.0]).unwrap();
        assert_eq!(s.scale, 1.0);
        assert_eq!(s.transform(3.0), 0.0);
        assert_eq!(s.inverse_transform(0.0), 3.0);
    }

    #[test]
    fn column_scalers_are_independent() {
        let rows = vec![vec![0.0, 10.0], vec![1.0, 30.0]];
        let scalers = fit_columns(&rows, [0.0, 1.0]);
        assert_eq!(transform_row(&scalers, &[0.5, 20.0]), vec![0.5, 0.5]);
        assert_eq!(inverse_transform_row(&scalers, &[1.0, 0.0]), vec![1.0, 10.0]);
        assert!(MinMaxScaler::fit([f64::NAN], [0.0, 1.0]).is_none());
    }
}

//! Piecewise-linear interpolation on a sorted grid.

/// Evaluate the piecewise-linear function through `(xp, fp)` at `x`.
///
/// `xp` must be increasing. Outside the grid the end values are held constant.
/// An empty grid yields `NaN`.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // First index with xp[i] > x; 1 <= hi <= n - 1 here.
    let hi = xp[..n].partition_point(|&v| v <= x);
    let lo = hi - 1;
    let dx = xp[hi] - xp[lo];
    if dx == 0.0 {
        return fp[hi];
    }
    let t = (x - xp[lo]) / dx;
    fp[lo] + t * (fp[hi] - fp[lo])
}

/// [`interp`] over many points.
pub fn interp_many(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    x.iter().map(|&v| interp(v, xp, fp)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_inside_and_clamps_outside() {
        let xp = [1.0, 2.0, 4.0];
        let fp = [10.0, 20.0, 0.0];
        assert_eq!(interp(0.0, &xp, &fp), 10.0);
        assert_eq!(interp(1.5, &xp, &fp), 15.0);
        assert_eq!(interp(2.0, &xp, &fp), 20.0);
        assert_eq!(interp(3.0, &xp, &fp), 10.0);
        assert_eq!(interp(9.0, &xp, &fp), 0.0);
        assert!(interp(1.0, &[], &[]).is_nan());
    }
}

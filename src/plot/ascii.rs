//! ASCII plots of a spectrum against a model, for quick checks in a terminal.
//!
//! Fixed-size character grid on log–log axes:
//! - observed points: `o` (`!` when more than 3σ from the model)
//! - model curve: `-`

use crate::domain::{ObservedSpectrum, Spectrum};
use crate::math::interp;

/// Residual (in units of `yerr`) beyond which a point is flagged.
pub const OUTLIER_SIGMA: f64 = 3.0;

/// Render observed data with an optional model curve.
pub fn render_spectrum(observed: &ObservedSpectrum, model: Option<&Spectrum>, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let points: Vec<(f64, f64)> = observed
        .energy
        .iter()
        .zip(observed.y.iter())
        .filter_map(|(&e, &y)| log_point(e, y))
        .collect();
    let curve: Vec<(f64, f64)> = model
        .map(|m| m.energy.iter().zip(m.flux.iter()).filter_map(|(&e, &f)| log_point(e, f)).collect())
        .unwrap_or_default();

    let Some((x_min, x_max)) = range(points.iter().chain(curve.iter()).map(|p| p.0)) else {
        return "Plot: nothing to draw (no positive values)\n".to_string();
    };
    let (y_min, y_max) = range(points.iter().chain(curve.iter()).map(|p| p.1)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    draw_curve(&mut grid, &curve, (x_min, x_max), (y_min, y_max));

    for i in 0..observed.len() {
        let Some((lx, ly)) = log_point(observed.energy[i], observed.y[i]) else {
            continue;
        };
        let outlier = model.is_some_and(|m| {
            let expected = interp(observed.energy[i], &m.energy, &m.flux);
            observed.yerr[i] > 0.0 && ((observed.y[i] - expected) / observed.yerr[i]).abs() > OUTLIER_SIGMA
        });
        let x = map_x(lx, x_min, x_max, width);
        let y = map_y(ly, y_min, y_max, height);
        grid[y][x] = if outlier { '!' } else { 'o' };
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: E=[{:.3}, {:.3}] keV | flux=[{:.3e}, {:.3e}] (log-log)\n",
        10f64.powf(x_min),
        10f64.powf(x_max),
        10f64.powf(y_min),
        10f64.powf(y_max)
    ));
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }
    out
}

fn log_point(x: f64, y: f64) -> Option<(f64, f64)> {
    (x > 0.0 && y > 0.0 && x.is_finite() && y.is_finite()).then(|| (x.log10(), y.log10()))
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (lo.is_finite() && hi.is_finite() && hi > lo).then_some((lo, hi))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let pad = ((max - min).abs() * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // top row is the maximum
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], (x_min, x_max): (f64, f64), (y_min, y_max): (f64, f64)) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve {
        let (cx, cy) = (map_x(x, x_min, x_max, width), map_y(y, y_min, y_max, height));
        match prev {
            Some((x0, y0)) => draw_line(grid, x0, y0, cx, cy, '-'),
            None => grid[cy][cx] = '-',
        }
        prev = Some((cx, cy));
    }
}

/// Bresenham line that only fills empty cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let (mut x0, mut y0) = (x0 as isize, y0 as isize);
    let (x1, y1) = (x1 as isize, y1 as isize);

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_golden_snapshot_small() {
        let observed = ObservedSpectrum {
            energy: vec![1.0, 10.0],
            energy_err: vec![0.1, 0.1],
            y: vec![1.0, 10.0],
            yerr: vec![0.5, 0.5],
        };
        let model = Spectrum {
            energy: vec![1.0, 10.0],
            flux: vec![1.0, 1.0],
        };
        let txt = render_spectrum(&observed, Some(&model), 10, 5);
        let expected = concat!(
            "Plot: E=[1.000, 10.000] keV | flux=[8.913e-1, 1.122e1] (log-log)\n",
            "         !\n",
            "\n",
            "\n",
            "\n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn non_positive_data_is_skipped() {
        let observed = ObservedSpectrum {
            energy: vec![0.0, -1.0],
            energy_err: vec![0.0, 0.0],
            y: vec![1.0, 1.0],
            yerr: vec![1.0, 1.0],
        };
        assert!(render_spectrum(&observed, None, 20, 5).contains("nothing to draw"));
    }
}

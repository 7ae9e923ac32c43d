//! SVG figures rendered with `plotters`.
//!
//! Every public function writes one file and creates its parent directory.
//! Spectra are drawn on log–log axes; panels without positive data are left blank.

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::domain::{ModelRecord, ObservedSpectrum, Spectrum};
use crate::error::AppError;
use crate::mcmc::Chain;
use crate::nn::{FoldHistories, mean_std_per_epoch};
use crate::sampling::SampleSet;

type DrawResult = Result<(), Box<dyn std::error::Error>>;
type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

const PANEL: (u32, u32) = (400, 300);
const TRUE_COLOR: RGBColor = RGBColor(20, 20, 20);
const MODEL_COLOR: RGBColor = RGBColor(214, 39, 40);
const TRAIN_COLOR: RGBColor = RGBColor(31, 119, 180);
const VAL_COLOR: RGBColor = RGBColor(255, 127, 14);
const DATA_COLOR: RGBColor = RGBColor(23, 190, 207);

/// Histogram bins used by parameter and corner plots.
pub const HIST_BINS: usize = 30;
/// Walkers drawn per trace panel.
pub const MAX_TRACE_WALKERS: usize = 32;
/// Points drawn per corner scatter panel.
pub const MAX_SCATTER_POINTS: usize = 2000;

fn render(path: &Path, size: (u32, u32), draw: impl FnOnce(&Area<'_>) -> DrawResult) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", parent.display())))?;
    }
    let root = SVGBackend::new(path, size).into_drawing_area();
    let draw_all = || -> DrawResult {
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
        Ok(())
    };
    draw_all().map_err(|e| AppError::new(4, format!("Failed to render '{}': {e}", path.display())))
}

/// `(min, max)` of the finite values, widened when degenerate.
fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    if hi > lo {
        let pad = 0.05 * (hi - lo);
        Some((lo - pad, hi + pad))
    } else {
        let pad = if lo == 0.0 { 1.0 } else { 0.1 * lo.abs() };
        Some((lo - pad, hi + pad))
    }
}

/// Log-axis bounds over the strictly positive values.
fn log_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    Some(if hi > lo { (lo / 1.2, hi * 1.2) } else { (lo / 2.0, hi * 2.0) })
}

fn histogram(values: &[f64], lo: f64, hi: f64, bins: usize) -> Vec<usize> {
    let mut counts = vec![0usize; bins];
    let width = (hi - lo) / bins as f64;
    for &v in values.iter().filter(|v| v.is_finite()) {
        let b = (((v - lo) / width).floor().max(0.0) as usize).min(bins - 1);
        counts[b] += 1;
    }
    counts
}

/// Pick `n_per_row²` distinct entries for a grid plot.
pub fn choose_for_grid<T: Clone>(items: &[T], n_per_row: usize, seed: u64) -> Result<Vec<T>, AppError> {
    let wanted = n_per_row * n_per_row;
    if n_per_row == 0 || wanted > items.len() {
        return Err(AppError::new(
            3,
            format!("A {n_per_row}x{n_per_row} grid needs {wanted} spectra but only {} are available.", items.len()),
        ));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(items.choose_multiple(&mut rng, wanted).cloned().collect())
}

/// One log–log panel with any number of spectra.
fn spectrum_panel(area: &Area<'_>, title: &str, curves: &[(&Spectrum, RGBColor, &str)]) -> DrawResult {
    let x = log_bounds(curves.iter().flat_map(|(s, _, _)| s.energy.iter().copied()));
    let y = log_bounds(curves.iter().flat_map(|(s, _, _)| s.flux.iter().copied()));
    let (Some((x0, x1)), Some((y0, y1))) = (x, y) else {
        return Ok(());
    };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 12))
        .margin(6)
        .x_label_area_size(28)
        .y_label_area_size(48)
        .build_cartesian_2d((x0..x1).log_scale(), (y0..y1).log_scale())?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("Energy [keV]")
        .x_labels(5)
        .y_labels(5)
        .x_label_formatter(&|v| format!("{v:.1}"))
        .y_label_formatter(&|v| format!("{v:.0e}"))
        .label_style(("sans-serif", 10))
        .draw()?;

    let labelled = curves.iter().any(|(_, _, l)| !l.is_empty());
    for &(spectrum, color, label) in curves {
        let points = spectrum
            .energy
            .iter()
            .zip(spectrum.flux.iter())
            .filter(|(e, f)| **e > 0.0 && **f > 0.0)
            .map(|(&e, &f)| (e, f));
        let series = chart.draw_series(LineSeries::new(points, color.stroke_width(1)))?;
        if !label.is_empty() {
            series
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], color));
        }
    }
    if labelled {
        chart
            .configure_series_labels()
            .label_font(("sans-serif", 10))
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()?;
    }
    Ok(())
}

/// Grid of generated model spectra, titled by file index.
pub fn plot_models_grid(path: &Path, models: &[(String, ModelRecord)], n_per_row: usize) -> Result<(), AppError> {
    let n = n_per_row.max(1) as u32;
    render(path, (PANEL.0 * n, PANEL.1 * n), |root| {
        let panels = root.split_evenly((n as usize, n as usize));
        for (panel, (name, record)) in panels.iter().zip(models.iter()) {
            spectrum_panel(panel, name, &[(&record.spectrum, TRAIN_COLOR, "")])?;
        }
        Ok(())
    })
}

/// Emulator predictions against the XSPEC spectra they replace.
pub fn plot_evaluation_grid(
    path: &Path,
    pairs: &[(String, Spectrum, Spectrum)],
    n_per_row: usize,
) -> Result<(), AppError> {
    let n = n_per_row.max(1) as u32;
    render(path, (PANEL.0 * n, PANEL.1 * n), |root| {
        let panels = root.split_evenly((n as usize, n as usize));
        for (panel, (title, truth, predicted)) in panels.iter().zip(pairs.iter()) {
            spectrum_panel(panel, title, &[(truth, TRUE_COLOR, "xspec"), (predicted, MODEL_COLOR, "emulator")])?;
        }
        Ok(())
    })
}

fn histogram_panel(area: &Area<'_>, title: &str, values: &[f64], truth: Option<f64>) -> DrawResult {
    let Some((lo, hi)) = bounds(values.iter().copied()) else {
        return Ok(());
    };
    let counts = histogram(values, lo, hi, HIST_BINS);
    let top = counts.iter().copied().max().unwrap_or(1).max(1) as f64 * 1.1;
    let width = (hi - lo) / HIST_BINS as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 12))
        .margin(6)
        .x_label_area_size(24)
        .y_label_area_size(36)
        .build_cartesian_2d(lo..hi, 0.0..top)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(4)
        .y_labels(3)
        .label_style(("sans-serif", 10))
        .draw()?;
    chart.draw_series(counts.iter().enumerate().map(|(i, &c)| {
        let x = lo + i as f64 * width;
        Rectangle::new([(x, 0.0), (x + width, c as f64)], TRAIN_COLOR.mix(0.6).filled())
    }))?;
    if let Some(t) = truth.filter(|t| t.is_finite()) {
        chart.draw_series(std::iter::once(PathElement::new(vec![(t, 0.0), (t, top)], MODEL_COLOR.stroke_width(2))))?;
    }
    Ok(())
}

/// One histogram per sampled parameter.
pub fn plot_param_histograms(path: &Path, samples: &SampleSet) -> Result<(), AppError> {
    let d = samples.labels.len().max(1);
    let cols = (d as f64).sqrt().ceil() as usize;
    let rows = d.div_ceil(cols);
    render(path, (PANEL.0 * cols as u32, PANEL.1 * rows as u32), |root| {
        let panels = root.split_evenly((rows, cols));
        for (i, (panel, label)) in panels.iter().zip(samples.labels.iter()).enumerate() {
            histogram_panel(panel, label, &samples.column(i), None)?;
        }
        Ok(())
    })
}

const HISTORY_PANELS: [(&str, &str); 4] = [
    ("loss", "Loss (MSLE)"),
    ("mean_squared_error", "MSE"),
    ("mean_absolute_error", "MAE"),
    ("r_squared", "R²"),
];

/// Training and validation curves: fold mean with a ±1σ band, epochs before `skip` hidden.
pub fn plot_history(path: &Path, histories: &FoldHistories, skip: usize) -> Result<(), AppError> {
    render(path, (PANEL.0 * 2, PANEL.1 * 2), |root| {
        let panels = root.split_evenly((2, 2));
        for (panel, (key, title)) in panels.iter().zip(HISTORY_PANELS.iter()) {
            let val_key = format!("val_{key}");
            let series: Vec<(&str, RGBColor, (Vec<f64>, Vec<f64>))> = [(*key, "train", TRAIN_COLOR), (val_key.as_str(), "validation", VAL_COLOR)]
                .into_iter()
                .filter_map(|(k, label, color)| histories.get(k).map(|folds| (label, color, mean_std_per_epoch(folds))))
                .collect();
            history_panel(panel, title, &series, skip)?;
        }
        Ok(())
    })
}

fn history_panel(area: &Area<'_>, title: &str, series: &[(&str, RGBColor, (Vec<f64>, Vec<f64>))], skip: usize) -> DrawResult {
    let epochs = series.iter().map(|(_, _, (m, _))| m.len()).max().unwrap_or(0);
    if epochs <= skip {
        return Ok(());
    }
    let y = bounds(series.iter().flat_map(|(_, _, (m, s))| {
        m.iter().zip(s.iter()).skip(skip).flat_map(|(m, s)| [m - s, m + s])
    }));
    let Some((y0, y1)) = y else {
        return Ok(());
    };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 12))
        .margin(6)
        .x_label_area_size(28)
        .y_label_area_size(52)
        .build_cartesian_2d(skip as f64..(epochs - 1).max(skip + 1) as f64, y0..y1)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("epoch")
        .x_labels(5)
        .y_labels(5)
        .y_label_formatter(&|v| format!("{v:.2e}"))
        .label_style(("sans-serif", 10))
        .draw()?;

    for (label, color, (mean, std)) in series {
        let color = *color;
        let upper = mean.iter().zip(std.iter()).enumerate().skip(skip).map(|(i, (m, s))| (i as f64, m + s));
        let lower = mean.iter().zip(std.iter()).enumerate().skip(skip).map(|(i, (m, s))| (i as f64, m - s));
        let band: Vec<(f64, f64)> = upper.chain(lower.rev()).collect();
        chart.draw_series(std::iter::once(Polygon::new(band, color.mix(0.2).filled())))?;
        chart
            .draw_series(LineSeries::new(
                mean.iter().enumerate().skip(skip).map(|(i, &m)| (i as f64, m)),
                color.stroke_width(2),
            ))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], color));
    }
    chart
        .configure_series_labels()
        .label_font(("sans-serif", 10))
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()?;
    Ok(())
}

/// Walker traces, one panel per parameter, with optional truth lines.
pub fn plot_traces(path: &Path, chain: &Chain, truth: Option<&[f64]>) -> Result<(), AppError> {
    let d = chain.ndim().max(1);
    let steps = chain.n_steps();
    render(path, (1200, 160 * d as u32), |root| {
        let panels = root.split_evenly((d, 1));
        for (dim, panel) in panels.iter().enumerate().take(chain.ndim()) {
            let series = chain.series(dim);
            let Some((y0, y1)) = bounds(series.iter().flatten().copied()) else {
                continue;
            };
            let mut chart = ChartBuilder::on(panel)
                .margin(4)
                .x_label_area_size(20)
                .y_label_area_size(90)
                .build_cartesian_2d(0.0..steps.max(2) as f64, y0..y1)?;
            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_y_mesh()
                .y_desc(chain.labels[dim].as_str())
                .x_labels(6)
                .y_labels(3)
                .label_style(("sans-serif", 10))
                .draw()?;
            for walker in series.iter().take(MAX_TRACE_WALKERS) {
                chart.draw_series(LineSeries::new(
                    walker.iter().enumerate().map(|(s, &v)| (s as f64, v)),
                    DATA_COLOR.mix(0.3),
                ))?;
            }
            if let Some(t) = truth.and_then(|t| t.get(dim)).filter(|t| t.is_finite()) {
                chart.draw_series(std::iter::once(PathElement::new(
                    vec![(0.0, *t), (steps as f64, *t)],
                    MODEL_COLOR.stroke_width(1),
                )))?;
            }
        }
        Ok(())
    })
}

/// Corner plot: marginal histograms on the diagonal, pairwise scatter below it.
pub fn plot_corner(path: &Path, labels: &[String], samples: &[Vec<f64>], truth: Option<&[f64]>) -> Result<(), AppError> {
    let d = labels.len();
    if d == 0 || samples.is_empty() {
        return Err(AppError::new(3, "Corner plot needs at least one parameter and one sample."));
    }
    let columns: Vec<Vec<f64>> = (0..d).map(|i| samples.iter().map(|s| s[i]).collect()).collect();
    let stride = samples.len().div_ceil(MAX_SCATTER_POINTS).max(1);
    let side = (220 * d as u32).max(400);

    render(path, (side, side), |root| {
        let panels = root.split_evenly((d, d));
        for row in 0..d {
            for col in 0..=row {
                let panel = &panels[row * d + col];
                let t = |i: usize| truth.and_then(|t| t.get(i).copied());
                if row == col {
                    histogram_panel(panel, &labels[row], &columns[row], t(row))?;
                    continue;
                }
                let (Some((x0, x1)), Some((y0, y1))) =
                    (bounds(columns[col].iter().copied()), bounds(columns[row].iter().copied()))
                else {
                    continue;
                };
                let mut chart = ChartBuilder::on(panel)
                    .margin(4)
                    .x_label_area_size(if row == d - 1 { 24 } else { 4 })
                    .y_label_area_size(if col == 0 { 40 } else { 4 })
                    .build_cartesian_2d(x0..x1, y0..y1)?;
                chart
                    .configure_mesh()
                    .disable_x_mesh()
                    .disable_y_mesh()
                    .x_labels(if row == d - 1 { 3 } else { 0 })
                    .y_labels(if col == 0 { 3 } else { 0 })
                    .label_style(("sans-serif", 9))
                    .draw()?;
                chart.draw_series(
                    columns[col]
                        .iter()
                        .zip(columns[row].iter())
                        .step_by(stride)
                        .map(|(&x, &y)| Circle::new((x, y), 1, TRAIN_COLOR.mix(0.3).filled())),
                )?;
                if let (Some(tx), Some(ty)) = (t(col), t(row)) {
                    chart.draw_series(std::iter::once(Circle::new((tx, ty), 4, MODEL_COLOR.filled())))?;
                }
            }
        }
        Ok(())
    })
}

/// Observed spectrum with error bars and the fitted model curves on top.
pub fn plot_fit(path: &Path, observed: &ObservedSpectrum, models: &[(&str, &Spectrum)]) -> Result<(), AppError> {
    render(path, (900, 600), |root| {
        let x = log_bounds(observed.energy.iter().copied());
        let y = log_bounds(
            observed
                .y
                .iter()
                .copied()
                .chain(models.iter().flat_map(|(_, m)| m.flux.iter().copied())),
        );
        let (Some((x0, x1)), Some((y0, y1))) = (x, y) else {
            return Ok(());
        };
        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .x_label_area_size(36)
            .y_label_area_size(60)
            .build_cartesian_2d((x0..x1).log_scale(), (y0..y1).log_scale())?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .x_desc("Energy [keV]")
            .y_desc("Flux")
            .y_label_formatter(&|v| format!("{v:.0e}"))
            .draw()?;

        let bars = (0..observed.len()).filter_map(|i| {
            let (e, y, err) = (observed.energy[i], observed.y[i], observed.yerr[i]);
            let lo = (y - err).max(y0);
            (e > 0.0 && y > 0.0).then(|| PathElement::new(vec![(e, lo), (e, y + err)], DATA_COLOR.mix(0.5)))
        });
        chart.draw_series(bars)?;
        chart
            .draw_series(
                observed
                    .energy
                    .iter()
                    .zip(observed.y.iter())
                    .filter(|(e, y)| **e > 0.0 && **y > 0.0)
                    .map(|(&e, &y)| Circle::new((e, y), 1, DATA_COLOR.filled())),
            )?
            .label("data")
            .legend(|(x, y)| Circle::new((x + 7, y), 3, DATA_COLOR.filled()));

        let palette = [MODEL_COLOR, TRUE_COLOR, TRAIN_COLOR, VAL_COLOR];
        for (k, (label, model)) in models.iter().enumerate() {
            let color = palette[k % palette.len()];
            let points = model
                .energy
                .iter()
                .zip(model.flux.iter())
                .filter(|(e, f)| **e > 0.0 && **f > 0.0)
                .map(|(&e, &f)| (e, f));
            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))?
                .label(*label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], color));
        }
        chart
            .configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(scale: f64) -> Spectrum {
        let energy: Vec<f64> = (1..=40).map(|i| 0.5 * i as f64).collect();
        let flux = energy.iter().map(|e| scale * e.powf(-1.7)).collect();
        Spectrum { energy, flux }
    }

    #[test]
    fn histogram_puts_the_maximum_in_the_last_bin() {
        let counts = histogram(&[0.0, 0.5, 1.0, f64::NAN], 0.0, 1.0, 4);
        assert_eq!(counts, vec![1, 0, 1, 1]);
    }

    #[test]
    fn grid_selection_needs_enough_items() {
        let items: Vec<usize> = (0..10).collect();
        let picked = choose_for_grid(&items, 3, 1).unwrap();
        assert_eq!(picked.len(), 9);
        assert_eq!(choose_for_grid(&items, 4, 1).unwrap_err().exit_code(), 3);
        assert_eq!(choose_for_grid(&items, 3, 1).unwrap(), picked);
    }

    #[test]
    fn figures_are_written() {
        let dir = tempfile::tempdir().unwrap();

        let pairs = vec![("a".to_string(), spectrum(1.0), spectrum(1.1))];
        let eval = dir.path().join("plots/evaluate.svg");
        plot_evaluation_grid(&eval, &pairs, 1).unwrap();
        assert!(std::fs::read_to_string(&eval).unwrap().contains("<svg"));

        let mut histories = FoldHistories::new();
        for key in ["loss", "val_loss", "r_squared", "val_r_squared"] {
            histories.insert(key.to_string(), vec![vec![0.5, 0.3, 0.2, 0.1], vec![0.6, 0.35, 0.25]]);
        }
        plot_history(&dir.path().join("history.svg"), &histories, 1).unwrap();

        let mut chain = Chain::new(vec!["a".into(), "b".into()], 0);
        for s in 0..20 {
            let pos = (0..4).map(|w| vec![s as f64 * 0.1 + w as f64, (s * w) as f64]).collect();
            chain.push_step(pos, vec![0.0; 4], vec![0.0; 4]).unwrap();
        }
        plot_traces(&dir.path().join("traces.svg"), &chain, Some(&[1.0, 2.0][..])).unwrap();
        plot_corner(&dir.path().join("corner.svg"), &chain.labels, &chain.flat(0, 1), Some(&[1.0, 2.0][..])).unwrap();
        assert!(dir.path().join("corner.svg").exists());
    }
}

//! Formatted terminal output.
//!
//! Formatting lives in one place so:
//! - the numeric code stays clean and testable
//! - output changes are localized (snapshot tests below)

use crate::dataset::{Dataset, Scalers};
use crate::domain::{ParameterSpace, SpectrumStats};
use crate::math::LineFit;
use crate::mcmc::PosteriorSummary;
use crate::nn::{FoldReport, Metrics};
use crate::report::column_stats;
use crate::sampling::SampleSet;

const LABEL_WIDTH: usize = 28;

/// Free parameters with their sampling bounds and priors.
pub fn format_parameter_space(space: &ParameterSpace) -> String {
    let mut out = String::new();
    out.push_str(&format!("Free parameters: {}\n", space.len()));
    push_line(
        &mut out,
        format!(
            "{:<LABEL_WIDTH$} {:>5} {:>4} {:>12} {:>12} {:>12} {:>12}",
            "label", "index", "log", "lower", "upper", "prior_lo", "prior_hi"
        ),
    );
    push_rule(&mut out, &[LABEL_WIDTH, 5, 4, 12, 12, 12, 12]);
    for p in &space.params {
        push_line(
            &mut out,
            format!(
                "{:<LABEL_WIDTH$} {:>5} {:>4} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
                truncate(&p.label, LABEL_WIDTH),
                p.index,
                if p.log { "yes" } else { "no" },
                p.lower,
                p.upper,
                p.prior[0],
                p.prior[1],
            ),
        );
    }
    out
}

/// Row count plus per-column range and mean.
pub fn format_sample_stats(set: &SampleSet) -> String {
    let mut out = String::new();
    out.push_str(&format!("Samples: n={} | columns={}\n", set.len(), set.labels.len()));
    push_line(
        &mut out,
        format!("{:<LABEL_WIDTH$} {:>12} {:>12} {:>12}", "label", "min", "mean", "max"),
    );
    push_rule(&mut out, &[LABEL_WIDTH, 12, 12, 12]);
    for c in column_stats(set) {
        push_line(
            &mut out,
            format!(
                "{:<LABEL_WIDTH$} {:>12.4} {:>12.4} {:>12.4}",
                truncate(&c.label, LABEL_WIDTH),
                c.min,
                c.mean,
                c.max
            ),
        );
    }
    out
}

/// What preprocessing kept, removed and dropped.
pub fn format_preprocess_summary(n_models: usize, dataset: &Dataset, scalers: &Scalers) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Models: read={} | kept={} | dropped (non-finite)={}\n",
        n_models,
        dataset.len(),
        n_models.saturating_sub(dataset.len())
    ));
    out.push_str(&format!("Inputs : {}\n", dataset.labels.join(", ")));
    if !scalers.removed.is_empty() {
        let removed: Vec<&str> = scalers.removed.iter().map(|&i| scalers.labels[i].as_str()).collect();
        out.push_str(&format!("Removed (uniform): {}\n", removed.join(", ")));
    }
    let flat: Vec<f64> = dataset.outputs.iter().flatten().copied().collect();
    match SpectrumStats::of(&dataset.energy, &flat) {
        Some(s) => out.push_str(&format!(
            "Spectra: bins={} | E=[{:.3}, {:.3}] keV | flux=[{:.3e}, {:.3e}]\n",
            s.n_bins,
            s.energy_min,
            s.energy_max,
            s.flux_min,
            s.flux_max
        )),
        None => out.push_str(&format!("Spectra: bins={}\n", dataset.energy.len())),
    }
    out
}

/// Per-fold test metrics, with the saved fold marked `*`.
pub fn format_fold_reports(reports: &[FoldReport], best_fold: usize) -> String {
    let mut out = String::new();
    out.push_str("Cross-validation (validation fold metrics):\n");
    push_line(
        &mut out,
        format!(
            "  {:>4} {:>7} {:>5} {:>12} {:>12} {:>12} {:>9} {:>9}",
            "fold", "epochs", "best", "loss", "mse", "mae", "r2", "adj_r2"
        ),
    );
    push_rule(&mut out, &[5, 7, 5, 12, 12, 12, 9, 9]);
    for r in reports {
        let chosen = if r.fold == best_fold { "*" } else { " " };
        push_line(
            &mut out,
            format!(
                "{chosen} {:>4} {:>7} {:>5} {:>12.4e} {:>12.4e} {:>12.4e} {:>9.5} {:>9.5}",
                r.fold,
                r.epochs_run,
                r.best_epoch,
                r.test.loss,
                r.test.mean_squared_error,
                r.test.mean_absolute_error,
                r.test.r_squared,
                r.adjusted_r_squared,
            ),
        );
    }
    out
}

/// Emulator accuracy against reference spectra, with the `pred = a + b·true` line.
pub fn format_evaluation(n_spectra: usize, metrics: &Metrics, line: Option<&LineFit>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Evaluation: spectra={n_spectra}\n"));
    for (name, value) in metrics.named() {
        out.push_str(&format!("- {name:<20} {value:.6e}\n"));
    }
    match line {
        Some(l) => out.push_str(&format!(
            "- calibration          pred = {:.4e} + {:.4} * true (R²={:.5})\n",
            l.intercept, l.slope, l.r_squared
        )),
        None => out.push_str("- calibration          (not enough points)\n"),
    }
    out
}

/// Maximum-likelihood point, one `label = value` per line.
pub fn format_max_likelihood(labels: &[String], x: &[f64], neg_log_likelihood: f64) -> String {
    let mut out = String::new();
    out.push_str(&format!("Maximum likelihood (-ln L = {neg_log_likelihood:.4}):\n"));
    for (label, v) in labels.iter().zip(x.iter()) {
        out.push_str(&format!("- {:<LABEL_WIDTH$} {v:>12.5}\n", truncate(label, LABEL_WIDTH)));
    }
    out
}

/// Posterior medians with 16/84 percentile errors.
pub fn format_posterior(summary: &PosteriorSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Posterior: walkers={} | steps={} | burn={} | thin={} | samples={}\n",
        summary.n_walkers, summary.n_steps, summary.burn, summary.thin, summary.n_samples
    ));
    if let Some(af) = summary.acceptance_fraction {
        out.push_str(&format!("Mean acceptance fraction: {af:.3}\n"));
    }
    out.push_str(&format!("Autocorrelation times: {}\n", fmt_vec(&summary.tau)));
    if !summary.converged {
        out.push_str("Warning: chain is shorter than 50 autocorrelation times.\n");
    }

    push_line(
        &mut out,
        format!(
            "{:<LABEL_WIDTH$} {:>12} {:>11} {:>11} {:>12}",
            "label", "median", "-err", "+err", "truth"
        ),
    );
    push_rule(&mut out, &[LABEL_WIDTH, 12, 11, 11, 12]);
    for p in &summary.params {
        let truth = p.truth.map(|t| format!("{t:.5}")).unwrap_or_default();
        push_line(
            &mut out,
            format!(
                "{:<LABEL_WIDTH$} {:>12.5} {:>11.5} {:>11.5} {:>12}",
                truncate(&p.label, LABEL_WIDTH),
                p.median,
                p.minus(),
                p.plus(),
                truth
            ),
        );
    }
    out
}

fn push_line(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}

fn push_rule(out: &mut String, widths: &[usize]) {
    let parts: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(out, parts.join(" "));
}

pub fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FreeParam;
    use crate::mcmc::ParamSummary;

    fn summary() -> PosteriorSummary {
        PosteriorSummary {
            params: vec![
                ParamSummary {
                    label: "powerlaw.PhoIndex".into(),
                    p16: 1.9,
                    median: 2.0,
                    p84: 2.2,
                    truth: Some(2.0),
                },
                ParamSummary {
                    label: "log_f".into(),
                    p16: -3.0,
                    median: -2.5,
                    p84: -2.4,
                    truth: None,
                },
            ],
            tau: vec![12.0, 15.5],
            burn: 31,
            thin: 6,
            n_steps: 1000,
            n_walkers: 32,
            n_samples: 5120,
            acceptance_fraction: Some(0.41),
            converged: true,
            max_likelihood: None,
            max_log_prob: Some(-10.0),
        }
    }

    #[test]
    fn posterior_table_has_one_row_per_parameter() {
        let txt = format_posterior(&summary());
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines[0], "Posterior: walkers=32 | steps=1000 | burn=31 | thin=6 | samples=5120");
        assert_eq!(lines[2], "Autocorrelation times: [12.000, 15.500]");
        assert!(lines[3].starts_with("label"));
        assert!(lines[4].starts_with("-----"));
        assert!(lines[5].starts_with("powerlaw.PhoIndex"));
        assert!(lines[5].ends_with("2.00000"));
        assert!(lines[5].contains("0.10000") && lines[5].contains("0.20000"));
        // no truth for log_f: the row ends at the +err column
        assert!(lines[6].trim_end().ends_with("0.10000"));
        assert!(!txt.contains("Warning"));
    }

    #[test]
    fn unconverged_chain_is_flagged() {
        let mut s = summary();
        s.converged = false;
        assert!(format_posterior(&s).contains("Warning: chain is shorter"));
    }

    #[test]
    fn parameter_space_lists_bounds() {
        let space = ParameterSpace {
            params: vec![FreeParam {
                index: 3,
                label: "log10(relxill.norm)".into(),
                log: true,
                lower: -5.0,
                upper: 0.0,
                prior: [-4.0, 0.0],
            }],
        };
        let txt = format_parameter_space(&space);
        assert!(txt.starts_with("Free parameters: 1\n"));
        let row = txt.lines().nth(3).unwrap();
        assert!(row.starts_with("log10(relxill.norm)"));
        assert!(row.contains("yes"));
        assert!(row.ends_with("0.0000"));
    }

    #[test]
    fn fold_table_marks_the_saved_fold() {
        let m = Metrics {
            loss: 1e-3,
            mean_squared_error: 2e-3,
            mean_absolute_error: 3e-2,
            r_squared: 0.99,
        };
        let reports = vec![
            FoldReport {
                fold: 1,
                epochs_run: 10,
                best_epoch: 8,
                test: m,
                adjusted_r_squared: 0.98,
            },
            FoldReport {
                fold: 2,
                epochs_run: 12,
                best_epoch: 12,
                test: m,
                adjusted_r_squared: 0.98,
            },
        ];
        let txt = format_fold_reports(&reports, 2);
        let lines: Vec<&str> = txt.lines().collect();
        assert!(lines[3].starts_with("     1"));
        assert!(lines[4].starts_with("*    2"));
    }

    #[test]
    fn truncate_marks_cut_labels() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 5), "abcd.");
    }
}

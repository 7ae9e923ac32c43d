//! IPAC tables holding one generated model each.
//!
//! ```text
//! \ Parameters used to generate the data:
//! \ Parameter names: log10(TBabs.nH), rdblur.Betor10, ...
//! \ Values: -0.59, -1.754, ...
//! |        Energy|            Flux|
//! |        double|          double|
//! |           keV| 1 / (cm2 keV s)|
//! |          null|            null|
//!   0.50993...      0.0123...
//! ```
//!
//! Values are written in sampling space (the same space the labels describe).

use std::fmt::Write as _;
use std::path::Path;

use crate::domain::{ModelRecord, Spectrum};
use crate::error::AppError;

const NAMES_PREFIX: &str = "Parameter names:";
const VALUES_PREFIX: &str = "Values:";
const COL_WIDTH: usize = 24;

/// `model_{idx:04}_params{v1}_{v2}...ipac` with values in one-digit scientific notation.
pub fn model_file_name(idx: usize, values: &[f64]) -> String {
    let params: Vec<String> = values.iter().map(|&v| sci_1(v)).collect();
    format!("model_{idx:04}_params{}.ipac", params.join("_"))
}

/// One significant decimal with a signed two-digit exponent: `-5.9e-01`, `1.0e+03`.
fn sci_1(v: f64) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let s = format!("{v:.1e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => s,
    }
}

pub fn render_model_ipac(record: &ModelRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\\ Parameters used to generate the data:");
    let _ = writeln!(out, "\\ {NAMES_PREFIX} {}", record.names.join(", "));
    let values: Vec<String> = record.values.iter().map(|v| format!("{v}")).collect();
    let _ = writeln!(out, "\\ {VALUES_PREFIX} {}", values.join(", "));

    for (a, b) in [("Energy", "Flux"), ("double", "double"), ("keV", "1 / (cm2 keV s)"), ("null", "null")] {
        let _ = writeln!(out, "|{a:>w$}|{b:>w$}|", w = COL_WIDTH);
    }
    for (e, f) in record.spectrum.energy.iter().zip(record.spectrum.flux.iter()) {
        let _ = writeln!(out, " {:>w$} {:>w$} ", format!("{e}"), format!("{f}"), w = COL_WIDTH);
    }
    out
}

pub fn write_model_ipac(path: &Path, record: &ModelRecord) -> Result<(), AppError> {
    std::fs::write(path, render_model_ipac(record))
        .map_err(|e| AppError::new(2, format!("Failed to write IPAC table '{}': {e}", path.display())))
}

pub fn parse_model_ipac(text: &str) -> Result<ModelRecord, String> {
    let mut names: Option<Vec<String>> = None;
    let mut values: Option<Vec<f64>> = None;
    let mut energy = Vec::new();
    let mut flux = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('|') {
            continue;
        }
        if let Some(comment) = line.strip_prefix('\\') {
            let comment = comment.trim();
            if let Some(rest) = comment.strip_prefix(NAMES_PREFIX) {
                names = Some(rest.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect());
            } else if let Some(rest) = comment.strip_prefix(VALUES_PREFIX) {
                let parsed = rest
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<f64>().map_err(|_| format!("line {}: bad value '{s}'", lineno + 1)))
                    .collect::<Result<Vec<_>, _>>()?;
                values = Some(parsed);
            }
            continue;
        }

        let mut cols = line.split_whitespace();
        let (Some(e), Some(f)) = (cols.next(), cols.next()) else {
            return Err(format!("line {}: expected two columns", lineno + 1));
        };
        let parse = |s: &str| -> Result<f64, String> {
            if s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan") {
                Ok(f64::NAN)
            } else {
                s.parse::<f64>().map_err(|_| format!("line {}: bad number '{s}'", lineno + 1))
            }
        };
        energy.push(parse(e)?);
        flux.push(parse(f)?);
    }

    let names = names.ok_or_else(|| "missing 'Parameter names' comment".to_string())?;
    let values = values.ok_or_else(|| "missing 'Values' comment".to_string())?;
    if names.len() != values.len() {
        return Err(format!("{} parameter names but {} values", names.len(), values.len()));
    }
    if energy.is_empty() {
        return Err("no data rows".to_string());
    }

    Ok(ModelRecord {
        names,
        values,
        spectrum: Spectrum { energy, flux },
    })
}

pub fn read_model_ipac(path: &Path) -> Result<ModelRecord, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read IPAC table '{}': {e}", path.display())))?;
    parse_model_ipac(&text).map_err(|e| AppError::new(2, format!("Invalid IPAC table '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ModelRecord {
        ModelRecord {
            names: vec!["log10(TBabs.nH)".to_string(), "comptb.alpha".to_string()],
            values: vec![-0.59, 0.8595],
            spectrum: Spectrum {
                energy: vec![0.5, 0.75, 1.0],
                flux: vec![1.5e-2, 1.25e-2, f64::NAN],
            },
        }
    }

    #[test]
    fn file_names_use_short_scientific_values() {
        assert_eq!(
            model_file_name(7, &[-0.59, 1000.0, 0.0]),
            "model_0007_params-5.9e-01_1.0e+03_0.0e+00.ipac"
        );
    }

    #[test]
    fn table_survives_a_write_read_cycle() {
        let text = render_model_ipac(&record());
        assert!(text.starts_with("\\ Parameters used to generate the data:\n"));
        assert!(text.contains("\\ Parameter names: log10(TBabs.nH), comptb.alpha\n"));
        let back = parse_model_ipac(&text).unwrap();
        assert_eq!(back.names, record().names);
        assert_eq!(back.values, record().values);
        assert_eq!(back.spectrum.energy, record().spectrum.energy);
        assert_eq!(back.spectrum.flux[..2], record().spectrum.flux[..2]);
        assert!(back.spectrum.flux[2].is_nan());
    }

    #[test]
    fn missing_values_comment_is_reported() {
        let text = "\\ Parameter names: a\n|Energy|Flux|\n 1 2\n";
        assert!(parse_model_ipac(text).unwrap_err().contains("Values"));
    }
}

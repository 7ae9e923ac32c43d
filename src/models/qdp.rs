//! Reader for QDP tables written by XSPEC's `wdata`.
//!
//! Layout:
//!
//! ```text
//! @file.pco
//! !comment
//! READ SERR 1 2
//! 0.505 0.005 1.2e-2
//! ...
//! NO NO NO
//! ...next group...
//! ```
//!
//! Only the first group is returned. A `NO` inside a numeric row reads as NaN.

use crate::domain::{ObservedSpectrum, Spectrum};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct QdpTable {
    pub columns: Vec<Vec<f64>>,
}

impl QdpTable {
    pub fn rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    fn column(&self, idx: usize) -> Result<&[f64], AppError> {
        self.columns.get(idx).map(Vec::as_slice).ok_or_else(|| {
            AppError::new(5, format!("QDP table has {} columns, expected column {idx}.", self.columns.len()))
        })
    }

    /// `plot model` output: `energy, energy_err, model`.
    pub fn model_spectrum(&self) -> Result<Spectrum, AppError> {
        let flux_col = self.columns.len().checked_sub(1).ok_or_else(|| AppError::new(5, "Empty QDP table."))?;
        if flux_col < 2 {
            return Err(AppError::new(5, "QDP model table needs at least 3 columns."));
        }
        Ok(Spectrum {
            energy: self.column(0)?.to_vec(),
            flux: self.column(flux_col)?.to_vec(),
        })
    }

    /// `plot data` output: `energy, energy_err, y, yerr, model`.
    pub fn folded(&self) -> Result<(ObservedSpectrum, Spectrum), AppError> {
        if self.columns.len() < 5 {
            return Err(AppError::new(
                5,
                format!("QDP data table needs 5 columns, found {}.", self.columns.len()),
            ));
        }
        let energy = self.column(0)?.to_vec();
        let observed = ObservedSpectrum {
            energy: energy.clone(),
            energy_err: self.column(1)?.to_vec(),
            y: self.column(2)?.to_vec(),
            yerr: self.column(3)?.to_vec(),
        };
        let model = Spectrum {
            energy,
            flux: self.column(4)?.to_vec(),
        };
        Ok((observed, model))
    }
}

pub fn parse_qdp(text: &str) -> Result<QdpTable, AppError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('@') || line.starts_with('!') {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or_default();
        if first.eq_ignore_ascii_case("READ") {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.iter().all(|t| t.eq_ignore_ascii_case("NO")) {
            if rows.is_empty() {
                continue;
            }
            break;
        }

        let row = tokens
            .iter()
            .map(|t| {
                if t.eq_ignore_ascii_case("NO") {
                    Ok(f64::NAN)
                } else {
                    t.parse::<f64>().map_err(|_| {
                        AppError::new(5, format!("QDP line {}: cannot parse '{t}'.", lineno + 1))
                    })
                }
            })
            .collect::<Result<Vec<f64>, AppError>>()?;

        if let Some(prev) = rows.first() {
            if prev.len() != row.len() {
                return Err(AppError::new(
                    5,
                    format!("QDP line {}: expected {} columns, found {}.", lineno + 1, prev.len(), row.len()),
                ));
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(AppError::new(5, "QDP output contains no data rows."));
    }

    let ncols = rows[0].len();
    let columns = (0..ncols).map(|c| rows.iter().map(|r| r[c]).collect()).collect();
    Ok(QdpTable { columns })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "@model.pco\n!\nREAD SERR 1\n!\n0.5 0.01 1.5e-2\n0.52 0.01 1.4e-2\n0.54 0.01 NO\n";

    #[test]
    fn reads_model_columns() {
        let t = parse_qdp(MODEL).unwrap();
        assert_eq!(t.rows(), 3);
        let s = t.model_spectrum().unwrap();
        assert_eq!(s.energy, vec![0.5, 0.52, 0.54]);
        assert_eq!(s.flux[1], 1.4e-2);
        assert!(s.flux[2].is_nan());
    }

    #[test]
    fn stops_at_the_first_group_break() {
        let text = "READ SERR 1 2\n1 0.1 5 0.5 4.9\n2 0.1 6 0.6 6.1\nNO NO NO NO NO\n9 9 9 9 9\n";
        let (obs, model) = parse_qdp(text).unwrap().folded().unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs.yerr, vec![0.5, 0.6]);
        assert_eq!(model.flux, vec![4.9, 6.1]);
    }

    #[test]
    fn empty_and_ragged_tables_fail_with_xspec_code() {
        assert_eq!(parse_qdp("READ SERR 1\n").unwrap_err().exit_code(), 5);
        assert_eq!(parse_qdp("1 2 3\n1 2\n").unwrap_err().exit_code(), 5);
    }
}

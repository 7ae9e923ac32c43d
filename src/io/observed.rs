//! Observed spectra as CSV: `energy,energy_err,y,yerr`.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::ObservedSpectrum;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
struct ObservedRow {
    energy: f64,
    energy_err: f64,
    y: f64,
    yerr: f64,
}

pub fn write_observed_csv(path: &Path, data: &ObservedSpectrum) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create spectrum CSV '{}': {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);
    for i in 0..data.len() {
        writer
            .serialize(ObservedRow {
                energy: data.energy[i],
                energy_err: data.energy_err[i],
                y: data.y[i],
                yerr: data.yerr[i],
            })
            .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush spectrum CSV: {e}")))?;
    Ok(())
}

/// Read an observed spectrum, skipping rows with non-finite values or `yerr <= 0`.
pub fn read_observed_csv(path: &Path) -> Result<ObservedSpectrum, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open spectrum CSV '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut data = ObservedSpectrum {
        energy: Vec::new(),
        energy_err: Vec::new(),
        y: Vec::new(),
        yerr: Vec::new(),
    };
    let mut skipped = 0usize;
    for (idx, result) in reader.deserialize::<ObservedRow>().enumerate() {
        let row = result.map_err(|e| AppError::new(2, format!("{}:{}: {e}", path.display(), idx + 2)))?;
        let usable = [row.energy, row.energy_err, row.y, row.yerr].iter().all(|v| v.is_finite()) && row.yerr > 0.0;
        if !usable {
            skipped += 1;
            continue;
        }
        data.energy.push(row.energy);
        data.energy_err.push(row.energy_err);
        data.y.push(row.y);
        data.yerr.push(row.yerr);
    }
    if skipped > 0 {
        tracing::warn!(skipped, path = %path.display(), "skipped unusable spectrum rows");
    }
    if data.is_empty() {
        return Err(AppError::new(3, format!("Spectrum '{}' has no usable rows.", path.display())));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        std::fs::write(&path, "energy,energy_err,y,yerr\n1,0.1,5,0.5\n2,0.1,6,0\n3,0.1,NaN,0.2\n").unwrap();
        let data = read_observed_csv(&path).unwrap();
        assert_eq!(data.energy, vec![1.0]);
        assert_eq!(data.yerr, vec![0.5]);
    }

    #[test]
    fn written_spectrum_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        let data = ObservedSpectrum {
            energy: vec![1.0, 2.0],
            energy_err: vec![0.05, 0.05],
            y: vec![3.0, 2.5],
            yerr: vec![0.1, 0.2],
        };
        write_observed_csv(&path, &data).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("energy,energy_err,y,yerr\n"));
        assert_eq!(read_observed_csv(&path).unwrap(), data);
    }
}

//! Sample sets as CSV (header = parameter labels).

use std::fs::File;
use std::path::Path;

use crate::error::AppError;
use crate::sampling::SampleSet;

pub fn write_samples_csv(path: &Path, set: &SampleSet) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create samples CSV '{}': {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);

    writer
        .write_record(&set.labels)
        .map_err(|e| AppError::new(2, format!("Failed to write samples CSV header: {e}")))?;
    for row in &set.rows {
        writer
            .write_record(row.iter().map(|v| format!("{v}")))
            .map_err(|e| AppError::new(2, format!("Failed to write samples CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush samples CSV: {e}")))?;
    Ok(())
}

pub fn read_samples_csv(path: &Path) -> Result<SampleSet, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open samples CSV '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let labels: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read samples CSV headers: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::new(2, format!("{}:{line}: {e}", path.display())))?;
        let row = record
            .iter()
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| AppError::new(2, format!("{}:{line}: invalid number '{s}'", path.display())))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(AppError::new(3, format!("Samples CSV '{}' has no rows.", path.display())));
    }
    Ok(SampleSet { labels, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_csv_keeps_labels_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let set = SampleSet {
            labels: vec!["log10(TBabs.nH)".to_string(), "comptb.alpha".to_string()],
            rows: vec![vec![-0.5, 1.25], vec![0.1, 2.0]],
        };
        write_samples_csv(&path, &set).unwrap();
        assert_eq!(read_samples_csv(&path).unwrap(), set);
    }

    #[test]
    fn bad_numbers_name_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        std::fs::write(&path, "a,b\n1,2\n3,x\n").unwrap();
        let err = read_samples_csv(&path).unwrap_err();
        assert!(err.message().contains(":3:"), "{}", err.message());
    }
}

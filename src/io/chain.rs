//! MCMC chains as CSV: `step,walker,log_prob,log_prior,<labels...>`.
//!
//! The sampler appends one block of rows per step, so an interrupted run still
//! leaves a readable (truncated) chain on disk.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::AppError;
use crate::mcmc::{Chain, LOG_PRIOR_LABEL, LOG_PROB_LABEL};

const FIXED_COLUMNS: [&str; 4] = ["step", "walker", LOG_PROB_LABEL, LOG_PRIOR_LABEL];

pub struct ChainWriter {
    writer: csv::Writer<BufWriter<File>>,
}

impl ChainWriter {
    pub fn create(path: &Path, labels: &[String]) -> Result<Self, AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::new(2, format!("Failed to create chain CSV '{}': {e}", path.display())))?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        let header = FIXED_COLUMNS.iter().map(|s| s.to_string()).chain(labels.iter().cloned());
        writer
            .write_record(header)
            .map_err(|e| AppError::new(2, format!("Failed to write chain CSV header: {e}")))?;
        Ok(Self { writer })
    }

    /// Append every walker of one step and flush.
    pub fn write_step(
        &mut self,
        step: usize,
        positions: &[Vec<f64>],
        log_prob: &[f64],
        log_prior: &[f64],
    ) -> Result<(), AppError> {
        for (walker, pos) in positions.iter().enumerate() {
            let mut record = vec![
                step.to_string(),
                walker.to_string(),
                format!("{}", log_prob[walker]),
                format!("{}", log_prior[walker]),
            ];
            record.extend(pos.iter().map(|v| format!("{v}")));
            self.writer
                .write_record(&record)
                .map_err(|e| AppError::new(2, format!("Failed to write chain CSV row: {e}")))?;
        }
        self.writer
            .flush()
            .map_err(|e| AppError::new(2, format!("Failed to flush chain CSV: {e}")))
    }
}

/// Read a chain written by [`ChainWriter`]. A trailing incomplete step is dropped.
pub fn read_chain_csv(path: &Path) -> Result<Chain, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open chain CSV '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read chain CSV headers: {e}")))?
        .clone();
    if headers.len() <= FIXED_COLUMNS.len()
        || headers.iter().take(FIXED_COLUMNS.len()).ne(FIXED_COLUMNS.iter().copied())
    {
        return Err(AppError::new(2, format!("'{}' is not a chain CSV.", path.display())));
    }
    let labels: Vec<String> = headers.iter().skip(FIXED_COLUMNS.len()).map(str::to_string).collect();

    let mut chain = Chain::new(labels, 0);
    let mut current: Option<usize> = None;
    let mut positions: Vec<Vec<f64>> = Vec::new();
    let mut log_prob: Vec<f64> = Vec::new();
    let mut log_prior: Vec<f64> = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let bad = |what: &str| AppError::new(2, format!("{}:{line}: {what}", path.display()));
        let record = result.map_err(|e| bad(&e.to_string()))?;
        let nums = record
            .iter()
            .map(|s| s.parse::<f64>().map_err(|_| bad(&format!("invalid number '{s}'"))))
            .collect::<Result<Vec<f64>, _>>()?;
        let step = nums[0] as usize;

        if current.is_some_and(|c| c != step) {
            chain.push_step(std::mem::take(&mut positions), std::mem::take(&mut log_prob), std::mem::take(&mut log_prior))?;
        }
        current = Some(step);
        log_prob.push(nums[2]);
        log_prior.push(nums[3]);
        positions.push(nums[4..].to_vec());
    }

    if !positions.is_empty() && (chain.n_walkers == 0 || positions.len() == chain.n_walkers) {
        chain.push_step(positions, log_prob, log_prior)?;
    }
    if chain.n_steps() == 0 {
        return Err(AppError::new(3, format!("Chain '{}' has no steps.", path.display())));
    }
    Ok(chain)
}

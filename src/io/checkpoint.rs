//! Resume points for model generation.
//!
//! Each split keeps `last_successful_index_{start}.txt` holding the absolute index
//! of the last sample that was processed.

use std::path::{Path, PathBuf};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    start: usize,
    end: usize,
}

impl Checkpoint {
    pub fn new(dir: &Path, start: usize, end: usize) -> Self {
        Self {
            path: dir.join(format!("last_successful_index_{start}.txt")),
            start,
            end,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<usize>, AppError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            AppError::new(2, format!("Failed to read checkpoint '{}': {e}", self.path.display()))
        })?;
        let idx = text.trim().parse::<usize>().map_err(|_| {
            AppError::new(2, format!("Checkpoint '{}' does not hold an index.", self.path.display()))
        })?;
        Ok(Some(idx))
    }

    pub fn store(&self, idx: usize) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::new(2, format!("Failed to create checkpoint dir '{}': {e}", parent.display()))
            })?;
        }
        std::fs::write(&self.path, idx.to_string()).map_err(|e| {
            AppError::new(2, format!("Failed to write checkpoint '{}': {e}", self.path.display()))
        })
    }

    /// First index still to generate, or `None` when the split is complete.
    pub fn resume_from(&self) -> Result<Option<usize>, AppError> {
        match self.load()? {
            None => Ok(Some(self.start)),
            Some(last) if last == self.end => Ok(None),
            Some(last) if last < self.start || last > self.end => Err(AppError::new(
                2,
                format!(
                    "Checkpoint index {last} lies outside split {}-{} ('{}').",
                    self.start,
                    self.end,
                    self.path.display()
                ),
            )),
            Some(last) => Ok(Some(last + 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_walks_through_the_split() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(dir.path(), 1000, 1999);
        assert!(cp.path().ends_with("last_successful_index_1000.txt"));
        assert_eq!(cp.resume_from().unwrap(), Some(1000));

        cp.store(1041).unwrap();
        assert_eq!(cp.resume_from().unwrap(), Some(1042));

        cp.store(1999).unwrap();
        assert_eq!(cp.resume_from().unwrap(), None);
    }

    #[test]
    fn out_of_range_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(dir.path(), 0, 99);
        cp.store(150).unwrap();
        assert_eq!(cp.resume_from().unwrap_err().exit_code(), 2);
    }
}

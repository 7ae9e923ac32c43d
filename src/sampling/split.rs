//! Split a sample set into contiguous chunks for independent generation runs.

use crate::error::AppError;
use crate::sampling::SampleSet;

/// Rows `start..=end` of the complete sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSplit {
    pub start: usize,
    pub end: usize,
    pub set: SampleSet,
}

impl SampleSplit {
    /// `split_{start}-{end}.csv`
    pub fn file_name(&self) -> String {
        split_file_name(self.start, self.end)
    }
}

pub fn split_file_name(start: usize, end: usize) -> String {
    format!("split_{start}-{end}.csv")
}

/// Recover `(start, end)` from a split file name.
pub fn parse_split_file_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.strip_prefix("split_")?.strip_suffix(".csv")?;
    let (a, b) = stem.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

/// `parts` chunks of `len / parts` rows each; the last chunk takes the remainder.
pub fn split_samples(set: &SampleSet, parts: usize) -> Result<Vec<SampleSplit>, AppError> {
    if parts == 0 {
        return Err(AppError::new(2, "Number of splits must be > 0."));
    }
    if parts > set.len() {
        return Err(AppError::new(
            3,
            format!("Cannot split {} samples into {parts} parts.", set.len()),
        ));
    }

    let size = set.len() / parts;
    Ok((0..parts)
        .map(|i| {
            let start = i * size;
            let stop = if i + 1 < parts { start + size } else { set.len() };
            SampleSplit {
                start,
                end: stop - 1,
                set: SampleSet {
                    labels: set.labels.clone(),
                    rows: set.rows[start..stop].to_vec(),
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(n: usize) -> SampleSet {
        SampleSet {
            labels: vec!["a".to_string()],
            rows: (0..n).map(|i| vec![i as f64]).collect(),
        }
    }

    #[test]
    fn last_split_takes_the_remainder() {
        let splits = split_samples(&set(23), 5).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|s| s.set.len()).collect();
        assert_eq!(sizes, vec![4, 4, 4, 4, 7]);
        assert_eq!(splits[0].file_name(), "split_0-3.csv");
        assert_eq!(splits[4].file_name(), "split_16-22.csv");
        assert_eq!(splits[4].set.rows[0], vec![16.0]);
    }

    #[test]
    fn split_names_round_trip() {
        assert_eq!(parse_split_file_name("split_1000-1999.csv"), Some((1000, 1999)));
        assert_eq!(parse_split_file_name("complete_sample.csv"), None);
    }

    #[test]
    fn too_many_parts_is_an_error() {
        assert_eq!(split_samples(&set(3), 4).unwrap_err().exit_code(), 3);
        assert_eq!(split_samples(&set(3), 0).unwrap_err().exit_code(), 2);
    }
}

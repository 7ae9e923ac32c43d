//! Tracing setup.
//!
//! Two layers share one registry:
//!
//! - a compact console layer on stderr (`WARN`, `-v` = `INFO`, `-vv` = `DEBUG`)
//! - an optional plain-text file layer, one file per command invocation, at `DEBUG`
//!   unless `RUST_LOG` says otherwise

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

pub fn console_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// File-layer filter: the `RUST_LOG` directives when set, else `debug`.
pub fn file_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log.map(str::trim).filter(|spec| !spec.is_empty()) {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::new("debug"),
    }
}

/// `<dir>/<command>_<YYYY-mm-dd_HH-MM-SS>.log`
pub fn log_file_path(dir: &Path, command: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("{command}_{stamp}.log"))
}

/// Install the global subscriber. Returns the log file path when one was opened.
///
/// Calling this twice is harmless: the second call keeps the first subscriber.
pub fn init(verbosity: u8, log_dir: Option<&Path>, command: &str) -> Result<Option<PathBuf>, AppError> {
    let console = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_level(verbosity));

    let (file_layer, file_path) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::new(2, format!("Failed to create log directory '{}': {e}", dir.display()))
            })?;
            let path = log_file_path(dir, command);
            let file = File::create(&path).map_err(|e| {
                AppError::new(2, format!("Failed to create log file '{}': {e}", path.display()))
            })?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(file_filter(std::env::var("RUST_LOG").ok().as_deref()));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();

    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(console_level(0), LevelFilter::WARN);
        assert_eq!(console_level(1), LevelFilter::INFO);
        assert_eq!(console_level(2), LevelFilter::DEBUG);
        assert_eq!(console_level(7), LevelFilter::TRACE);
    }

    #[test]
    fn rust_log_sets_the_file_filter() {
        assert_eq!(file_filter(None).to_string(), "debug");
        assert_eq!(file_filter(Some("  ")).to_string(), "debug");
        assert_eq!(file_filter(Some("xrefl=trace")).to_string(), "xrefl=trace");
    }

    #[test]
    fn log_file_is_named_after_the_command() {
        let path = log_file_path(Path::new("logs"), "train");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("train_"));
        assert!(name.ends_with(".log"));
        // train_YYYY-mm-dd_HH-MM-SS.log
        assert_eq!(name.len(), "train_".len() + 19 + ".log".len());
    }
}

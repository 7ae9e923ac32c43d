//! Command-line parsing.
//!
//! Argument parsing stays separate from the pipeline code: every flag here is an
//! optional override of a field in the project file.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG;
use crate::simulate::DEFAULT_FRACTION;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "xrefl", version, about = "X-ray reflection spectra: XSPEC sampling, neural emulation and MCMC fitting")]
pub struct Cli {
    /// Project file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Console verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Draw the Latin hypercube sample of the free parameters.
    Sample(SampleArgs),
    /// Split the complete sample into chunks for independent generation runs.
    Split(SplitArgs),
    /// Run XSPEC over a sample split and write one IPAC file per model.
    Generate(GenerateArgs),
    /// Build the normalized training set from the generated models.
    Preprocess,
    /// Train the emulator with k-fold cross-validation.
    Train(TrainArgs),
    /// Compare emulator predictions with XSPEC spectra.
    Evaluate(EvaluateArgs),
    /// Make a target spectrum to fit.
    Simulate(SimulateArgs),
    /// Fit a spectrum with the emulator (maximum likelihood + MCMC).
    Fit(FitArgs),
    /// Write SVG figures.
    Plot {
        #[command(subcommand)]
        what: PlotCommand,
    },
    /// Print the resolved configuration and an XSPEC script preview.
    Show,
}

impl Command {
    /// Name used for the log file.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Sample(_) => "sample",
            Command::Split(_) => "split",
            Command::Generate(_) => "generate",
            Command::Preprocess => "preprocess",
            Command::Train(_) => "train",
            Command::Evaluate(_) => "evaluate",
            Command::Simulate(_) => "simulate",
            Command::Fit(_) => "fit",
            Command::Plot { .. } => "plot",
            Command::Show => "show",
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct SampleArgs {
    /// Number of samples (overrides `sampling.n`).
    #[arg(short, long)]
    pub n: Option<usize>,

    /// Random seed (overrides `sampling.seed`).
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Parser, Clone)]
pub struct SplitArgs {
    /// Number of chunks (overrides `sampling.splits`).
    #[arg(short, long)]
    pub parts: Option<usize>,
}

#[derive(Debug, Parser, Clone)]
pub struct GenerateArgs {
    /// Split CSV to process; the complete sample when omitted.
    #[arg(long, value_name = "CSV")]
    pub split: Option<PathBuf>,

    /// Parallel XSPEC processes (overrides `xspec.workers`).
    #[arg(short, long)]
    pub workers: Option<usize>,
}

#[derive(Debug, Parser, Clone)]
pub struct TrainArgs {
    /// Maximum epochs per fold (overrides `training.epochs`).
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Number of folds (overrides `training.folds`).
    #[arg(long)]
    pub folds: Option<usize>,

    /// Random seed (overrides `training.seed`).
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Where reference spectra come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EvalSource {
    /// The generated model files.
    Models,
    /// Fresh Latin hypercube samples run through XSPEC.
    Xspec,
}

#[derive(Debug, Parser, Clone)]
pub struct EvaluateArgs {
    #[arg(long, value_enum, default_value_t = EvalSource::Models)]
    pub source: EvalSource,

    /// Fresh samples to draw with `--source xspec`.
    #[arg(long, default_value_t = 100)]
    pub count: usize,

    /// Panels per row of the evaluation grid.
    #[arg(long, default_value_t = 3)]
    pub n_per_row: usize,

    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

/// Which model produces the target spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimSource {
    Xspec,
    Emulator,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    #[arg(long, value_enum, default_value_t = SimSource::Xspec)]
    pub source: SimSource,

    /// Fractional model error of the noise recipe.
    #[arg(short, long, default_value_t = DEFAULT_FRACTION)]
    pub fraction: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output JSON (default `<mcmc>/target.json`).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Target spectrum: `simulate` JSON or an `energy,energy_err,y,yerr` CSV
    /// (default `<mcmc>/target.json`).
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Walkers (overrides `mcmc.walkers`).
    #[arg(long)]
    pub walkers: Option<usize>,

    /// Steps (overrides `mcmc.steps`).
    #[arg(long)]
    pub steps: Option<usize>,

    /// Random seed (overrides `mcmc.seed`).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip the maximum-likelihood step.
    #[arg(long)]
    pub no_ml: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PlotCommand {
    /// Random grid of generated model spectra.
    Models {
        #[arg(long, default_value_t = 3)]
        n_per_row: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Histograms of the sampled parameters.
    Params,
    /// Training history, mean ± std across folds.
    History {
        /// Leading epochs to hide.
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Emulator vs XSPEC spectra saved by `evaluate`.
    Evaluate,
    /// Walker traces and corner plot of a chain.
    Chains {
        /// Chain CSV (default `<mcmc>/chain.csv`).
        #[arg(long)]
        chain: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::parse_from(["xrefl", "fit", "--steps", "10", "-vv", "--config", "p.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("p.toml"));
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.steps, Some(10));
                assert!(!args.no_ml);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn plot_subcommands_parse() {
        let cli = Cli::parse_from(["xrefl", "plot", "models", "--n-per-row", "4"]);
        assert_eq!(cli.command.name(), "plot");
        assert!(matches!(
            cli.command,
            Command::Plot {
                what: PlotCommand::Models { n_per_row: 4, seed: 0 }
            }
        ));
        let cli = Cli::parse_from(["xrefl", "simulate", "--source", "emulator", "-f", "0.2"]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.source, SimSource::Emulator);
                assert_eq!(args.fraction, 0.2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

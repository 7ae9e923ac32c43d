//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and loads the project file
//! - applies command-line overrides
//! - sets up logging for the command
//! - runs the pipeline step and prints its report

use std::path::Path;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, info, warn};

use crate::cli::{
    Cli, Command, EvalSource, EvaluateArgs, FitArgs, GenerateArgs, PlotCommand, SampleArgs, SimSource,
    SimulateArgs, TrainArgs,
};
use crate::config::Config;
use crate::error::AppError;
use crate::io::{read_chain_csv, read_json, read_model_ipac, read_samples_csv};
use crate::mcmc::summarize;
use crate::models::XspecModel;
use crate::nn::FoldHistories;
use crate::plot::{
    choose_for_grid, plot_corner, plot_evaluation_grid, plot_fit, plot_history, plot_models_grid,
    plot_param_histograms, plot_traces, render_spectrum,
};
use crate::report;

pub mod pipeline;

use pipeline::{Evaluation, ReferenceSource, TargetSource};

/// Entry point for the `xrefl` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    let mut config = Config::load(&cli.config)?;
    apply_overrides(&mut config, &cli.command)?;

    let name = cli.command.name();
    let log_dir = (!matches!(cli.command, Command::Show)).then_some(config.paths.logs.as_path());
    let log_file = crate::logging::init(cli.verbose, log_dir, name)?;
    info!(command = name, config = %cli.config.display(), "started");
    if let Some(path) = &log_file {
        debug!(file = %path.display(), "logging to file");
    }
    debug!(?config, "configuration");

    let started = Instant::now();
    match cli.command {
        Command::Sample(_) => handle_sample(&config),
        Command::Split(_) => handle_split(&config),
        Command::Generate(args) => handle_generate(&config, &args),
        Command::Preprocess => handle_preprocess(&config),
        Command::Train(_) => handle_train(&config),
        Command::Evaluate(args) => handle_evaluate(&config, &args),
        Command::Simulate(args) => handle_simulate(&config, &args),
        Command::Fit(args) => handle_fit(&config, &args),
        Command::Plot { what } => handle_plot(&config, &what),
        Command::Show => handle_show(&config),
    }?;
    info!(command = name, elapsed_s = started.elapsed().as_secs_f64(), "finished");
    Ok(())
}

/// Command-line flags win over the project file. The result is validated again.
pub fn apply_overrides(config: &mut Config, command: &Command) -> Result<(), AppError> {
    match command {
        Command::Sample(SampleArgs { n, seed }) => {
            if let Some(n) = n {
                config.sampling.n = *n;
            }
            if let Some(seed) = seed {
                config.sampling.seed = *seed;
            }
        }
        Command::Split(args) => {
            if let Some(parts) = args.parts {
                config.sampling.splits = parts;
            }
        }
        Command::Generate(GenerateArgs { workers: Some(w), .. }) => config.xspec.workers = Some(*w),
        Command::Train(TrainArgs { epochs, folds, seed }) => {
            if let Some(epochs) = epochs {
                config.training.epochs = *epochs;
            }
            if let Some(folds) = folds {
                config.training.folds = *folds;
            }
            if let Some(seed) = seed {
                config.training.seed = *seed;
            }
        }
        Command::Fit(args) => {
            if let Some(walkers) = args.walkers {
                config.mcmc.walkers = walkers;
            }
            if let Some(steps) = args.steps {
                config.mcmc.steps = steps;
            }
            if let Some(seed) = args.seed {
                config.mcmc.seed = seed;
            }
            if args.no_ml {
                config.mcmc.max_likelihood = false;
            }
        }
        _ => {}
    }
    config.validate()
}

fn handle_sample(config: &Config) -> Result<(), AppError> {
    let set = pipeline::run_sample(config)?;
    println!("{}", report::format_sample_stats(&set));
    println!("Written: {}", config.paths.complete_sample().display());
    Ok(())
}

fn handle_split(config: &Config) -> Result<(), AppError> {
    let splits = pipeline::run_split(config, config.sampling.splits)?;
    for (split, path) in &splits {
        println!("{:>6}..={:<6} {:>6} rows  {}", split.start, split.end, split.set.len(), path.display());
    }
    Ok(())
}

fn handle_generate(config: &Config, args: &GenerateArgs) -> Result<(), AppError> {
    let outcome = pipeline::run_generate(config, args.split.as_deref(), config.xspec.workers)?;
    match outcome.resumed_from {
        None => println!("Split {}-{} is already complete.", outcome.start, outcome.end),
        Some(first) => println!(
            "Split {}-{}: started at {first} | generated={} | failed={}",
            outcome.start, outcome.end, outcome.generated, outcome.failed
        ),
    }
    if outcome.failed > 0 {
        warn!(failed = outcome.failed, "some samples were skipped");
    }
    Ok(())
}

fn handle_preprocess(config: &Config) -> Result<(), AppError> {
    let (models, dataset, scalers) = pipeline::run_preprocess(config)?;
    println!("{}", report::format_preprocess_summary(models.len(), &dataset, &scalers));
    println!("Written: {} and {}", config.paths.dataset().display(), config.paths.scalers().display());
    Ok(())
}

fn handle_train(config: &Config) -> Result<(), AppError> {
    let cv = pipeline::run_train(config)?;
    println!("{}", report::format_fold_reports(&cv.reports, cv.best_fold));
    println!("Saved fold {} to {}", cv.best_fold, config.paths.network().display());
    Ok(())
}

fn handle_evaluate(config: &Config, args: &EvaluateArgs) -> Result<(), AppError> {
    let source = match args.source {
        EvalSource::Models => ReferenceSource::Models,
        EvalSource::Xspec => ReferenceSource::Xspec {
            count: args.count,
            seed: args.seed,
        },
    };
    let evaluation = pipeline::run_evaluate(config, source, args.n_per_row)?;
    println!(
        "{}",
        report::format_evaluation(evaluation.n_spectra, &evaluation.metrics, evaluation.calibration.as_ref())
    );
    println!("Written: {}", config.paths.evaluation().display());
    Ok(())
}

fn handle_simulate(config: &Config, args: &SimulateArgs) -> Result<(), AppError> {
    let source = match args.source {
        SimSource::Xspec => TargetSource::Xspec,
        SimSource::Emulator => TargetSource::Emulator,
    };
    let (simulation, path) = pipeline::run_simulate(config, source, args.fraction, args.seed, args.output.as_deref())?;
    println!("{}", render_spectrum(&simulation.observed, Some(&simulation.model), 100, 25));
    println!("Written: {} ({} bins)", path.display(), simulation.observed.len());
    Ok(())
}

fn handle_fit(config: &Config, args: &FitArgs) -> Result<(), AppError> {
    let outcome = pipeline::run_fit(config, args.data.as_deref(), config.mcmc.max_likelihood)?;
    if let Some(ml) = &outcome.max_likelihood {
        println!("{}", report::format_max_likelihood(&outcome.labels, &ml.x, ml.fun));
    }
    println!("{}", report::format_posterior(&outcome.summary));
    if !args.no_plot {
        println!("{}", render_spectrum(&outcome.observed, Some(&outcome.best_fit), args.width, args.height));
    }
    pipeline::ensure_dir(&config.paths.plots)?;
    let fit_plot = config.paths.plot("fit");
    plot_fit(&fit_plot, &outcome.observed, &[("median", &outcome.best_fit)])?;
    println!("Written: {}, {}, {}", config.paths.chain().display(), config.paths.summary().display(), fit_plot.display());
    Ok(())
}

fn handle_plot(config: &Config, what: &PlotCommand) -> Result<(), AppError> {
    pipeline::ensure_dir(&config.paths.plots)?;
    let written = match what {
        PlotCommand::Models { n_per_row, seed } => {
            let files = crate::dataset::list_model_files(&config.paths.models)?;
            let chosen = choose_for_grid(&files, *n_per_row, *seed)?;
            let models = chosen
                .iter()
                .map(|p| Ok((file_title(p), read_model_ipac(p)?)))
                .collect::<Result<Vec<_>, AppError>>()?;
            let path = config.paths.plot("models");
            plot_models_grid(&path, &models, *n_per_row)?;
            vec![path]
        }
        PlotCommand::Params => {
            let set = read_samples_csv(&config.paths.complete_sample())?;
            let path = config.paths.plot("parameters");
            plot_param_histograms(&path, &set)?;
            vec![path]
        }
        PlotCommand::History { skip } => {
            let histories: FoldHistories = read_json(&config.paths.history())?;
            let path = config.paths.plot("history");
            plot_history(&path, &histories, *skip)?;
            vec![path]
        }
        PlotCommand::Evaluate => {
            let evaluation: Evaluation = read_json(&config.paths.evaluation())?;
            let n = (evaluation.panels.len() as f64).sqrt() as usize;
            let path = config.paths.plot("evaluation");
            plot_evaluation_grid(&path, &evaluation.panels, n)?;
            vec![path]
        }
        PlotCommand::Chains { chain } => {
            let chain_path = chain.clone().unwrap_or_else(|| config.paths.chain());
            let chain = read_chain_csv(&chain_path)?;
            let space = config.parameter_space()?;
            // the truth covers the physical parameters; log_f gets none
            let truth = config.truth_vector(&space);
            let summary = summarize(&chain, truth.as_deref(), None)?;
            let traces = config.paths.plot("traces");
            plot_traces(&traces, &chain, truth.as_deref())?;
            let corner = config.paths.plot("corner");
            let (labels, samples) = chain.flat_with_blobs(summary.burn, summary.thin);
            plot_corner(&corner, &labels, &samples, truth.as_deref())?;
            println!("{}", report::format_posterior(&summary));
            vec![traces, corner]
        }
    };
    for path in written {
        println!("Written: {}", path.display());
    }
    Ok(())
}

fn file_title(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
}

fn handle_show(config: &Config) -> Result<(), AppError> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| AppError::new(2, format!("Failed to render configuration: {e}")))?;
    println!("{text}");
    let space = config.parameter_space()?;
    println!("{}", report::format_parameter_space(&space));

    let model = XspecModel::from_config(config)?;
    println!("XSPEC script at the prior midpoint ({}):", model.runner.binary);
    print!("{}", model.script_for(&space.prior_midpoint(), Path::new("out.qdp")).render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Config {
        Config::from_toml(include_str!("../xrefl.toml")).unwrap()
    }

    #[test]
    fn flags_override_the_project_file() {
        let mut config = example();
        let cli = Cli::parse_from(["xrefl", "fit", "--steps", "123", "--seed", "9", "--no-ml"]);
        apply_overrides(&mut config, &cli.command).unwrap();
        assert_eq!(config.mcmc.steps, 123);
        assert_eq!(config.mcmc.seed, 9);
        assert!(!config.mcmc.max_likelihood);

        let cli = Cli::parse_from(["xrefl", "train", "--folds", "3"]);
        apply_overrides(&mut config, &cli.command).unwrap();
        assert_eq!(config.training.folds, 3);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let mut config = example();
        let cli = Cli::parse_from(["xrefl", "train", "--folds", "1"]);
        let err = apply_overrides(&mut config, &cli.command).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

//! The workflow steps behind each subcommand.
//!
//! Every step reads its inputs from and writes its artifacts to the directories in
//! `[paths]`, so steps can run in separate processes (and on separate machines for
//! `generate`). Front-end concerns (printing, plotting) stay in `app`.

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dataset::{Dataset, LoadedModels, Scalers, load_models, preprocess};
use crate::domain::{ModelRecord, ObservedSpectrum, ParameterSpace, Spectrum};
use crate::error::AppError;
use crate::io::{
    Checkpoint, ChainWriter, model_file_name, read_json, read_observed_csv, read_samples_csv,
    write_json, write_model_ipac, write_observed_csv, write_samples_csv,
};
use crate::math::{LineFit, Minimum, fit_line, interp_many};
use crate::mcmc::{EnsembleSampler, Posterior, PosteriorSummary, initial_walkers, summarize};
use crate::models::{SpectralModel, XspecModel};
use crate::nn::{CrossValidation, Emulator, Metrics, cross_validate, rows_to_matrix};
use crate::plot::choose_for_grid;
use crate::sampling::{SampleSet, SampleSplit, create_samples, parse_split_file_name, split_samples};
use crate::simulate::{Simulation, simulate_folded, simulate_model};

/// Name of the noise-scale parameter appended to the fit vector.
pub const LOG_F_LABEL: &str = "log_f";

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create directory '{}': {e}", dir.display())))
}

/// Draw the training design and write `complete_sample.csv`.
pub fn run_sample(config: &Config) -> Result<SampleSet, AppError> {
    let space = config.parameter_space()?;
    let set = create_samples(&space, &config.sampling)?;
    ensure_dir(&config.paths.samples)?;
    let path = config.paths.complete_sample();
    write_samples_csv(&path, &set)?;
    info!(rows = set.len(), file = %path.display(), "sample written");
    Ok(set)
}

/// Cut `complete_sample.csv` into `parts` split files next to it.
pub fn run_split(config: &Config, parts: usize) -> Result<Vec<(SampleSplit, PathBuf)>, AppError> {
    let set = read_samples_csv(&config.paths.complete_sample())?;
    let splits = split_samples(&set, parts)?;
    splits
        .into_iter()
        .map(|s| {
            let path = config.paths.samples.join(s.file_name());
            write_samples_csv(&path, &s.set)?;
            debug!(start = s.start, end = s.end, file = %path.display(), "split written");
            Ok((s, path))
        })
        .collect()
}

/// Counts of one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub start: usize,
    pub end: usize,
    /// First index processed in this run; `None` when the split was already complete.
    pub resumed_from: Option<usize>,
    pub generated: usize,
    pub failed: usize,
}

/// Run XSPEC over every row of a split (or the complete sample).
///
/// Rows are processed in chunks of `workers`, each chunk in parallel; the
/// checkpoint is advanced after every chunk. Rows XSPEC fails on are logged and
/// skipped.
pub fn run_generate(config: &Config, split: Option<&Path>, workers: Option<usize>) -> Result<GenerateOutcome, AppError> {
    let path = split.map(Path::to_path_buf).unwrap_or_else(|| config.paths.complete_sample());
    let set = read_samples_csv(&path)?;
    let (start, end) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_split_file_name)
        .unwrap_or((0, set.len() - 1));
    if end < start || end - start + 1 != set.len() {
        return Err(AppError::new(
            2,
            format!("'{}' holds {} rows but is named for {start}-{end}.", path.display(), set.len()),
        ));
    }

    let model = XspecModel::from_config(config)?;
    if set.labels != model.space.labels() {
        return Err(AppError::new(
            2,
            format!("Columns of '{}' do not match the configured free parameters.", path.display()),
        ));
    }
    ensure_dir(&config.paths.models)?;

    let checkpoint = Checkpoint::new(&config.paths.checkpoints, start, end);
    let mut outcome = GenerateOutcome {
        start,
        end,
        resumed_from: None,
        generated: 0,
        failed: 0,
    };
    let Some(first) = checkpoint.resume_from()? else {
        info!(start, end, "split already complete");
        return Ok(outcome);
    };
    outcome.resumed_from = Some(first);

    let workers = workers
        .or(config.xspec.workers)
        .unwrap_or_else(rayon::current_num_threads)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| AppError::new(4, format!("Failed to start worker pool: {e}")))?;
    info!(start, end, first, workers, binary = %model.runner.binary, "generation started");

    let indices: Vec<usize> = (first..=end).collect();
    for chunk in indices.chunks(workers) {
        let results: Vec<Result<PathBuf, AppError>> = pool.install(|| {
            chunk
                .par_iter()
                .map(|&idx| generate_one(&model, &set.labels, &set.rows[idx - start], idx, &config.paths.models))
                .collect()
        });
        for (&idx, result) in chunk.iter().zip(results) {
            match result {
                Ok(file) => {
                    outcome.generated += 1;
                    debug!(idx, file = %file.display(), "model written");
                }
                Err(e) if e.exit_code() == 5 => {
                    outcome.failed += 1;
                    warn!(idx, error = %e, "xspec failed, sample skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(&last) = chunk.last() {
            checkpoint.store(last)?;
            info!(last, of = end, "checkpoint stored");
        }
    }
    Ok(outcome)
}

fn generate_one(model: &XspecModel, labels: &[String], row: &[f64], idx: usize, dir: &Path) -> Result<PathBuf, AppError> {
    let spectrum = model.evaluate(row)?;
    let record = ModelRecord {
        names: labels.to_vec(),
        values: row.to_vec(),
        spectrum,
    };
    let path = dir.join(model_file_name(idx, row));
    write_model_ipac(&path, &record)?;
    Ok(path)
}

/// Read all model files, normalize, and write `dataset.json` + `scalers.json`.
pub fn run_preprocess(config: &Config) -> Result<(LoadedModels, Dataset, Scalers), AppError> {
    let models = load_models(&config.paths.models)?;
    info!(files = models.len(), bins = models.energy.len(), "models read");
    let (dataset, scalers) = preprocess(&models, &config.preprocess)?;
    write_json(&config.paths.dataset(), &dataset)?;
    write_json(&config.paths.scalers(), &scalers)?;
    info!(rows = dataset.len(), inputs = dataset.n_inputs(), outputs = dataset.n_outputs(), "dataset written");
    Ok((models, dataset, scalers))
}

/// K-fold training; saves the best fold's network, the merged history and fold reports.
pub fn run_train(config: &Config) -> Result<CrossValidation, AppError> {
    let dataset: Dataset = read_json(&config.paths.dataset())?;
    if dataset.len() < config.training.folds {
        return Err(AppError::new(
            3,
            format!("{} rows are too few for {} folds.", dataset.len(), config.training.folds),
        ));
    }
    let cv = cross_validate(&dataset, &config.network, &config.training)?;
    write_json(&config.paths.network(), &cv.network.to_record())?;
    write_json(&config.paths.history(), &cv.histories)?;
    write_json(&config.paths.folds(), &cv.reports)?;
    info!(file = %config.paths.network().display(), best_fold = cv.best_fold, "network saved");
    Ok(cv)
}

fn load_emulator(config: &Config) -> Result<Emulator, AppError> {
    Emulator::load(&config.paths.network(), &config.paths.scalers())
}

fn check_labels(emulator: &Emulator, space: &ParameterSpace) -> Result<(), AppError> {
    if emulator.labels() != space.labels().as_slice() {
        return Err(AppError::new(
            2,
            format!(
                "Emulator parameters [{}] differ from the configured free parameters [{}].",
                emulator.labels().join(", "),
                space.labels().join(", ")
            ),
        ));
    }
    Ok(())
}

/// Where `evaluate` takes reference spectra from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    Models,
    Xspec { count: usize, seed: u64 },
}

/// Emulator accuracy plus the spectra picked for the evaluation grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub source: String,
    pub n_spectra: usize,
    pub metrics: Metrics,
    /// `predicted ≈ intercept + slope · true` over all bins.
    pub calibration: Option<LineFit>,
    /// `(title, xspec, emulator)`
    pub panels: Vec<(String, Spectrum, Spectrum)>,
}

struct Reference {
    title: String,
    params: Vec<f64>,
    spectrum: Spectrum,
}

fn references(config: &Config, source: ReferenceSource) -> Result<Vec<Reference>, AppError> {
    match source {
        ReferenceSource::Models => {
            let models = load_models(&config.paths.models)?;
            let energy = models.energy.clone();
            Ok(models
                .files
                .iter()
                .zip(models.params)
                .zip(models.flux)
                .map(|((file, params), flux)| Reference {
                    title: file.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default(),
                    params,
                    spectrum: Spectrum {
                        energy: energy.clone(),
                        flux,
                    },
                })
                .collect())
        }
        ReferenceSource::Xspec { count, seed } => {
            let model = XspecModel::from_config(config)?;
            let mut sampling = config.sampling.clone();
            sampling.n = count;
            sampling.seed = seed;
            let set = create_samples(&model.space, &sampling)?;
            let results: Vec<Result<Reference, AppError>> = set
                .rows
                .par_iter()
                .enumerate()
                .map(|(i, row)| {
                    Ok(Reference {
                        title: format!("sample {i}"),
                        params: row.clone(),
                        spectrum: model.evaluate(row)?,
                    })
                })
                .collect();
            let mut out = Vec::with_capacity(results.len());
            for r in results {
                match r {
                    Ok(reference) => out.push(reference),
                    Err(e) if e.exit_code() == 5 => warn!(error = %e, "xspec failed, sample skipped"),
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        }
    }
}

/// Predict every reference spectrum with the emulator and score the result.
pub fn run_evaluate(config: &Config, source: ReferenceSource, n_per_row: usize) -> Result<Evaluation, AppError> {
    let emulator = load_emulator(config)?;
    let refs = references(config, source)?;
    let Some(first) = refs.first() else {
        return Err(AppError::new(3, "No reference spectra to evaluate against."));
    };
    let bins = first.spectrum.len();
    if refs.iter().any(|r| r.spectrum.len() != bins) {
        return Err(AppError::new(4, "Reference spectra do not share one energy grid."));
    }

    let params: Vec<Vec<f64>> = refs.iter().map(|r| r.params.clone()).collect();
    let predicted: Vec<Vec<f64>> = emulator
        .predict_many(&params)?
        .into_iter()
        .zip(refs.iter())
        .map(|(flux, r)| interp_many(&r.spectrum.energy, emulator.energy(), &flux))
        .collect();
    let truth: Vec<Vec<f64>> = refs.iter().map(|r| r.spectrum.flux.clone()).collect();
    let metrics = Metrics::evaluate(&rows_to_matrix(&predicted), &rows_to_matrix(&truth));

    let flat_truth: Vec<f64> = truth.iter().flatten().copied().collect();
    let flat_pred: Vec<f64> = predicted.iter().flatten().copied().collect();
    let calibration = fit_line(&flat_truth, &flat_pred);

    let n = n_per_row.min((refs.len() as f64).sqrt() as usize).max(1);
    let picked = choose_for_grid(&(0..refs.len()).collect::<Vec<_>>(), n, config.training.seed)?;
    let panels = picked
        .into_iter()
        .map(|i| {
            let r = &refs[i];
            let prediction = Spectrum {
                energy: r.spectrum.energy.clone(),
                flux: predicted[i].clone(),
            };
            (r.title.clone(), r.spectrum.clone(), prediction)
        })
        .collect();

    let evaluation = Evaluation {
        source: match source {
            ReferenceSource::Models => "models".to_string(),
            ReferenceSource::Xspec { .. } => "xspec".to_string(),
        },
        n_spectra: refs.len(),
        metrics,
        calibration,
        panels,
    };
    write_json(&config.paths.evaluation(), &evaluation)?;
    info!(spectra = evaluation.n_spectra, r2 = metrics.r_squared, "evaluation written");
    Ok(evaluation)
}

/// Which model produces a simulated target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Xspec,
    Emulator,
}

/// Parameters of the simulated source: the configured truth, else the prior midpoint.
fn reference_params(config: &Config, space: &ParameterSpace) -> Vec<f64> {
    config.truth_vector(space).unwrap_or_else(|| {
        warn!("mcmc.truth does not cover every free parameter; using prior midpoints");
        space.prior_midpoint()
    })
}

/// Simulate a target spectrum and write it as JSON plus an observed-spectrum CSV.
pub fn run_simulate(
    config: &Config,
    source: TargetSource,
    fraction: f64,
    seed: u64,
    output: Option<&Path>,
) -> Result<(Simulation, PathBuf), AppError> {
    if !(fraction.is_finite() && fraction >= 0.0) {
        return Err(AppError::new(2, format!("Noise fraction must be >= 0, got {fraction}.")));
    }
    let space = config.parameter_space()?;
    let params = reference_params(config, &space);
    let output = output.map(Path::to_path_buf).unwrap_or_else(|| config.paths.target());
    if let Some(dir) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(dir)?;
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let simulation = match source {
        TargetSource::Xspec => {
            let model = XspecModel::from_config(config)?;
            if config.xspec.fakeit.is_some() {
                simulate_folded(&model, &params, &output.with_extension("fak"))?
            } else {
                simulate_model(&model, &params, fraction, &mut rng)?
            }
        }
        TargetSource::Emulator => {
            let emulator = load_emulator(config)?;
            check_labels(&emulator, &space)?;
            simulate_model(&emulator, &params, fraction, &mut rng)?
        }
    };
    write_json(&output, &simulation)?;
    write_observed_csv(&output.with_extension("csv"), &simulation.observed)?;
    info!(file = %output.display(), bins = simulation.observed.len(), "target written");
    Ok((simulation, output))
}

/// Observed spectrum plus the truth it was simulated from, when known.
pub fn load_target(path: &Path) -> Result<(ObservedSpectrum, Option<Vec<f64>>), AppError> {
    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
        return Ok((read_observed_csv(path)?, None));
    }
    let simulation: Simulation = read_json(path)?;
    let truth = simulation.truth();
    Ok((simulation.observed, Some(truth)))
}

/// Everything `fit` produces.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub labels: Vec<String>,
    pub observed: ObservedSpectrum,
    pub max_likelihood: Option<Minimum>,
    pub summary: PosteriorSummary,
    /// Emulator spectrum at the posterior medians.
    pub best_fit: Spectrum,
}

/// Maximum likelihood (optional) followed by ensemble MCMC with the emulator.
pub fn run_fit(config: &Config, data: Option<&Path>, max_likelihood: bool) -> Result<FitOutcome, AppError> {
    let space = config.parameter_space()?;
    let emulator = load_emulator(config)?;
    check_labels(&emulator, &space)?;

    let data = data.map(Path::to_path_buf).unwrap_or_else(|| config.paths.target());
    let (observed, target_truth) = load_target(&data)?;
    if observed.is_empty() {
        return Err(AppError::new(3, format!("'{}' holds no spectral bins.", data.display())));
    }
    info!(file = %data.display(), bins = observed.len(), "target loaded");

    let n = space.len();
    let mut bounds = space.prior_bounds();
    bounds.push(config.mcmc.log_f_prior);
    let posterior = Posterior::new(&emulator, &observed, bounds)?;

    let truth = target_truth.or_else(|| config.truth_vector(&space));
    let mut start: Vec<f64> = match truth.as_deref() {
        Some(t) if space.contains(&t[..n.min(t.len())]) => t[..n].to_vec(),
        _ => space.prior_midpoint(),
    };
    start.push(config.mcmc.log_f_init);
    if !posterior.log_prior(&start).is_finite() {
        return Err(AppError::new(2, "mcmc.log_f_init lies outside mcmc.log_f_prior."));
    }

    let mut labels = space.labels();
    labels.push(LOG_F_LABEL.to_string());
    let mut rng = StdRng::seed_from_u64(config.mcmc.seed);

    let ml = if max_likelihood {
        let result = posterior.max_likelihood(&start, &mut rng)?;
        info!(nll = result.fun, iterations = result.iterations, converged = result.converged, "maximum likelihood");
        if !result.converged {
            warn!("Nelder–Mead stopped at the iteration limit");
        }
        Some(result)
    } else {
        None
    };
    let center = ml.as_ref().map(|m| m.x.clone()).unwrap_or_else(|| start.clone());

    let walkers = initial_walkers(
        &center,
        config.mcmc.init_spread,
        config.mcmc.walkers,
        |t| posterior.log_prior(t),
        &mut rng,
    )?;
    ensure_dir(&config.paths.mcmc)?;
    let mut writer = ChainWriter::create(&config.paths.chain(), &labels)?;
    let sampler = EnsembleSampler::new(labels.clone(), |t: &[f64]| posterior.log_probability(t), config.mcmc.moves.clone())?;
    info!(walkers = config.mcmc.walkers, steps = config.mcmc.steps, ndim = labels.len(), "sampling started");
    let chain = sampler.run(walkers, config.mcmc.steps, config.mcmc.seed, |step, state| {
        writer.write_step(step, &state.positions, &state.log_prob, &state.log_prior)
    })?;

    let summary = summarize(&chain, truth.as_deref(), ml.as_ref().map(|m| m.x.clone()))?;
    write_json(&config.paths.summary(), &summary)?;

    let medians: Vec<f64> = summary.params.iter().take(n).map(|p| p.median).collect();
    let best_fit = emulator.evaluate(&medians)?;
    Ok(FitOutcome {
        labels,
        observed,
        max_likelihood: ml,
        summary,
        best_fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamLimits;
    use crate::io::read_chain_csv;
    use crate::nn::Network;
    use crate::config::{ModelConfig, NetworkConfig};
    use crate::dataset::MinMaxScaler;

    fn config(root: &Path) -> Config {
        let mut cfg = Config::from_toml(include_str!("../../xrefl.toml")).unwrap();
        cfg.paths.samples = root.join("samples");
        cfg.paths.data = root.join("data");
        cfg.paths.results = root.join("results");
        cfg.paths.mcmc = root.join("mcmc");
        cfg.paths.checkpoints = root.join("checkpoints");
        cfg.paths.models = root.join("models");
        cfg.paths.work = root.join("work");
        cfg.sampling.n = 20;
        cfg
    }

    #[test]
    fn sample_then_split_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let set = run_sample(&cfg).unwrap();
        assert_eq!(set.len(), 20);
        let splits = run_split(&cfg, 3).unwrap();
        let names: Vec<String> = splits.iter().map(|(s, _)| s.file_name()).collect();
        assert_eq!(names, vec!["split_0-5.csv", "split_6-11.csv", "split_12-19.csv"]);
        let last = read_samples_csv(&splits[2].1).unwrap();
        assert_eq!(last.rows.len(), 8);
        assert_eq!(last.labels, set.labels);
    }

    #[test]
    fn finished_split_is_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.xspec.binary = "/nonexistent/xspec".to_string();
        run_sample(&cfg).unwrap();
        let (split, path) = run_split(&cfg, 2).unwrap().remove(0);
        Checkpoint::new(&cfg.paths.checkpoints, split.start, split.end)
            .store(split.end)
            .unwrap();
        let outcome = run_generate(&cfg, Some(&path), Some(1)).unwrap();
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(outcome.generated, 0);
    }

    #[test]
    fn missing_xspec_skips_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.xspec.binary = "/nonexistent/xspec".to_string();
        run_sample(&cfg).unwrap();
        let (_, path) = run_split(&cfg, 4).unwrap().remove(1);
        let outcome = run_generate(&cfg, Some(&path), Some(2)).unwrap();
        assert_eq!((outcome.start, outcome.end), (5, 9));
        assert_eq!(outcome.resumed_from, Some(5));
        assert_eq!(outcome.generated + outcome.failed, 5);
        let checkpoint = Checkpoint::new(&cfg.paths.checkpoints, 5, 9);
        assert_eq!(checkpoint.load().unwrap(), Some(9));
    }

    fn toy_config(root: &Path) -> Config {
        let text = r#"
            [model]
            expression = "powerlaw"

            [[model.parameters]]
            index = 1
            component = "powerlaw"
            name = "PhoIndex"
            limits = { delta = 0.01, min = 1.0, bot = 1.0, top = 3.0, max = 3.0 }

            [[model.parameters]]
            index = 2
            component = "powerlaw"
            name = "norm"
            limits = { delta = 0.01, min = 0.1, bot = 0.1, top = 10.0, max = 10.0 }
            log = true

            [network]
            neurons = 4
            hidden = 1

            [mcmc]
            walkers = 8
            steps = 30
            max_likelihood = true

            [mcmc.truth]
            "powerlaw.PhoIndex" = 2.0
            "log10(powerlaw.norm)" = 0.0
        "#;
        let mut cfg = Config::from_toml(text).unwrap();
        cfg.paths.data = root.join("data");
        cfg.paths.results = root.join("results");
        cfg.paths.mcmc = root.join("mcmc");
        cfg
    }

    fn save_toy_emulator(cfg: &Config) {
        let energy: Vec<f64> = (1..=16).map(|i| i as f64 * 0.5).collect();
        let scalers = Scalers {
            labels: vec!["powerlaw.PhoIndex".into(), "log10(powerlaw.norm)".into()],
            removed: vec![],
            params: vec![
                MinMaxScaler::fit([1.0, 3.0], [-1.0, 1.0]).unwrap(),
                MinMaxScaler::fit([-1.0, 1.0], [-1.0, 1.0]).unwrap(),
            ],
            flux: energy.iter().map(|_| MinMaxScaler::fit([0.0, 2.0], [0.0, 1.0]).unwrap()).collect(),
            energy,
        };
        let net_cfg = NetworkConfig {
            neurons: 4,
            hidden: 1,
            dropout: 0.0,
        };
        let network = Network::build(2, 16, &net_cfg, &mut StdRng::seed_from_u64(3));
        write_json(&cfg.paths.scalers(), &scalers).unwrap();
        write_json(&cfg.paths.network(), &network.to_record()).unwrap();
    }

    #[test]
    fn emulator_target_can_be_fitted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = toy_config(dir.path());
        save_toy_emulator(&cfg);

        let (sim, path) = run_simulate(&cfg, TargetSource::Emulator, 0.1, 5, None).unwrap();
        assert_eq!(sim.params, vec![2.0, 0.0]);
        assert!(path.with_extension("csv").exists());

        let outcome = run_fit(&cfg, None, true).unwrap();
        assert_eq!(outcome.labels.last().map(String::as_str), Some(LOG_F_LABEL));
        assert_eq!(outcome.summary.params.len(), 3);
        assert_eq!(outcome.summary.params[0].truth, Some(2.0));
        assert!((outcome.summary.params[2].truth.unwrap() - 0.1f64.ln()).abs() < 1e-12);
        assert_eq!(outcome.best_fit.len(), 16);
        assert!(outcome.max_likelihood.is_some());

        let chain = read_chain_csv(&cfg.paths.chain()).unwrap();
        assert_eq!(chain.n_steps(), 30);
        assert_eq!(chain.labels, outcome.labels);
    }

    #[test]
    fn evaluation_scores_the_emulator_against_model_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = toy_config(dir.path());
        cfg.paths.models = dir.path().join("models");
        save_toy_emulator(&cfg);
        ensure_dir(&cfg.paths.models).unwrap();

        let err = run_evaluate(&cfg, ReferenceSource::Models, 3).unwrap_err();
        assert_eq!(err.exit_code(), 3);

        // a coarser grid than the emulator's, so predictions are interpolated
        let energy: Vec<f64> = (1..=8).map(|e| e as f64).collect();
        for i in 0..5 {
            let values = vec![1.5 + 0.25 * i as f64, -0.5 + 0.2 * i as f64];
            let record = ModelRecord {
                names: vec!["powerlaw.PhoIndex".into(), "log10(powerlaw.norm)".into()],
                spectrum: Spectrum {
                    energy: energy.clone(),
                    flux: energy.iter().map(|e| 10f64.powf(values[1]) * e.powf(-values[0])).collect(),
                },
                values,
            };
            write_model_ipac(&cfg.paths.models.join(model_file_name(i, &record.values)), &record).unwrap();
        }

        let evaluation = run_evaluate(&cfg, ReferenceSource::Models, 3).unwrap();
        assert_eq!(evaluation.source, "models");
        assert_eq!(evaluation.n_spectra, 5);
        // five spectra only fill a 2x2 grid
        assert_eq!(evaluation.panels.len(), 4);
        assert!(evaluation.metrics.mean_squared_error.is_finite());
        assert!(evaluation.calibration.is_some());

        let emulator = load_emulator(&cfg).unwrap();
        for (title, reference, predicted) in &evaluation.panels {
            let record = crate::io::read_model_ipac(&cfg.paths.models.join(format!("{title}.ipac"))).unwrap();
            assert_eq!(reference.flux, record.spectrum.flux);
            assert_eq!(predicted.energy, energy);
            let expected = emulator.evaluate_at(&record.values, &energy).unwrap();
            for (p, e) in predicted.flux.iter().zip(expected.iter()) {
                assert!((p - e).abs() < 1e-9, "{p} vs {e}");
            }
        }

        let saved: Evaluation = read_json(&cfg.paths.evaluation()).unwrap();
        assert_eq!(saved.n_spectra, 5);
        assert_eq!(saved.panels.len(), 4);
    }

    #[test]
    fn csv_targets_carry_no_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        let observed = ObservedSpectrum {
            energy: vec![1.0, 2.0],
            energy_err: vec![0.5, 0.5],
            y: vec![3.0, 4.0],
            yerr: vec![0.1, 0.1],
        };
        write_observed_csv(&path, &observed).unwrap();
        let (read, truth) = load_target(&path).unwrap();
        assert_eq!(read, observed);
        assert!(truth.is_none());
    }

    #[test]
    fn emulator_with_other_parameters_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = toy_config(dir.path());
        save_toy_emulator(&cfg);
        cfg.model = ModelConfig {
            expression: "powerlaw".into(),
            parameters: vec![crate::domain::ParamSpec {
                index: 1,
                component: "powerlaw".into(),
                name: "PhoIndex".into(),
                value: None,
                limits: Some(ParamLimits {
                    delta: 0.01,
                    min: 1.0,
                    bot: 1.0,
                    top: 3.0,
                    max: 3.0,
                }),
                frozen: false,
                link: None,
                log: false,
                prior: None,
            }],
            link_blocks: vec![],
        };
        let err = run_fit(&cfg, None, false).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

//! Project configuration (TOML).
//!
//! One file describes a whole run: where artifacts live, which XSPEC model is
//! emulated, how the training set is sampled, the network, training and MCMC knobs.
//! Every section except `[model]` has defaults, so a minimal file only needs the
//! model expression and its parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{FreeParam, ParamSpec, ParameterSpace};
use crate::error::AppError;
use crate::mcmc::MoveSpec;
use crate::sampling::ConditionalRule;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG: &str = "xrefl.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub xspec: XspecConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub mcmc: McmcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub logs: PathBuf,
    pub samples: PathBuf,
    pub models: PathBuf,
    pub data: PathBuf,
    pub results: PathBuf,
    pub mcmc: PathBuf,
    pub plots: PathBuf,
    pub checkpoints: PathBuf,
    pub work: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs: PathBuf::from("logs"),
            samples: PathBuf::from("samples"),
            models: PathBuf::from("models"),
            data: PathBuf::from("data"),
            results: PathBuf::from("results"),
            mcmc: PathBuf::from("mcmc_result"),
            plots: PathBuf::from("plots"),
            checkpoints: PathBuf::from("checkpoints"),
            work: PathBuf::from("work"),
        }
    }
}

impl PathsConfig {
    pub fn complete_sample(&self) -> PathBuf {
        self.samples.join("complete_sample.csv")
    }

    pub fn dataset(&self) -> PathBuf {
        self.data.join("dataset.json")
    }

    pub fn scalers(&self) -> PathBuf {
        self.data.join("scalers.json")
    }

    pub fn network(&self) -> PathBuf {
        self.results.join("network.json")
    }

    pub fn history(&self) -> PathBuf {
        self.results.join("history.json")
    }

    pub fn folds(&self) -> PathBuf {
        self.results.join("folds.json")
    }

    pub fn evaluation(&self) -> PathBuf {
        self.results.join("evaluation.json")
    }

    pub fn target(&self) -> PathBuf {
        self.mcmc.join("target.json")
    }

    pub fn chain(&self) -> PathBuf {
        self.mcmc.join("chain.csv")
    }

    pub fn summary(&self) -> PathBuf {
        self.mcmc.join("summary.json")
    }

    pub fn plot(&self, name: &str) -> PathBuf {
        self.plots.join(format!("{name}.svg"))
    }
}

/// Consecutive parameters linked to an earlier block: `p{i} = p{i - offset}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBlock {
    pub start: usize,
    pub count: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub expression: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    #[serde(default)]
    pub link_blocks: Vec<LinkBlock>,
}

/// Folded-spectrum settings for XSPEC `fakeit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeitConfig {
    pub response: PathBuf,
    #[serde(default)]
    pub arf: Option<PathBuf>,
    #[serde(default = "default_exposure")]
    pub exposure: f64,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_exposure() -> f64 {
    1e5
}

fn default_ignore() -> Vec<String> {
    vec!["**-0.3".to_string(), "10.-**".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XspecConfig {
    pub binary: String,
    pub energy_min: f64,
    pub energy_max: f64,
    pub bins: usize,
    /// Average every `smooth` consecutive bins of the XSPEC output (1 = keep all).
    pub smooth: usize,
    /// Concurrent XSPEC processes (defaults to the rayon pool size).
    pub workers: Option<usize>,
    pub abund: Option<String>,
    pub xsect: Option<String>,
    pub fakeit: Option<FakeitConfig>,
}

impl Default for XspecConfig {
    fn default() -> Self {
        Self {
            binary: "xspec".to_string(),
            energy_min: 0.1,
            energy_max: 100.0,
            bins: 1000,
            smooth: 1,
            workers: None,
            abund: None,
            xsect: None,
            fakeit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub n: usize,
    pub seed: u64,
    pub splits: usize,
    /// Labels whose Latin hypercube strata share one permutation.
    pub linked: Vec<String>,
    pub rules: Vec<ConditionalRule>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n: 10_000,
            seed: 42,
            splits: 10,
            linked: Vec::new(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub param_range: [f64; 2],
    pub flux_range: [f64; 2],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            param_range: [-1.0, 1.0],
            flux_range: [0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub neurons: usize,
    pub hidden: usize,
    pub dropout: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            neurons: 128,
            hidden: 4,
            dropout: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub folds: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub clipnorm: f64,
    /// Early-stopping patience in epochs (0 disables early stopping).
    pub patience: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            epochs: 250,
            batch_size: 50,
            learning_rate: 1e-4,
            clipnorm: 1.0,
            patience: 20,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcConfig {
    pub walkers: usize,
    pub steps: usize,
    pub seed: u64,
    pub init_spread: f64,
    pub log_f_prior: [f64; 2],
    pub log_f_init: f64,
    /// Run the Nelder–Mead maximum-likelihood step before sampling.
    pub max_likelihood: bool,
    pub moves: Vec<MoveSpec>,
    /// Reference parameter values (sampling space), used as the starting point and
    /// drawn as truth markers.
    pub truth: BTreeMap<String, f64>,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            walkers: 256,
            steps: 5000,
            seed: 42,
            init_spread: 0.1,
            log_f_prior: [-5.0, 1.0],
            log_f_init: -1.6,
            max_likelihood: true,
            moves: vec![MoveSpec::stretch(1.0)],
            truth: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(2, format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| AppError::new(2, format!("{} ({})", e.message(), path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        let config: Config =
            toml::from_str(text).map_err(|e| AppError::new(2, format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Model parameters with link blocks expanded, sorted by XSPEC index.
    ///
    /// Link blocks only fill in parameters that are not already listed; an explicit
    /// `[[model.parameters]]` entry always wins.
    pub fn resolved_parameters(&self) -> Vec<ParamSpec> {
        let mut by_index: BTreeMap<usize, ParamSpec> = self
            .model
            .parameters
            .iter()
            .map(|p| (p.index, p.clone()))
            .collect();

        for block in &self.model.link_blocks {
            for i in block.start..block.start + block.count {
                by_index.entry(i).or_insert_with(|| ParamSpec {
                    index: i,
                    component: "link".to_string(),
                    name: format!("p{i}"),
                    value: None,
                    limits: None,
                    frozen: false,
                    link: Some(format!("p{}", i - block.offset)),
                    log: false,
                    prior: None,
                });
            }
        }

        by_index.into_values().collect()
    }

    /// The free parameters, in XSPEC index order, with bounds in sampling space.
    pub fn parameter_space(&self) -> Result<ParameterSpace, AppError> {
        let mut params = Vec::new();
        for spec in self.resolved_parameters().into_iter().filter(ParamSpec::is_free) {
            let label = spec.label();
            let limits = spec.limits.ok_or_else(|| {
                AppError::new(2, format!("Free parameter {label} (p{}) has no limits.", spec.index))
            })?;
            let (lower, upper) = if spec.log {
                if limits.bot <= 0.0 {
                    return Err(AppError::new(
                        2,
                        format!("Log-sampled parameter {label} needs bot > 0, got {}.", limits.bot),
                    ));
                }
                (limits.bot.log10(), limits.top.log10())
            } else {
                (limits.bot, limits.top)
            };
            if !(lower.is_finite() && upper.is_finite() && upper > lower) {
                return Err(AppError::new(
                    2,
                    format!("Invalid sampling bounds for {label}: [{lower}, {upper}]."),
                ));
            }
            let prior = spec.prior.unwrap_or([lower, upper]);
            if !(prior[0].is_finite() && prior[1].is_finite() && prior[1] > prior[0]) {
                return Err(AppError::new(2, format!("Invalid prior for {label}: {prior:?}.")));
            }
            params.push(FreeParam {
                index: spec.index,
                label,
                log: spec.log,
                lower,
                upper,
                prior,
            });
        }

        if params.is_empty() {
            return Err(AppError::new(2, "The model has no free parameters."));
        }
        Ok(ParameterSpace { params })
    }

    /// Truth vector in parameter-space order, if every free parameter has a value.
    pub fn truth_vector(&self, space: &ParameterSpace) -> Option<Vec<f64>> {
        space
            .params
            .iter()
            .map(|p| self.mcmc.truth.get(&p.label).copied())
            .collect()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.model.expression.trim().is_empty() {
            return Err(AppError::new(2, "model.expression must not be empty."));
        }

        let mut seen = BTreeSet::new();
        for p in &self.model.parameters {
            if p.index == 0 {
                return Err(AppError::new(2, format!("Parameter {} has index 0 (indices start at 1).", p.name)));
            }
            if !seen.insert(p.index) {
                return Err(AppError::new(2, format!("Duplicate parameter index p{}.", p.index)));
            }
            if let Some(l) = p.limits {
                if !(l.min <= l.bot && l.bot < l.top && l.top <= l.max) {
                    return Err(AppError::new(
                        2,
                        format!("Parameter p{} limits must satisfy min <= bot < top <= max.", p.index),
                    ));
                }
            }
        }
        for block in &self.model.link_blocks {
            if block.offset == 0 || block.offset >= block.start {
                return Err(AppError::new(
                    2,
                    format!("Link block starting at p{} has an invalid offset {}.", block.start, block.offset),
                ));
            }
        }

        let space = self.parameter_space()?;
        for label in &self.sampling.linked {
            if space.position(label).is_none() {
                return Err(AppError::new(2, format!("sampling.linked: unknown free parameter '{label}'.")));
            }
        }
        for rule in &self.sampling.rules {
            rule.validate(&space)?;
        }
        if self.sampling.n == 0 {
            return Err(AppError::new(2, "sampling.n must be > 0."));
        }
        if self.sampling.splits == 0 {
            return Err(AppError::new(2, "sampling.splits must be > 0."));
        }

        if !(self.xspec.energy_min > 0.0 && self.xspec.energy_max > self.xspec.energy_min) {
            return Err(AppError::new(2, "xspec energy range must satisfy 0 < energy_min < energy_max."));
        }
        if self.xspec.bins == 0 {
            return Err(AppError::new(2, "xspec.bins must be > 0."));
        }

        for range in [self.preprocess.param_range, self.preprocess.flux_range] {
            if range[1] <= range[0] {
                return Err(AppError::new(2, format!("Invalid scaler range {range:?}.")));
            }
        }

        if self.network.neurons == 0 {
            return Err(AppError::new(2, "network.neurons must be > 0."));
        }
        if !(0.0..1.0).contains(&self.network.dropout) {
            return Err(AppError::new(2, "network.dropout must be in [0, 1)."));
        }

        if self.training.folds < 2 {
            return Err(AppError::new(2, "training.folds must be >= 2."));
        }
        if self.training.epochs == 0 || self.training.batch_size == 0 {
            return Err(AppError::new(2, "training.epochs and training.batch_size must be > 0."));
        }
        if !(self.training.learning_rate > 0.0 && self.training.learning_rate.is_finite()) {
            return Err(AppError::new(2, "training.learning_rate must be > 0."));
        }

        let ndim = space.len() + 1;
        if self.mcmc.walkers < 2 * ndim {
            return Err(AppError::new(
                2,
                format!("mcmc.walkers must be >= 2 * ndim = {} (got {}).", 2 * ndim, self.mcmc.walkers),
            ));
        }
        if self.mcmc.walkers % 2 != 0 {
            return Err(AppError::new(2, "mcmc.walkers must be even."));
        }
        if self.mcmc.log_f_prior[1] <= self.mcmc.log_f_prior[0] {
            return Err(AppError::new(2, "mcmc.log_f_prior must be an increasing interval."));
        }
        if self.mcmc.moves.is_empty() {
            return Err(AppError::new(2, "mcmc.moves must not be empty."));
        }
        for m in &self.mcmc.moves {
            m.validate()?;
        }
        for label in self.mcmc.truth.keys() {
            if space.position(label).is_none() {
                return Err(AppError::new(2, format!("mcmc.truth: unknown free parameter '{label}'.")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../xrefl.toml");

    const MINIMAL: &str = r#"
[model]
expression = "powerlaw"

[[model.parameters]]
index = 1
component = "powerlaw"
name = "PhoIndex"
limits = { delta = 0.01, min = -3.0, bot = -2.0, top = 9.0, max = 10.0 }

[[model.parameters]]
index = 2
component = "powerlaw"
name = "norm"
limits = { delta = 0.01, min = 0.0, bot = 0.01, top = 100.0, max = 1e24 }
log = true

[mcmc]
walkers = 8
"#;

    #[test]
    fn example_config_resolves_thirteen_free_parameters() {
        let config = Config::from_toml(EXAMPLE).unwrap();
        let space = config.parameter_space().unwrap();
        assert_eq!(space.len(), 13);
        assert_eq!(space.params[0].label, "log10(TBabs.nH)");
        assert_eq!(space.params[8].label, "comptb.alpha");
        assert_eq!(space.params[9].label, "log10(comptb.kTe)");
        assert_eq!(space.params[12].label, "log10(diskbb.norm)");

        // log10 bounds for kTe: [log10 2, log10 1000]
        assert!((space.params[9].lower - 2f64.log10()).abs() < 1e-12);
        assert!((space.params[9].upper - 3.0).abs() < 1e-12);

        // explicit prior overrides the sampling bounds
        assert_eq!(space.params[1].prior, [-3.0, -1.0]);

        assert!(config.truth_vector(&space).is_some());
    }

    #[test]
    fn link_blocks_expand_into_links() {
        let config = Config::from_toml(EXAMPLE).unwrap();
        let params = config.resolved_parameters();
        let p20 = params.iter().find(|p| p.index == 20).unwrap();
        assert_eq!(p20.link.as_deref(), Some("p11"));
        let p26 = params.iter().find(|p| p.index == 26).unwrap();
        assert_eq!(p26.link.as_deref(), Some("p17"));
        assert_eq!(params.len(), 26);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.training.folds, 5);
        assert_eq!(config.paths.models, PathBuf::from("models"));
        assert_eq!(config.parameter_space().unwrap().len(), 2);
    }

    #[test]
    fn rejects_free_parameter_without_limits() {
        let text = MINIMAL.replace(
            "limits = { delta = 0.01, min = -3.0, bot = -2.0, top = 9.0, max = 10.0 }",
            "",
        );
        let err = Config::from_toml(&text).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("no limits"));
    }

    #[test]
    fn rejects_too_few_walkers() {
        let text = MINIMAL.replace("walkers = 8", "walkers = 4");
        let err = Config::from_toml(&text).unwrap_err();
        assert!(err.message().contains("mcmc.walkers"));
    }

    #[test]
    fn rejects_unknown_linked_label() {
        let text = format!("{MINIMAL}\n[sampling]\nlinked = [\"nope\"]\n");
        let err = Config::from_toml(&text).unwrap_err();
        assert!(err.message().contains("sampling.linked"));
    }
}

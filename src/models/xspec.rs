//! XSPEC driver.
//!
//! XSPEC is treated as an opaque executable: we write a batch script, run
//! `<binary> - <script>` inside a work directory and read back the QDP table that
//! `wdata` wrote. Nothing about the spectral physics is computed here.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::{Config, FakeitConfig, XspecConfig};
use crate::domain::{ObservedSpectrum, ParamSpec, ParameterSpace, Spectrum};
use crate::error::AppError;
use crate::models::{QdpTable, SpectralModel, parse_qdp, smooth};

/// What the script plots (and therefore what `wdata` writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotKind {
    Model,
    Data,
}

impl PlotKind {
    fn command(self) -> &'static str {
        match self {
            PlotKind::Model => "plot model",
            PlotKind::Data => "plot data",
        }
    }
}

/// How XSPEC gets an energy grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `dummyrsp lo hi bins log`
    Dummy { lo: f64, hi: f64, bins: usize },
    /// Fake a folded spectrum through a real response.
    Fakeit { fakeit: FakeitConfig, output: PathBuf },
}

/// A rendered XSPEC batch script.
#[derive(Debug, Clone, PartialEq)]
pub struct XspecScript {
    lines: Vec<String>,
}

impl XspecScript {
    /// Build a script that loads the model, applies limits, freezes, links and the
    /// given physical values, then dumps `kind` to `qdp`.
    pub fn build(
        expression: &str,
        params: &[ParamSpec],
        xspec: &XspecConfig,
        values: &[(usize, f64)],
        response: &Response,
        kind: PlotKind,
        qdp: &Path,
    ) -> Self {
        let mut lines = vec!["query yes".to_string(), "chatter 0".to_string()];
        if let Some(abund) = &xspec.abund {
            lines.push(format!("abund {abund}"));
        }
        if let Some(xsect) = &xspec.xsect {
            lines.push(format!("xsect {xsect}"));
        }
        if let Response::Dummy { lo, hi, bins } = response {
            lines.push(format!("dummyrsp {lo} {hi} {bins} log"));
        }

        lines.push(format!("model {expression} & /*"));

        for p in params {
            match (p.limits, p.value) {
                (Some(l), value) => {
                    let v = value.unwrap_or(l.bot).clamp(l.min, l.max);
                    lines.push(format!(
                        "newpar {} {} {} {} {} {} {}",
                        p.index, fmt_num(v), fmt_num(l.delta), fmt_num(l.min), fmt_num(l.bot), fmt_num(l.top), fmt_num(l.max)
                    ));
                }
                (None, Some(v)) if p.link.is_none() => {
                    lines.push(format!("newpar {} {}", p.index, fmt_num(v)));
                }
                _ => {}
            }
        }
        for p in params.iter().filter(|p| p.link.is_none()) {
            let verb = if p.frozen { "freeze" } else { "thaw" };
            lines.push(format!("{verb} {}", p.index));
        }
        for p in params {
            if let Some(link) = &p.link {
                lines.push(format!("newpar {} = {link}", p.index));
            }
        }
        for &(index, v) in values {
            lines.push(format!("newpar {index} {}", fmt_num(v)));
        }

        if let Response::Fakeit { fakeit, output } = response {
            let arf = fakeit
                .arf
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string());
            lines.push(format!(
                "fakeit none & {} & {arf} & y & & {} & {}",
                fakeit.response.display(),
                output.display(),
                fmt_num(fakeit.exposure)
            ));
            for range in &fakeit.ignore {
                lines.push(format!("ignore {range}"));
            }
        }

        lines.push("cpd /null".to_string());
        lines.push("setplot energy".to_string());
        lines.push(format!("setplot command wdata {}", qdp.display()));
        lines.push(kind.command().to_string());
        lines.push("exit".to_string());

        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{line}");
        }
        out
    }
}

/// Shortest round-trippable representation (`1`, `0.25`, `1e24`).
fn fmt_num(v: f64) -> String {
    if v != 0.0 && (v.abs() >= 1e6 || v.abs() < 1e-4) {
        format!("{v:e}")
    } else {
        format!("{v}")
    }
}

const SCRIPT_FILE: &str = "run.xcm";
const QDP_FILE: &str = "out.qdp";
/// Fake spectrum written by `fakeit` when generating folded models.
const FAKE_FILE: &str = "model.fak";

/// Runs XSPEC scripts in a work directory.
#[derive(Debug, Clone)]
pub struct XspecRunner {
    pub binary: String,
    pub work_dir: PathBuf,
}

impl XspecRunner {
    pub fn new(binary: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Per-thread work directory, so concurrent XSPEC processes never share files.
    pub fn worker_dir(&self) -> PathBuf {
        match rayon::current_thread_index() {
            Some(i) => self.work_dir.join(format!("worker_{i:02}")),
            None => self.work_dir.join("main"),
        }
    }

    /// Write the script to `dir/run.xcm`, execute it and parse `dir/out.qdp`.
    pub fn run(&self, dir: &Path, build: impl FnOnce(&Path) -> XspecScript) -> Result<QdpTable, AppError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            AppError::new(5, format!("Failed to create XSPEC work dir '{}': {e}", dir.display()))
        })?;

        let qdp = dir.join(QDP_FILE);
        if qdp.exists() {
            std::fs::remove_file(&qdp).map_err(|e| {
                AppError::new(5, format!("Failed to remove stale '{}': {e}", qdp.display()))
            })?;
        }
        // XSPEC runs inside `dir`, so the script refers to files by bare name.
        let script = build(Path::new(QDP_FILE));
        let script_path = dir.join(SCRIPT_FILE);
        std::fs::write(&script_path, script.render()).map_err(|e| {
            AppError::new(5, format!("Failed to write XSPEC script '{}': {e}", script_path.display()))
        })?;

        let output = Command::new(&self.binary)
            .arg("-")
            .arg(SCRIPT_FILE)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| AppError::new(5, format!("Failed to launch XSPEC '{}': {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::new(
                5,
                format!("XSPEC exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        debug!(dir = %dir.display(), "xspec finished");

        let text = std::fs::read_to_string(&qdp).map_err(|e| {
            AppError::new(5, format!("XSPEC produced no plot data '{}': {e}", qdp.display()))
        })?;
        parse_qdp(&text)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, AppError> {
    std::path::absolute(path)
        .map_err(|e| AppError::new(2, format!("Invalid path '{}': {e}", path.display())))
}

/// The configured XSPEC model as a [`SpectralModel`].
#[derive(Debug, Clone)]
pub struct XspecModel {
    pub expression: String,
    pub params: Vec<ParamSpec>,
    pub xspec: XspecConfig,
    pub space: ParameterSpace,
    pub runner: XspecRunner,
}

impl XspecModel {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let binary = std::env::var("XSPEC_BIN").unwrap_or_else(|_| config.xspec.binary.clone());
        Ok(Self {
            expression: config.model.expression.clone(),
            params: config.resolved_parameters(),
            xspec: config.xspec.clone(),
            space: config.parameter_space()?,
            runner: XspecRunner::new(binary, config.paths.work.clone()),
        })
    }

    /// `fakeit` through the configured response when set, else `dummyrsp`.
    fn response(&self, fak: &Path) -> Response {
        match &self.xspec.fakeit {
            Some(fakeit) => Response::Fakeit {
                fakeit: fakeit.clone(),
                output: fak.to_path_buf(),
            },
            None => Response::Dummy {
                lo: self.xspec.energy_min,
                hi: self.xspec.energy_max,
                bins: self.xspec.bins,
            },
        }
    }

    fn plot_kind(&self) -> PlotKind {
        if self.xspec.fakeit.is_some() { PlotKind::Data } else { PlotKind::Model }
    }

    /// Script preview for a parameter row (no process is started).
    pub fn script_for(&self, row: &[f64], qdp: &Path) -> XspecScript {
        XspecScript::build(
            &self.expression,
            &self.params,
            &self.xspec,
            &self.space.to_physical(row),
            &self.response(Path::new(FAKE_FILE)),
            self.plot_kind(),
            qdp,
        )
    }

    /// Fake a folded spectrum through the configured response.
    ///
    /// Returns the fake data and the folded model on the same channels.
    pub fn fake_data(&self, row: &[f64], output: &Path) -> Result<(ObservedSpectrum, Spectrum), AppError> {
        let mut fakeit = self
            .xspec
            .fakeit
            .clone()
            .ok_or_else(|| AppError::new(2, "xspec.fakeit is not configured."))?;
        // XSPEC runs inside the worker dir; every path handed to it must be absolute.
        fakeit.response = absolute(&fakeit.response)?;
        fakeit.arf = fakeit.arf.as_deref().map(absolute).transpose()?;
        let output = absolute(output)?;
        if output.exists() {
            // fakeit refuses to overwrite without an extra prompt.
            std::fs::remove_file(&output).map_err(|e| {
                AppError::new(5, format!("Failed to remove '{}': {e}", output.display()))
            })?;
        }
        let response = Response::Fakeit {
            fakeit,
            output,
        };
        let values = self.space.to_physical(row);
        let table = self.runner.run(&self.runner.worker_dir(), |qdp| {
            XspecScript::build(&self.expression, &self.params, &self.xspec, &values, &response, PlotKind::Data, qdp)
        })?;
        table.folded()
    }
}

impl SpectralModel for XspecModel {
    fn label(&self) -> String {
        format!("xspec:{}", self.expression)
    }

    fn evaluate(&self, params: &[f64]) -> Result<Spectrum, AppError> {
        if params.len() != self.space.len() {
            return Err(AppError::new(
                2,
                format!("Expected {} parameters, got {}.", self.space.len(), params.len()),
            ));
        }
        let dir = self.runner.worker_dir();
        let raw = if self.xspec.fakeit.is_some() {
            self.fake_data(params, &dir.join(FAKE_FILE))?.1
        } else {
            self.runner.run(&dir, |qdp| self.script_for(params, qdp))?.model_spectrum()?
        };
        let spectrum = smooth(&raw, self.xspec.smooth);
        if spectrum.is_empty() || !spectrum.is_finite() {
            warn!(?params, "xspec returned a non-finite spectrum");
            return Err(AppError::new(5, "XSPEC returned a non-finite or empty spectrum."));
        }
        Ok(spectrum)
    }
}

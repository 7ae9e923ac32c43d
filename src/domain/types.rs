//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory while sampling, training and fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons
//!
//! Parameter values come in two flavours:
//!
//! - **physical** values, exactly what XSPEC receives via `newpar`
//! - **sampling-space** values, where parameters flagged `log` are stored as `log10(value)`
//!
//! Everything downstream of XSPEC (samples, datasets, the emulator, MCMC walkers)
//! works in sampling space.

use serde::{Deserialize, Serialize};

/// XSPEC parameter limits in `newpar` order: `delta, min, bot, top, max`.
///
/// `bot`/`top` are the soft limits and define the sampling range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamLimits {
    pub delta: f64,
    pub min: f64,
    pub bot: f64,
    pub top: f64,
    pub max: f64,
}

/// One parameter of the XSPEC model expression, as configured by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// 1-based XSPEC parameter number.
    pub index: usize,
    pub component: String,
    pub name: String,
    /// Fixed value sent with `newpar` (frozen or default-overriding parameters).
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub limits: Option<ParamLimits>,
    #[serde(default)]
    pub frozen: bool,
    /// XSPEC link expression, e.g. `p11` or `COSD(5)`.
    #[serde(default)]
    pub link: Option<String>,
    /// Sample (and emulate, and fit) this parameter as `log10(value)`.
    #[serde(default)]
    pub log: bool,
    /// Prior bounds for MCMC, in sampling space. Defaults to the sampling bounds.
    #[serde(default)]
    pub prior: Option<[f64; 2]>,
}

impl ParamSpec {
    /// A parameter is free when it is neither frozen nor linked.
    pub fn is_free(&self) -> bool {
        !self.frozen && self.link.is_none()
    }

    /// `component.name`, or `log10(component.name)` for log-sampled parameters.
    pub fn label(&self) -> String {
        let base = format!("{}.{}", self.component, self.name);
        if self.log { format!("log10({base})") } else { base }
    }
}

/// A free parameter with its bounds resolved into sampling space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeParam {
    pub index: usize,
    pub label: String,
    pub log: bool,
    pub lower: f64,
    pub upper: f64,
    pub prior: [f64; 2],
}

/// Ordered list of free parameters.
///
/// The order defines the column order of samples, datasets, emulator inputs and
/// MCMC parameter vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub params: Vec<FreeParam>,
}

impl ParameterSpace {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.params.iter().map(|p| p.label.clone()).collect()
    }

    pub fn lower(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.lower).collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.upper).collect()
    }

    /// Sampling bounds as `(lower, upper)` vectors.
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (self.lower(), self.upper())
    }

    pub fn prior_bounds(&self) -> Vec<[f64; 2]> {
        self.params.iter().map(|p| p.prior).collect()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.params.iter().position(|p| p.label == label)
    }

    /// Convert one sampling-space value of column `col` to its physical value.
    pub fn physical_value(&self, col: usize, value: f64) -> f64 {
        match self.params.get(col) {
            Some(p) if p.log => 10f64.powf(value),
            _ => value,
        }
    }

    /// Convert a sampling-space row to `(xspec index, physical value)` pairs.
    pub fn to_physical(&self, row: &[f64]) -> Vec<(usize, f64)> {
        self.params
            .iter()
            .zip(row.iter())
            .map(|(p, &v)| (p.index, if p.log { 10f64.powf(v) } else { v }))
            .collect()
    }

    /// True if every coordinate lies inside its prior bounds (inclusive).
    pub fn contains(&self, row: &[f64]) -> bool {
        row.len() == self.params.len()
            && self
                .params
                .iter()
                .zip(row.iter())
                .all(|(p, &v)| v.is_finite() && v >= p.prior[0] && v <= p.prior[1])
    }

    /// Midpoint of every prior interval (a neutral starting guess).
    pub fn prior_midpoint(&self) -> Vec<f64> {
        self.params
            .iter()
            .map(|p| 0.5 * (p.prior[0] + p.prior[1]))
            .collect()
    }
}

/// A model spectrum on an energy grid (keV).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub energy: Vec<f64>,
    pub flux: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.energy.iter().chain(self.flux.iter()).all(|v| v.is_finite())
    }
}

/// A generated model: the sampled parameters plus the spectrum XSPEC produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub names: Vec<String>,
    pub values: Vec<f64>,
    pub spectrum: Spectrum,
}

/// Observed (or simulated) spectrum with 1-sigma uncertainties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedSpectrum {
    pub energy: Vec<f64>,
    pub energy_err: Vec<f64>,
    pub y: Vec<f64>,
    pub yerr: Vec<f64>,
}

impl ObservedSpectrum {
    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }
}

/// Energy range and flux range of a spectrum collection (for summaries and plots).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumStats {
    pub n_bins: usize,
    pub energy_min: f64,
    pub energy_max: f64,
    pub flux_min: f64,
    pub flux_max: f64,
}

impl SpectrumStats {
    pub fn of(energy: &[f64], flux: &[f64]) -> Option<Self> {
        let (energy_min, energy_max) = finite_range(energy)?;
        let (flux_min, flux_max) = finite_range(flux)?;
        Some(Self {
            n_bins: energy.len(),
            energy_min,
            energy_max,
            flux_min,
            flux_max,
        })
    }
}

fn finite_range(values: &[f64]) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo.is_finite() && hi.is_finite()).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(index: usize, log: bool) -> FreeParam {
        FreeParam {
            index,
            label: format!("p{index}"),
            log,
            lower: -1.0,
            upper: 1.0,
            prior: [-1.0, 1.0],
        }
    }

    #[test]
    fn labels_distinguish_components_and_log() {
        let spec = ParamSpec {
            index: 19,
            component: "diskbb".to_string(),
            name: "norm".to_string(),
            value: None,
            limits: None,
            frozen: false,
            link: None,
            log: true,
            prior: None,
        };
        assert_eq!(spec.label(), "log10(diskbb.norm)");
        assert!(spec.is_free());

        let linked = ParamSpec { link: Some("p11".to_string()), ..spec };
        assert!(!linked.is_free());
    }

    #[test]
    fn to_physical_undoes_log10() {
        let space = ParameterSpace {
            params: vec![param(1, true), param(5, false)],
        };
        let phys = space.to_physical(&[2.0, 0.5]);
        assert_eq!(phys[0].0, 1);
        assert!((phys[0].1 - 100.0).abs() < 1e-9);
        assert_eq!(phys[1], (5, 0.5));
    }

    #[test]
    fn prior_check_is_inclusive() {
        let space = ParameterSpace {
            params: vec![param(1, false), param(2, false)],
        };
        assert!(space.contains(&[-1.0, 1.0]));
        assert!(!space.contains(&[-1.1, 0.0]));
        assert!(!space.contains(&[f64::NAN, 0.0]));
        assert!(!space.contains(&[0.0]));
    }
}

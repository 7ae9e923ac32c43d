//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - XSPEC parameter specifications (`ParamSpec`, `ParamLimits`)
//! - the free-parameter space the pipeline samples and fits (`ParameterSpace`)
//! - spectra (`Spectrum`, `ObservedSpectrum`) and generated models (`ModelRecord`)

pub mod types;

pub use types::*;

//! Visualization.
//!
//! - `ascii`: quick terminal view of a spectrum against a model
//! - `svg`: `plotters` figures for models, training, evaluation and chains

pub mod ascii;
pub mod svg;

pub use ascii::*;
pub use svg::*;

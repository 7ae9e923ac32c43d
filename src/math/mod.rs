//! Numerical utilities: interpolation, descriptive statistics, least squares,
//! derivative-free minimisation and autocorrelation analysis.

pub mod autocorr;
pub mod interp;
pub mod ols;
pub mod optimize;
pub mod stats;

pub use autocorr::*;
pub use interp::*;
pub use ols::*;
pub use optimize::*;
pub use stats::*;

//! Posterior sampling of observed spectra.
//!
//! - box prior and Gaussian likelihood with fractional model error, plus the
//!   Nelder–Mead maximum-likelihood start (`posterior`)
//! - affine-invariant ensemble sampler with stretch and DE moves (`ensemble`)
//! - walker history (`chain`)
//! - autocorrelation, burn-in/thinning and percentile summaries (`analysis`)

pub mod analysis;
pub mod chain;
pub mod ensemble;
pub mod posterior;

pub use analysis::*;
pub use chain::*;
pub use ensemble::*;
pub use posterior::*;

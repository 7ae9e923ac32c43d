//! Forward spectral models.
//!
//! A model maps a parameter row (sampling space) to a spectrum. Two implementations
//! exist: the XSPEC driver (ground truth, slow) and the neural emulator in
//! [`crate::nn`] (fast, used inside MCMC).

pub mod model;
pub mod qdp;
pub mod xspec;

pub use model::*;
pub use qdp::*;
pub use xspec::*;

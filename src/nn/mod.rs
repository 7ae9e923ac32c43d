//! Dense neural emulator of the XSPEC model, written on `nalgebra`.
//!
//! - layers with forward/backward passes (`layers`)
//! - the sequential network and its JSON record (`network`)
//! - MSLE loss and regression metrics (`loss`)
//! - Adam with gradient clipping (`optim`)
//! - training, early stopping, k-fold cross-validation (`trainer`)
//! - the trained network as a [`crate::models::SpectralModel`] (`emulator`)

pub mod emulator;
pub mod layers;
pub mod loss;
pub mod network;
pub mod optim;
pub mod trainer;

pub use emulator::*;
pub use loss::*;
pub use network::*;
pub use optim::*;
pub use trainer::*;

//! Turning generated models into a training set.
//!
//! - read and validate the IPAC model files (`preprocess`)
//! - min–max scaling with the fitted ranges persisted for inference (`scaler`)
//! - k-fold cross-validation splits (`kfold`)

pub mod kfold;
pub mod preprocess;
pub mod scaler;

pub use kfold::*;
pub use preprocess::*;
pub use scaler::*;

//! Input/output helpers.
//!
//! - generated models as IPAC tables (`ipac`)
//! - parameter samples as CSV (`samples`)
//! - observed spectra as CSV (`observed`)
//! - generation resume points (`checkpoint`)
//! - JSON artifacts (`json`)
//! - MCMC chains as CSV (`chain`)

pub mod chain;
pub mod checkpoint;
pub mod ipac;
pub mod json;
pub mod observed;
pub mod samples;

pub use chain::*;
pub use checkpoint::*;
pub use ipac::*;
pub use json::*;
pub use observed::*;
pub use samples::*;

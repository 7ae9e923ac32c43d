//! `xrefl` library crate.
//!
//! The binary (`xrefl`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the pipeline steps can be driven from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod io;
pub mod logging;
pub mod math;
pub mod mcmc;
pub mod models;
pub mod nn;
pub mod plot;
pub mod report;
pub mod sampling;
pub mod simulate;

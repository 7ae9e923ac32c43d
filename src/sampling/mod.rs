//! Training-set design: Latin hypercube samples over the free parameters,
//! conditional redraw rules, and splitting into chunks for parallel generation.

pub mod lhs;
pub mod rules;
pub mod split;

pub use lhs::*;
pub use rules::*;
pub use split::*;

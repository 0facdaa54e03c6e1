//! Learned source terms for colnet
//!
//! Concrete implementations of the traits in `colnet-core`:
//!
//! - [`nn`]: an MLP function approximator and the batch normalisation of the drivers
//! - [`scaler`]: per-field standardisation
//! - [`rhs`]: the learned source term combining the above
//! - [`persistence`]: saving and restoring trained steppers

pub mod nn;
pub mod persistence;
pub mod rhs;
pub mod scaler;

pub use persistence::{LearnedStepper, SavedStepper};
pub use rhs::{RhsConfig, SourceTermModel};

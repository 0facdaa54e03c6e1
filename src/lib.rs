//! colnet: forced single-column stepping with learned, constrained source terms
//!
//! This crate bundles the workspace members behind a single dependency and, with the
//! `python` feature, builds the `colnet._lib` extension module.
//!
//! - [`core`]: column containers, constraint projection, moisture correction, diagnostics
//!   and the [`ForcedStepper`]
//! - [`components`]: the learned source term and model persistence

pub use colnet_components as components;
pub use colnet_core as core;

pub use colnet_components::{LearnedStepper, RhsConfig, SavedStepper, SourceTermModel};
pub use colnet_core::column::{ColumnState, Fields, Trajectory, Weights};
pub use colnet_core::errors::{ColnetError, ColnetResult};
pub use colnet_core::forcing::{ForcingSeries, ForcingSlice};
pub use colnet_core::run::{column_run, run_columns, ColumnDataset, ColumnRunOutput};
pub use colnet_core::stepper::{ForcedStepper, StepperConfig};

#[cfg(feature = "python")]
mod python;

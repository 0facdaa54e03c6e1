//! Core types and time stepping for forced single-column models.
//!
//! A column is advanced through a window of large-scale forcing by an explicit
//! sub-stepping integrator ([`stepper::ForcedStepper`]) which evaluates a learned
//! source term every sub-step, keeps moisture positive without changing the column
//! integral ([`moisture::fix_moisture`]) and accumulates budget diagnostics
//! ([`diagnostics`]).
//!
//! The learned pieces (scalers, function approximators) are only described here as traits;
//! concrete implementations live in `colnet-components`.

pub mod column;
pub mod constants;
pub mod constraint;
pub mod diagnostics;
pub mod errors;
pub mod forcing;
pub mod integrate;
pub mod moisture;
pub mod run;
pub mod scaler;
pub mod source;
pub mod stepper;

/// Floating point type used for every physical quantity
pub type FloatValue = f64;

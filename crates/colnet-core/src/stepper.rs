//! Forced time stepping
//!
//! [`ForcedStepper`] advances a column through a window of `W` snapshots. Each interval
//! between snapshots (length `h` days) is split into `nsteps` explicit Euler sub-steps of
//! length $\Delta t = h / n$. Every sub-step
//!
//! 1. optionally applies the large-scale forcing increment,
//! 2. evaluates the source term and advances every prognostic field,
//! 3. floors total water without changing its column integral, and
//! 4. accumulates the budget diagnostics with weight $1/n$.
//!
//! Only the first snapshot of the window is used as the initial condition; the rest of
//! the window defines how many steps are taken.

use crate::column::{ColumnState, Trajectory, Weights};
use crate::constants::{DEFAULT_MOISTURE_FLOOR, FIELD_QT, PROGNOSTIC_FIELDS};
use crate::diagnostics::{compute_diagnostics, BudgetTerms, DiagnosticsAccumulator};
use crate::errors::{ColnetError, ColnetResult};
use crate::forcing::{ForcingSeries, ForcingSlice};
use crate::moisture::{count_deficient, fix_moisture};
use crate::source::SourceTerm;
use crate::FloatValue;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Time stepping options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    /// Interval between consecutive snapshots of a window
    /// unit: day
    pub h: FloatValue,
    /// Number of Euler sub-steps per interval
    pub nsteps: usize,
    /// Apply the large-scale forcing tendencies before the source term on every sub-step
    ///
    /// Disabled by default; the learned source term is then responsible for the full
    /// tendency and the large-scale budget terms are zero.
    pub apply_large_scale_forcing: bool,
    /// Floor applied to total water after every sub-step
    /// unit: g / kg
    pub moisture_floor: FloatValue,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            h: 0.125,
            nsteps: 1,
            apply_large_scale_forcing: false,
            moisture_floor: DEFAULT_MOISTURE_FLOOR,
        }
    }
}

impl StepperConfig {
    pub fn validate(&self) -> ColnetResult<()> {
        if !(self.h.is_finite() && self.h > 0.0) {
            return Err(ColnetError::InvalidParameters(format!(
                "step size h must be positive and finite, got {}",
                self.h
            )));
        }
        if self.nsteps == 0 {
            return Err(ColnetError::InvalidParameters(
                "nsteps must be at least 1".to_string(),
            ));
        }
        if !self.moisture_floor.is_finite() {
            return Err(ColnetError::InvalidParameters(format!(
                "moisture floor must be finite, got {}",
                self.moisture_floor
            )));
        }
        Ok(())
    }

    /// Length of a single sub-step
    /// unit: day
    pub fn sub_step(&self) -> FloatValue {
        self.h / self.nsteps as FloatValue
    }
}

/// Result of integrating a window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutput {
    /// One state per snapshot, starting with the initial condition
    pub trajectory: Trajectory,
    /// One budget per full step (one fewer than the trajectory)
    pub diagnostics: Vec<BudgetTerms>,
}

/// Explicit sub-stepping integrator driven by a source term
#[derive(Debug, Clone)]
pub struct ForcedStepper<S> {
    rhs: S,
    config: StepperConfig,
}

impl<S: SourceTerm> ForcedStepper<S> {
    /// Create a stepper with default options for everything except `h` and `nsteps`
    pub fn new(rhs: S, h: FloatValue, nsteps: usize) -> Self {
        Self {
            rhs,
            config: StepperConfig {
                h,
                nsteps,
                ..StepperConfig::default()
            },
        }
    }

    pub fn from_config(rhs: S, config: StepperConfig) -> ColnetResult<Self> {
        config.validate()?;
        Ok(Self { rhs, config })
    }

    pub fn with_large_scale_forcing(mut self, apply: bool) -> Self {
        self.config.apply_large_scale_forcing = apply;
        self
    }

    pub fn with_moisture_floor(mut self, eps: FloatValue) -> Self {
        self.config.moisture_floor = eps;
        self
    }

    pub fn with_nsteps(mut self, nsteps: usize) -> Self {
        self.config.nsteps = nsteps;
        self
    }

    pub fn rhs(&self) -> &S {
        &self.rhs
    }

    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    pub fn h(&self) -> FloatValue {
        self.config.h
    }

    pub fn nsteps(&self) -> usize {
        self.config.nsteps
    }

    /// Check that a window can be integrated without touching any state
    ///
    /// Every shape problem is reported here so that a run never stops half way through
    /// with a partially written trajectory.
    pub fn validate_window(
        &self,
        window: &Trajectory,
        forcing: &ForcingSeries,
        w: &Weights,
    ) -> ColnetResult<()> {
        self.config.validate()?;

        let initial = window
            .first()
            .ok_or_else(|| ColnetError::shape("prognostic window", 1, 0))?;
        let levels = w.levels();

        for name in PROGNOSTIC_FIELDS {
            initial.get(name)?;
        }
        let unknown = initial
            .names()
            .find(|name| !PROGNOSTIC_FIELDS.iter().any(|field| field == name));
        if let Some(name) = unknown {
            return Err(ColnetError::InvalidParameters(format!(
                "{name} is not a prognostic field (expected {})",
                PROGNOSTIC_FIELDS.join(", ")
            )));
        }
        for state in window.iter() {
            state.check_levels(levels, "prognostic")?;
        }

        let transitions = window.len() - 1;
        if forcing.len() < transitions {
            return Err(ColnetError::shape(
                "forcing time axis",
                transitions,
                forcing.len(),
            ));
        }
        for i in 1..window.len() {
            let slice = forcing.for_transition(i)?;
            for name in initial.names() {
                let values = slice.tendencies.get(name)?;
                if values.len() != levels {
                    return Err(ColnetError::shape(
                        format!("forcing field {name}"),
                        levels,
                        values.len(),
                    ));
                }
            }
        }

        initial.check_finite("initial condition")
    }

    /// Advance `prog` by one full step of `nsteps` sub-steps
    ///
    /// Returns the new state and the sub-step averaged budget.
    pub fn step(
        &self,
        prog: &ColumnState,
        forcing: &ForcingSlice,
        w: &Weights,
    ) -> ColnetResult<(ColumnState, BudgetTerms)> {
        let dt = self.config.sub_step();
        let weight = 1.0 / self.config.nsteps as FloatValue;

        let mut prog = prog.clone();
        let mut accumulator = DiagnosticsAccumulator::new();
        for _ in 0..self.config.nsteps {
            let (next, terms) = self.sub_step(&prog, forcing, w, dt)?;
            accumulator = accumulator.accumulate(&terms, weight);
            prog = next;
        }
        Ok((prog, accumulator.finish()))
    }

    fn sub_step(
        &self,
        prog0: &ColumnState,
        forcing: &ForcingSlice,
        w: &Weights,
        dt: FloatValue,
    ) -> ColnetResult<(ColumnState, BudgetTerms)> {
        let prog1 = if self.config.apply_large_scale_forcing {
            prog0.euler_step(&forcing.tendencies, dt)?
        } else {
            prog0.clone()
        };

        let src = self.rhs.tendency(&prog1, forcing, w)?;
        src.check_finite("source term tendency")?;

        let stepped = prog1.euler_step(&src, dt)?;
        let qt = stepped.get(FIELD_QT)?;
        let eps = self.config.moisture_floor;
        let n_deficient = count_deficient(qt.view(), eps);
        if n_deficient > 0 {
            warn!("Flooring {} levels of {} at {:e}", n_deficient, FIELD_QT, eps);
        }
        let prog2 = stepped.replace(FIELD_QT, fix_moisture(qt.view(), w, eps))?;
        prog2.check_finite("integrated state")?;

        let floored = prog2.get(FIELD_QT)?;
        if floored.iter().any(|&v| v < 0.0) {
            return Err(ColnetError::NumericValidity {
                field: FIELD_QT.to_string(),
                context: "floored state (column water below the floor deficit)".to_string(),
            });
        }
        let n_below = count_deficient(floored.view(), eps);
        if n_below > 0 {
            warn!(
                "{} levels of {} remain below {:e} after flooring",
                n_below, FIELD_QT, eps
            );
        }

        let terms = compute_diagnostics(prog0, &prog1, &prog2, forcing, w, dt)?;
        Ok((prog2, terms))
    }

    /// Integrate a window of snapshots
    ///
    /// The initial condition is the first snapshot of `window`. Transition `i` (from
    /// snapshot `i - 1` to `i`) uses the forcing at absolute index `i - 1`.
    ///
    /// # Errors
    ///
    /// - [`ColnetError::ShapeMismatch`] / [`ColnetError::MissingField`] before any step is
    ///   taken if the window, forcing and weights disagree
    /// - [`ColnetError::NumericValidity`] as soon as a tendency or state becomes non-finite
    /// - [`ColnetError::DegenerateConstraint`] from the source term
    pub fn integrate(
        &self,
        window: &Trajectory,
        forcing: &ForcingSeries,
        w: &Weights,
    ) -> ColnetResult<WindowOutput> {
        self.validate_window(window, forcing, w)?;

        let window_size = window.len();
        let mut prog = window
            .first()
            .cloned()
            .ok_or_else(|| ColnetError::shape("prognostic window", 1, 0))?;

        let mut trajectory = Trajectory::with_capacity(window_size);
        let mut diagnostics = Vec::with_capacity(window_size.saturating_sub(1));
        trajectory.push(prog.clone());

        for i in 1..window_size {
            let slice = forcing.for_transition(i)?;
            let (next, budget) = self.step(&prog, slice, w).map_err(|e| {
                warn!("Integration failed at step {} of {}: {}", i, window_size - 1, e);
                e
            })?;
            debug!(
                "Step {}: QNN={:.4e} SNN={:.4e} PREC={:.4}",
                i, budget.qnn, budget.snn, budget.prec
            );

            trajectory.push(next.clone());
            diagnostics.push(budget);
            prog = next;
        }

        info!(
            "Integrated {} steps with {} sub-steps of {} days",
            window_size - 1,
            self.config.nsteps,
            self.config.sub_step()
        );
        Ok(WindowOutput {
            trajectory,
            diagnostics,
        })
    }
}

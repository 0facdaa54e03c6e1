//! Linear constraint projection
//!
//! Enforces a single linear constraint on a column tendency $x$:
//!
//! $$ F(x) = \sum_k a_k x_k \;\{=, \geq, \leq\}\; b $$
//!
//! where $a$ are the functional weights (typically level masses, possibly rescaled) and
//! $b$ is the target. When the constraint is violated the tendency is moved along a
//! correction basis $v$,
//!
//! $$ x' = x + \alpha v, \qquad \alpha = \frac{b - F(x)}{F(v)} $$
//!
//! so that $F(x') = b$ exactly. With a uniform basis this is a vertically uniform shift
//! of the profile, which keeps the vertical structure of the tendency intact. Applying a
//! one-sided constraint this way (rather than clipping levels) keeps the column budget
//! consistent.

use crate::errors::{ColnetError, ColnetResult};
use crate::FloatValue;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// How the functional value is compared with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintMode {
    /// $F(x) = b$
    Equality,
    /// $F(x) \geq b$
    AtLeast,
    /// $F(x) \leq b$
    AtMost,
}

impl ConstraintMode {
    /// Whether `value` already satisfies the constraint against `target`
    pub fn is_satisfied(&self, value: FloatValue, target: FloatValue) -> bool {
        match self {
            ConstraintMode::Equality => value == target,
            ConstraintMode::AtLeast => value >= target,
            ConstraintMode::AtMost => value <= target,
        }
    }

    pub fn is_inequality(&self) -> bool {
        !matches!(self, ConstraintMode::Equality)
    }
}

/// Direction along which a violating tendency is corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionBasis {
    /// Shift every level by the same amount
    #[default]
    Uniform,
    /// Shift along the functional weights (the Euclidean minimum-norm correction)
    Functional,
}

/// Projects tendencies onto a linear constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintProjector {
    pub mode: ConstraintMode,
    #[serde(default)]
    pub basis: CorrectionBasis,
}

impl ConstraintProjector {
    pub fn new(mode: ConstraintMode) -> Self {
        Self {
            mode,
            basis: CorrectionBasis::default(),
        }
    }

    pub fn with_basis(self, basis: CorrectionBasis) -> Self {
        Self {
            mode: self.mode,
            basis,
        }
    }

    /// Move `raw` along the correction basis until it satisfies the constraint
    ///
    /// The correction $\alpha v$ is the smallest one along $v$. It is the Euclidean
    /// minimum-norm correction over all directions only for [`CorrectionBasis::Functional`];
    /// the default uniform basis instead preserves the vertical structure of `raw`.
    ///
    /// For inequality modes a feasible `raw` is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`ColnetError::ShapeMismatch`] if `functional_weights` and `raw` differ in length
    /// - [`ColnetError::DegenerateConstraint`] if the functional of the correction basis is
    ///   zero (or not finite), in which case no correction along the basis can reach the
    ///   target
    pub fn project(
        &self,
        functional_weights: ArrayView1<FloatValue>,
        target: FloatValue,
        raw: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>> {
        if functional_weights.len() != raw.len() {
            return Err(ColnetError::shape(
                "constraint functional weights",
                raw.len(),
                functional_weights.len(),
            ));
        }

        let value = functional_weights.dot(&raw);
        if self.mode.is_satisfied(value, target) {
            return Ok(raw.to_owned());
        }

        let basis = match self.basis {
            CorrectionBasis::Uniform => Array1::ones(raw.len()),
            CorrectionBasis::Functional => functional_weights.to_owned(),
        };
        let basis_integral = functional_weights.dot(&basis);
        if basis_integral == 0.0 || !basis_integral.is_finite() {
            return Err(ColnetError::DegenerateConstraint { basis_integral });
        }

        let alpha = (target - value) / basis_integral;
        Ok(&raw + &(basis * alpha))
    }
}

/// Project `raw` onto the constraint using a uniform correction basis
///
/// Shorthand for [`ConstraintProjector::project`].
pub fn project(
    functional_weights: ArrayView1<FloatValue>,
    target: FloatValue,
    raw: ArrayView1<FloatValue>,
    mode: ConstraintMode,
) -> ColnetResult<Array1<FloatValue>> {
    ConstraintProjector::new(mode).project(functional_weights, target, raw)
}

//! Source terms
//!
//! The stepper only needs something which produces a tendency for the current state and
//! forcing ([`SourceTerm`]). The learned source term is built from an opaque
//! [`FunctionApproximator`]: a map between fixed-size vectors with declared sizes, which
//! may be a neural network, a linear model, a lookup table or a call into a separate
//! inference engine.

use crate::column::{ColumnState, Tendency, Weights};
use crate::constants::GRAMS_PER_KILOGRAM;
use crate::constraint::{ConstraintMode, ConstraintProjector, CorrectionBasis};
use crate::errors::ColnetResult;
use crate::forcing::ForcingSlice;
use crate::FloatValue;
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, ArrayView1};
use std::fmt::Debug;

/// Named numeric parameters (weights, biases, statistics) of a model
pub type ParameterState = IndexMap<String, ArrayD<FloatValue>>;

/// Produces tendencies for the prognostic fields of a column
pub trait SourceTerm: Send + Sync {
    /// Tendency of every prognostic field in `state`
    ///
    /// unit: field unit per day
    fn tendency(
        &self,
        state: &ColumnState,
        forcing: &ForcingSlice,
        weights: &Weights,
    ) -> ColnetResult<Tendency>;
}

impl<T: SourceTerm + ?Sized> SourceTerm for Box<T> {
    fn tendency(
        &self,
        state: &ColumnState,
        forcing: &ForcingSlice,
        weights: &Weights,
    ) -> ColnetResult<Tendency> {
        (**self).tendency(state, forcing, weights)
    }
}

/// Function mapping a fixed-size input vector to a fixed-size output vector
#[typetag::serde(tag = "type")]
pub trait FunctionApproximator: Debug + Send + Sync {
    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize;

    fn evaluate(&self, input: ArrayView1<FloatValue>) -> ColnetResult<Array1<FloatValue>>;

    /// Numeric parameters keyed by name relative to the approximator
    ///
    /// Approximators without trainable parameters return an empty state.
    fn parameters(&self) -> ParameterState {
        ParameterState::new()
    }
}

/// Constrain a total water tendency so that implied precipitation is non-negative
///
/// Column water can only be lost to precipitation, so the column-integrated moisture
/// tendency may not exceed the evaporative supply:
///
/// $$ -\frac{1}{1000}\sum_k w_k f_k \geq -E, \qquad E = \frac{LHF \cdot 86400}{L_v} $$
///
/// `fqt` is in g / kg / day, `lhf` in W / m^2 and `w` in kg / m^2; both sides are then
/// in mm / day. A violating tendency is shifted uniformly in the vertical
/// ([`CorrectionBasis::Uniform`]).
pub fn enforce_precipitation_positive(
    fqt: ArrayView1<FloatValue>,
    lhf: FloatValue,
    w: &Weights,
) -> ColnetResult<Array1<FloatValue>> {
    let functional = w.view().mapv(|wk| -wk / GRAMS_PER_KILOGRAM);
    let target = -crate::constants::evaporation(lhf);
    ConstraintProjector::new(ConstraintMode::AtLeast)
        .with_basis(CorrectionBasis::Uniform)
        .project(functional.view(), target, fqt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::water_path;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn moistening_beyond_evaporation_is_removed() {
        let w = Weights::new(array![1000.0, 2000.0]).unwrap();
        // E = 1 mm/day
        let lhf = crate::constants::LATENT_HEAT_VAPORIZATION / 86400.0;
        let fqt = array![2.0, 2.0];

        let fixed = enforce_precipitation_positive(fqt.view(), lhf, &w).unwrap();
        assert!(is_close!(water_path(fixed.view(), &w), 1.0));
        // vertically uniform shift
        assert!(is_close!(fqt[0] - fixed[0], fqt[1] - fixed[1]));
    }

    #[test]
    fn drying_tendency_is_untouched() {
        let w = Weights::new(array![1000.0, 2000.0]).unwrap();
        let fqt = array![-1.0, 0.1];
        let fixed = enforce_precipitation_positive(fqt.view(), 50.0, &w).unwrap();
        assert_eq!(fixed, fqt);
    }
}

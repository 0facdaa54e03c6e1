//! Mass-weighted column integrals
//!
//! Two integrals are used and they differ in units, so they are kept apart:
//!
//! - [`mass_integrate`]: $\sum_k w_k x_k$. For a field in g / kg this gives g / m^2.
//!   Used by the budget diagnostics and the moisture floor correction.
//! - [`water_path`]: $\sum_k w_k x_k / 1000$. For a field in g / kg this gives
//!   kg / m^2 (equivalently mm of water). Used wherever a column of moisture is compared
//!   with a surface flux, such as the precipitation constraint.

use crate::column::Weights;
use crate::constants::GRAMS_PER_KILOGRAM;
use crate::FloatValue;
use ndarray::ArrayView1;

/// Mass-weighted column sum
///
/// `x` and `w` are expected to have the same length; callers validate shapes at the
/// entry of a run.
pub fn mass_integrate(x: ArrayView1<FloatValue>, w: &Weights) -> FloatValue {
    debug_assert_eq!(x.len(), w.levels());
    x.dot(&w.view())
}

/// Column integral of a g / kg field expressed in kg / m^2
pub fn water_path(x: ArrayView1<FloatValue>, w: &Weights) -> FloatValue {
    mass_integrate(x, w) / GRAMS_PER_KILOGRAM
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn integrals_differ_by_unit_conversion() {
        let w = Weights::new(array![100.0, 200.0]).unwrap();
        let q = array![-0.5, 2.0];

        assert!(is_close!(mass_integrate(q.view(), &w), 350.0));
        assert!(is_close!(water_path(q.view(), &w), 0.35));
    }
}

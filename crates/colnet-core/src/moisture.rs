//! Mass-conserving moisture floor
//!
//! Explicit steps can drive total water below zero at individual levels. Rather than
//! clipping (which would create water), deficient levels are set to a small floor
//! $\epsilon$ and the remaining levels are scaled by
//!
//! $$ \alpha = \frac{Q - D}{V} $$
//!
//! where $Q = \sum_k w_k q_k$ is the column total, $D = \epsilon \sum_{k \in d} w_k$ the
//! water needed to raise the deficient levels $d$ to the floor and
//! $V = \sum_{k \notin d} w_k q_k$ the water held in the valid levels. The column total is
//! unchanged by construction.
//!
//! Every level ends at or above $\epsilon$ only if $\alpha q_k \geq \epsilon$ for every
//! valid level. Otherwise:
//!
//! - if $D \leq Q < D + V$ then $0 \leq \alpha < 1$, and a valid level close to the floor can be
//!   scaled below it
//! - if $Q < D$ then $\alpha < 0$, and the valid levels become negative

use crate::column::Weights;
use crate::integrate::mass_integrate;
use crate::FloatValue;
use ndarray::{Array1, ArrayView1, Zip};

/// Raise deficient levels to `eps` and rescale the others to conserve column water
///
/// The result is at least `eps` everywhere only when every rescaled level stays above the
/// floor (see the module docs); callers must check this.
///
/// If every level is below the floor (an all-dry column) `V` is zero and the result is
/// NaN. This is not guarded here; the stepper reports it as a numeric validity failure.
pub fn fix_moisture(
    q: ArrayView1<FloatValue>,
    w: &Weights,
    eps: FloatValue,
) -> Array1<FloatValue> {
    let deficient = q.mapv(|v| if v < eps { 1.0 } else { 0.0 });
    let valid = deficient.mapv(|d| 1.0 - d);

    let total_moisture = mass_integrate(q, w);
    let moisture_lack = mass_integrate(deficient.view(), w) * eps;
    let moisture_valid = mass_integrate((&valid * &q).view(), w);
    let alpha = (total_moisture - moisture_lack) / moisture_valid;

    // Blend rather than branch so that a NaN `alpha` poisons the whole column
    let mut out = Array1::zeros(q.len());
    Zip::from(&mut out)
        .and(&q)
        .and(&deficient)
        .for_each(|o, &v, &d| *o = d * eps + (1.0 - d) * v * alpha);
    out
}

/// Number of levels which would be raised to the floor
pub fn count_deficient(q: ArrayView1<FloatValue>, eps: FloatValue) -> usize {
    q.iter().filter(|&&v| v < eps).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MOISTURE_FLOOR;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn two_level_redistribution() {
        let w = Weights::new(array![100.0, 200.0]).unwrap();
        let q = array![-0.5, 2.0];

        let fixed = fix_moisture(q.view(), &w, DEFAULT_MOISTURE_FLOOR);

        let alpha = (350.0 - 100.0 * 1e-9) / 400.0;
        assert!(is_close!(alpha, 0.875));
        assert_eq!(fixed[0], 1e-9);
        assert!(is_close!(fixed[1], 2.0 * alpha));
        assert!(is_close!(fixed[1], 1.75));
        assert!(is_close!(mass_integrate(fixed.view(), &w), 350.0));
    }

    #[test]
    fn positive_profile_is_unchanged() {
        let w = Weights::new(array![1.0, 2.0, 3.0]).unwrap();
        let q = array![3.0, 2.0, 1.0];
        let fixed = fix_moisture(q.view(), &w, DEFAULT_MOISTURE_FLOOR);
        for (a, b) in fixed.iter().zip(q.iter()) {
            assert!(is_close!(*a, *b));
        }
        assert_eq!(count_deficient(q.view(), DEFAULT_MOISTURE_FLOOR), 0);
    }

    #[test]
    fn valid_level_near_floor_can_drop_below_it() {
        let w = Weights::new(array![1.0, 1.0, 1.0]).unwrap();
        let eps = DEFAULT_MOISTURE_FLOOR;
        let q = array![-1.0, 1e-9, 10.0];

        let fixed = fix_moisture(q.view(), &w, eps);

        assert_eq!(fixed[0], eps);
        assert!(fixed[1] > 0.0 && fixed[1] < eps);
        assert!(is_close!(fixed[2], 9.0 * 10.0 / (10.0 + 1e-9)));
        assert!(is_close!(mass_integrate(fixed.view(), &w), 9.0 + 1e-9));
        assert_eq!(count_deficient(fixed.view(), eps), 1);
    }

    #[test]
    fn column_below_deficit_goes_negative() {
        let w = Weights::new(array![1.0, 1.0]).unwrap();
        let q = array![-10.0, 1.0];

        let fixed = fix_moisture(q.view(), &w, DEFAULT_MOISTURE_FLOOR);

        assert_eq!(fixed[0], DEFAULT_MOISTURE_FLOOR);
        assert!(is_close!(fixed[1], -9.0 - DEFAULT_MOISTURE_FLOOR));
        assert!(is_close!(mass_integrate(fixed.view(), &w), -9.0));
    }

    #[test]
    fn all_dry_column_is_nan() {
        let w = Weights::new(array![1.0, 1.0]).unwrap();
        let q = array![-1.0, -2.0];
        let fixed = fix_moisture(q.view(), &w, DEFAULT_MOISTURE_FLOOR);
        assert_eq!(count_deficient(q.view(), DEFAULT_MOISTURE_FLOOR), 2);
        assert!(fixed.iter().all(|v| v.is_nan()));
    }
}

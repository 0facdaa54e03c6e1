//! Column budget diagnostics
//!
//! Each sub-step is split into three snapshots: the state before the step ($x_0$), after
//! the large-scale forcing increment ($x_1$) and after the learned source term and the
//! moisture correction ($x_2$). With $M(x) = \sum_k w_k x_k$ and sub-step length
//! $\Delta t$ (days) the budget terms are
//!
//! $$ Q_{LSF} = \frac{M(q_1) - M(q_0)}{\Delta t \cdot 86400 \cdot 1000^2}, \qquad
//!    Q_{NN} = \frac{M(q_2) - M(q_1)}{\Delta t \cdot 86400 \cdot 1000^2} $$
//!
//! $$ S_{LSF} = c_p \frac{M(s_1) - M(s_0)}{\Delta t \cdot 86400}, \qquad
//!    S_{NN} = c_p \frac{M(s_2) - M(s_1)}{\Delta t \cdot 86400} $$
//!
//! and the precipitation implied by the moisture budget (mm / day)
//!
//! $$ P = E - \frac{W(q_2) - W(q_1)}{\Delta t} $$
//!
//! where $W$ is the column water path.
//!
//! Budgets are averaged over the sub-steps of a full step with a
//! [`DiagnosticsAccumulator`].

use crate::column::{ColumnState, Weights};
use crate::constants::{CP, FIELD_QT, FIELD_SL, GRAMS_PER_KILOGRAM, SECONDS_PER_DAY};
use crate::errors::ColnetResult;
use crate::forcing::ForcingSlice;
use crate::integrate::{mass_integrate, water_path};
use crate::FloatValue;
use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Budget terms for one sub-step or, once averaged, one full step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetTerms {
    /// Moisture tendency from large-scale forcing
    #[serde(rename = "QLSF")]
    pub qlsf: FloatValue,
    /// Moisture tendency from the learned source term
    #[serde(rename = "QNN")]
    pub qnn: FloatValue,
    /// Energy tendency from large-scale forcing
    /// unit: W / m^2
    #[serde(rename = "SLSF")]
    pub slsf: FloatValue,
    /// Energy tendency from the learned source term
    /// unit: W / m^2
    #[serde(rename = "SNN")]
    pub snn: FloatValue,
    /// Precipitation implied by the moisture budget
    /// unit: mm / day
    #[serde(rename = "PREC")]
    pub prec: FloatValue,
}

impl BudgetTerms {
    pub const NAMES: [&'static str; 5] = ["QLSF", "QNN", "SLSF", "SNN", "PREC"];

    pub fn get(&self, name: &str) -> Option<FloatValue> {
        match name {
            "QLSF" => Some(self.qlsf),
            "QNN" => Some(self.qnn),
            "SLSF" => Some(self.slsf),
            "SNN" => Some(self.snn),
            "PREC" => Some(self.prec),
            _ => None,
        }
    }

    pub fn values(&self) -> [FloatValue; 5] {
        [self.qlsf, self.qnn, self.slsf, self.snn, self.prec]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, FloatValue)> {
        Self::NAMES.into_iter().zip(self.values())
    }

    /// `self + weight * other`
    pub fn add_scaled(self, other: &BudgetTerms, weight: FloatValue) -> Self {
        Self {
            qlsf: self.qlsf + weight * other.qlsf,
            qnn: self.qnn + weight * other.qnn,
            slsf: self.slsf + weight * other.slsf,
            snn: self.snn + weight * other.snn,
            prec: self.prec + weight * other.prec,
        }
    }
}

/// Budget terms of a single sub-step
///
/// `start`, `after_forcing` and `after_source` are the three snapshots of the sub-step and
/// `dt` its length in days.
pub fn compute_diagnostics(
    start: &ColumnState,
    after_forcing: &ColumnState,
    after_source: &ColumnState,
    forcing: &ForcingSlice,
    w: &Weights,
    dt: FloatValue,
) -> ColnetResult<BudgetTerms> {
    let q = |state: &ColumnState| -> ColnetResult<FloatValue> {
        Ok(mass_integrate(state.get(FIELD_QT)?.view(), w))
    };
    let s = |state: &ColumnState| -> ColnetResult<FloatValue> {
        Ok(mass_integrate(state.get(FIELD_SL)?.view(), w))
    };
    let (q_start, q_lsf, q_nn) = (q(start)?, q(after_forcing)?, q(after_source)?);
    let (s_start, s_lsf, s_nn) = (s(start)?, s(after_forcing)?, s(after_source)?);

    let moisture_scale = dt * SECONDS_PER_DAY * GRAMS_PER_KILOGRAM.powi(2);
    let energy_scale = dt * SECONDS_PER_DAY;

    let water_change = water_path(after_source.get(FIELD_QT)?.view(), w)
        - water_path(after_forcing.get(FIELD_QT)?.view(), w);

    Ok(BudgetTerms {
        qlsf: (q_lsf - q_start) / moisture_scale,
        qnn: (q_nn - q_lsf) / moisture_scale,
        slsf: CP * (s_lsf - s_start) / energy_scale,
        snn: CP * (s_nn - s_lsf) / energy_scale,
        prec: forcing.evaporation() - water_change / dt,
    })
}

/// Weighted running sum of budget terms
///
/// The accumulator is a plain value threaded through the sub-step loop; a fresh one is
/// started for every full step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiagnosticsAccumulator {
    sum: BudgetTerms,
    total_weight: FloatValue,
    count: usize,
}

impl DiagnosticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight * terms` to the running sum
    pub fn accumulate(self, terms: &BudgetTerms, weight: FloatValue) -> Self {
        Self {
            sum: self.sum.add_scaled(terms, weight),
            total_weight: self.total_weight + weight,
            count: self.count + 1,
        }
    }

    /// Number of sub-steps accumulated so far
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_weight(&self) -> FloatValue {
        self.total_weight
    }

    /// The accumulated budget
    ///
    /// With weights of `1 / nsteps` over `nsteps` sub-steps this is the sub-step mean.
    pub fn finish(self) -> BudgetTerms {
        self.sum
    }
}

/// Convert per-step budgets into one time series per budget term
pub fn budget_series(budgets: &[BudgetTerms]) -> IndexMap<String, Array1<FloatValue>> {
    BudgetTerms::NAMES
        .iter()
        .map(|&name| {
            let values = budgets
                .iter()
                .map(|b| b.get(name).unwrap_or(FloatValue::NAN))
                .collect::<Array1<_>>();
            (name.to_string(), values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Fields;
    use crate::constants::LATENT_HEAT_VAPORIZATION;
    use is_close::is_close;
    use ndarray::array;

    fn column(sl: [FloatValue; 2], qt: [FloatValue; 2]) -> ColumnState {
        Fields::new()
            .with_field(FIELD_SL, Array1::from(sl.to_vec()))
            .with_field(FIELD_QT, Array1::from(qt.to_vec()))
    }

    fn forcing(lhf: FloatValue) -> ForcingSlice {
        ForcingSlice::new(Fields::new(), 0.0, lhf, 0.0)
    }

    #[test]
    fn source_term_budget() {
        let w = Weights::new(array![1000.0, 1000.0]).unwrap();
        let x0 = column([300.0, 300.0], [10.0, 10.0]);
        let x2 = column([301.0, 300.0], [9.0, 10.0]);
        let dt = 0.5;

        let diags = compute_diagnostics(&x0, &x0, &x2, &forcing(0.0), &w, dt).unwrap();

        assert_eq!(diags.qlsf, 0.0);
        assert_eq!(diags.slsf, 0.0);
        // M(q2) - M(q1) = -1000 g/m^2
        assert!(is_close!(diags.qnn, -1000.0 / (dt * 86400.0 * 1e6)));
        assert!(is_close!(diags.snn, 1004.0 * 1000.0 / (dt * 86400.0)));
        // 1 kg/m^2 lost over half a day
        assert!(is_close!(diags.prec, 2.0));
    }

    #[test]
    fn forcing_budget_is_separated() {
        let w = Weights::new(array![500.0, 1500.0]).unwrap();
        let x0 = column([300.0, 300.0], [10.0, 10.0]);
        let x1 = column([300.0, 302.0], [11.0, 10.0]);
        let dt = 1.0;
        let lhf = LATENT_HEAT_VAPORIZATION / 86400.0;

        let diags = compute_diagnostics(&x0, &x1, &x1, &forcing(lhf), &w, dt).unwrap();
        assert!(is_close!(diags.qlsf, 500.0 / (86400.0 * 1e6)));
        assert!(is_close!(diags.slsf, 1004.0 * 3000.0 / 86400.0));
        assert_eq!(diags.qnn, 0.0);
        assert_eq!(diags.snn, 0.0);
        // Without any change in column water all evaporation rains out
        assert!(is_close!(diags.prec, 1.0));
    }

    #[test]
    fn missing_fields_are_reported() {
        let w = Weights::new(array![1.0]).unwrap();
        let x = Fields::new().with_field(FIELD_QT, array![1.0]);
        assert!(compute_diagnostics(&x, &x, &x, &forcing(0.0), &w, 1.0).is_err());
    }

    #[test]
    fn accumulator_averages_sub_steps() {
        let a = BudgetTerms {
            qlsf: 1.0,
            qnn: 2.0,
            slsf: 3.0,
            snn: 4.0,
            prec: 5.0,
        };
        let b = BudgetTerms {
            qlsf: 3.0,
            qnn: 4.0,
            slsf: 5.0,
            snn: 6.0,
            prec: 7.0,
        };

        let acc = DiagnosticsAccumulator::new()
            .accumulate(&a, 0.5)
            .accumulate(&b, 0.5);
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.total_weight(), 1.0);

        let mean = acc.finish();
        assert_eq!(mean.values(), [2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn series_has_one_entry_per_step() {
        let budgets = vec![BudgetTerms::default(); 3];
        let series = budget_series(&budgets);
        assert_eq!(series.len(), BudgetTerms::NAMES.len());
        assert!(series.values().all(|v| v.len() == 3));
        assert_eq!(series.keys().next().unwrap(), "QLSF");
    }
}

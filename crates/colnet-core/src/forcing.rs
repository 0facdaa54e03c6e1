//! Large-scale forcing
//!
//! Forcing is supplied externally for every time index of a run. Each slice carries the
//! large-scale tendencies of the prognostic fields and the scalar surface/top-of-atmosphere
//! drivers used by the learned source term.

use crate::column::Fields;
use crate::constants::{evaporation, DRIVER_LHF, DRIVER_SHF, DRIVER_SOLIN};
use crate::errors::{ColnetError, ColnetResult};
use crate::FloatValue;
use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Forcing for a single time index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcingSlice {
    /// Large-scale tendencies with the same keys as the prognostic state
    pub tendencies: Fields,
    /// Sensible heat flux
    /// unit: W / m^2
    #[serde(rename = "SHF")]
    pub shf: FloatValue,
    /// Latent heat flux
    /// unit: W / m^2
    #[serde(rename = "LHF")]
    pub lhf: FloatValue,
    /// Insolation at the top of the atmosphere
    /// unit: W / m^2
    #[serde(rename = "SOLIN")]
    pub solin: FloatValue,
}

impl ForcingSlice {
    pub fn new(tendencies: Fields, shf: FloatValue, lhf: FloatValue, solin: FloatValue) -> Self {
        Self {
            tendencies,
            shf,
            lhf,
            solin,
        }
    }

    /// Look up a scalar driver by its conventional name
    pub fn driver(&self, name: &str) -> ColnetResult<FloatValue> {
        match name {
            DRIVER_SHF => Ok(self.shf),
            DRIVER_LHF => Ok(self.lhf),
            DRIVER_SOLIN => Ok(self.solin),
            _ => Err(ColnetError::MissingField(name.to_string())),
        }
    }

    /// Surface evaporation implied by the latent heat flux
    /// unit: mm / day
    pub fn evaporation(&self) -> FloatValue {
        evaporation(self.lhf)
    }
}

/// Forcing for every time index of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForcingSeries {
    slices: Vec<ForcingSlice>,
}

impl ForcingSeries {
    pub fn new(slices: Vec<ForcingSlice>) -> Self {
        Self { slices }
    }

    /// Build a series from `time x level` tendencies and per-time drivers
    pub fn from_arrays(
        tendencies: &IndexMap<String, Array2<FloatValue>>,
        shf: &Array1<FloatValue>,
        lhf: &Array1<FloatValue>,
        solin: &Array1<FloatValue>,
    ) -> ColnetResult<Self> {
        let n_times = shf.len();
        for (name, len) in [(DRIVER_LHF, lhf.len()), (DRIVER_SOLIN, solin.len())] {
            if len != n_times {
                return Err(ColnetError::shape(
                    format!("time axis of {name}"),
                    n_times,
                    len,
                ));
            }
        }
        for (name, values) in tendencies {
            if values.nrows() != n_times {
                return Err(ColnetError::shape(
                    format!("time axis of forcing {name}"),
                    n_times,
                    values.nrows(),
                ));
            }
        }

        let slices = (0..n_times)
            .map(|t| {
                let fields = tendencies
                    .iter()
                    .map(|(name, values)| (name.clone(), values.row(t).to_owned()))
                    .collect();
                ForcingSlice::new(fields, shf[t], lhf[t], solin[t])
            })
            .collect();
        Ok(Self { slices })
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn push(&mut self, slice: ForcingSlice) {
        self.slices.push(slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForcingSlice> {
        self.slices.iter()
    }

    /// Forcing at an absolute time index
    pub fn get(&self, index: usize) -> ColnetResult<&ForcingSlice> {
        self.slices
            .get(index)
            .ok_or_else(|| ColnetError::shape("forcing time axis", index + 1, self.len()))
    }

    /// Forcing applied over the transition from snapshot `i - 1` to snapshot `i`
    ///
    /// The forcing valid at the start of the interval is used.
    pub fn for_transition(&self, i: usize) -> ColnetResult<&ForcingSlice> {
        if i == 0 {
            return Err(ColnetError::Error(
                "Transition indices start at 1".to_string(),
            ));
        }
        self.get(i - 1)
    }

    /// Replace every slice with the time mean of the series
    ///
    /// Used for radiative-convective equilibrium runs where the forcing is held constant
    /// in time. All slices must carry the same tendency fields and shapes.
    pub fn time_homogeneous(&self) -> ColnetResult<Self> {
        let first = match self.slices.first() {
            Some(first) => first,
            None => return Ok(Self::default()),
        };
        let n = self.len() as FloatValue;

        let mut tendencies = Fields::new();
        for (name, values) in first.tendencies.iter() {
            let mut sum = Array1::zeros(values.len());
            for slice in &self.slices {
                let v = slice.tendencies.get(name)?;
                if v.len() != values.len() {
                    return Err(ColnetError::shape(
                        format!("forcing field {name}"),
                        values.len(),
                        v.len(),
                    ));
                }
                sum = sum + v;
            }
            tendencies.insert(name, sum / n);
        }

        let mean = |f: fn(&ForcingSlice) -> FloatValue| -> FloatValue {
            self.slices.iter().map(f).sum::<FloatValue>() / n
        };
        let slice = ForcingSlice::new(
            tendencies,
            mean(|s| s.shf),
            mean(|s| s.lhf),
            mean(|s| s.solin),
        );

        Ok(Self {
            slices: vec![slice; self.len()],
        })
    }

    /// Per-field `time x level` arrays of the tendencies
    pub fn tendency_series(&self) -> ColnetResult<IndexMap<String, Array2<FloatValue>>> {
        let trajectory: crate::column::Trajectory =
            self.slices.iter().map(|s| s.tendencies.clone()).collect();
        trajectory.to_series()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::array;

    fn series() -> ForcingSeries {
        let mut tendencies = IndexMap::new();
        tendencies.insert("sl".to_string(), array![[1.0, 2.0], [3.0, 4.0]]);
        tendencies.insert("qt".to_string(), array![[0.0, -1.0], [2.0, 1.0]]);
        ForcingSeries::from_arrays(
            &tendencies,
            &array![10.0, 20.0],
            &array![100.0, 200.0],
            &array![0.0, 400.0],
        )
        .unwrap()
    }

    #[test]
    fn slices_follow_time_axis() {
        let forcing = series();
        assert_eq!(forcing.len(), 2);
        let slice = forcing.get(1).unwrap();
        assert_eq!(slice.tendencies.get("sl").unwrap(), &array![3.0, 4.0]);
        assert_eq!(slice.driver("LHF").unwrap(), 200.0);
        assert!(slice.driver("U").is_err());
        assert!(forcing.get(2).is_err());
    }

    #[test]
    fn transition_uses_start_of_interval() {
        let forcing = series();
        assert_eq!(forcing.for_transition(1).unwrap(), forcing.get(0).unwrap());
        assert!(forcing.for_transition(0).is_err());
        assert!(forcing.for_transition(3).is_err());
    }

    #[test]
    fn time_homogeneous_forcing_is_constant() {
        let forcing = series().time_homogeneous().unwrap();
        assert_eq!(forcing.len(), 2);
        for slice in forcing.iter() {
            assert_eq!(slice.tendencies.get("sl").unwrap(), &array![2.0, 3.0]);
            assert_eq!(slice.tendencies.get("qt").unwrap(), &array![1.0, 0.0]);
            assert!(is_close!(slice.shf, 15.0));
            assert!(is_close!(slice.lhf, 150.0));
            assert!(is_close!(slice.solin, 200.0));
        }
    }

    #[test]
    fn mismatched_driver_lengths_are_rejected() {
        let res = ForcingSeries::from_arrays(
            &IndexMap::new(),
            &array![1.0, 2.0],
            &array![1.0],
            &array![1.0, 2.0],
        );
        assert!(matches!(res, Err(ColnetError::ShapeMismatch { .. })));
    }

    #[test]
    fn drivers_serialise_with_conventional_names() {
        let slice = series().get(0).unwrap().clone();
        let value = serde_json::to_value(&slice).unwrap();
        assert_eq!(value["LHF"], 100.0);
        assert_eq!(value["tendencies"]["qt"]["data"][1], -1.0);
    }
}

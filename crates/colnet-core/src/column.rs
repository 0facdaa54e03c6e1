//! Column state containers
//!
//! A column is a vertical stack of `L` levels. Prognostic state, tendencies and forcing
//! tendencies are all [`Fields`]: an ordered mapping from field name to a column vector.
//! [`Weights`] hold the mass of each level and are used for every column integral.

use crate::errors::{ColnetError, ColnetResult};
use crate::FloatValue;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Ordered collection of column profiles keyed by field name
///
/// Used for prognostic state (`sl`, `qt`) as well as for tendencies, which share the
/// same keys. Values are treated as immutable snapshots: stepping produces a new
/// `Fields` rather than mutating the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(IndexMap<String, Array1<FloatValue>>);

/// A prognostic state of a single column
pub type ColumnState = Fields;

/// Rate of change per day of each prognostic field
pub type Tendency = Fields;

impl Fields {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert
    pub fn with_field(mut self, name: impl Into<String>, values: Array1<FloatValue>) -> Self {
        self.0.insert(name.into(), values);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        values: Array1<FloatValue>,
    ) -> Option<Array1<FloatValue>> {
        self.0.insert(name.into(), values)
    }

    /// Get a field, failing with [`ColnetError::MissingField`] if it is absent
    pub fn get(&self, name: &str) -> ColnetResult<&Array1<FloatValue>> {
        self.0
            .get(name)
            .ok_or_else(|| ColnetError::MissingField(name.to_string()))
    }

    pub fn field(&self, name: &str) -> Option<&Array1<FloatValue>> {
        self.0.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array1<FloatValue>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of vertical levels, taken from the first field
    pub fn levels(&self) -> Option<usize> {
        self.0.values().next().map(|v| v.len())
    }

    /// Check that every field has `levels` entries
    pub fn check_levels(&self, levels: usize, what: &str) -> ColnetResult<()> {
        for (name, values) in self.iter() {
            if values.len() != levels {
                return Err(ColnetError::shape(
                    format!("{what} field {name}"),
                    levels,
                    values.len(),
                ));
            }
        }
        Ok(())
    }

    /// Fail with [`ColnetError::NumericValidity`] if any value is NaN or infinite
    pub fn check_finite(&self, context: &str) -> ColnetResult<()> {
        match self
            .iter()
            .find(|(_, values)| values.iter().any(|v| !v.is_finite()))
        {
            Some((name, _)) => Err(ColnetError::NumericValidity {
                field: name.to_string(),
                context: context.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Forward Euler update of every field
    ///
    /// $$ x_{n+1} = x_n + \Delta t \cdot f $$
    ///
    /// Every field of `self` must have a matching field in `tendency`. Fields that only
    /// exist in `tendency` are ignored.
    pub fn euler_step(&self, tendency: &Fields, dt: FloatValue) -> ColnetResult<Fields> {
        self.iter()
            .map(|(name, x)| -> ColnetResult<(String, Array1<FloatValue>)> {
                let f = tendency.get(name)?;
                if f.len() != x.len() {
                    return Err(ColnetError::shape(
                        format!("tendency field {name}"),
                        x.len(),
                        f.len(),
                    ));
                }
                Ok((name.to_string(), x + &(f * dt)))
            })
            .collect()
    }

    /// Copy of this state with one field replaced
    pub fn replace(&self, name: &str, values: Array1<FloatValue>) -> ColnetResult<Fields> {
        if !self.has(name) {
            return Err(ColnetError::MissingField(name.to_string()));
        }
        let mut out = self.clone();
        out.insert(name, values);
        Ok(out)
    }
}

impl FromIterator<(String, Array1<FloatValue>)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Array1<FloatValue>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Fields {
    type Item = (String, Array1<FloatValue>);
    type IntoIter = indexmap::map::IntoIter<String, Array1<FloatValue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Mass of each model level
///
/// unit: kg / m^2
///
/// The weights are fixed for a given vertical grid and are only ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FloatValue>", into = "Vec<FloatValue>")]
pub struct Weights(Array1<FloatValue>);

impl Weights {
    /// Create a new set of weights
    ///
    /// Fails if there are no levels or if any weight is not finite.
    pub fn new(values: Array1<FloatValue>) -> ColnetResult<Self> {
        if values.is_empty() {
            return Err(ColnetError::shape("weights", 1, 0));
        }
        if values.iter().any(|w| !w.is_finite()) {
            return Err(ColnetError::NumericValidity {
                field: "w".to_string(),
                context: "layer mass weights".to_string(),
            });
        }
        Ok(Self(values))
    }

    pub fn levels(&self) -> usize {
        self.0.len()
    }

    pub fn view(&self) -> ArrayView1<'_, FloatValue> {
        self.0.view()
    }

    pub fn as_array(&self) -> &Array1<FloatValue> {
        &self.0
    }

    /// Total mass of the column
    pub fn total(&self) -> FloatValue {
        self.0.sum()
    }
}

impl TryFrom<Vec<FloatValue>> for Weights {
    type Error = ColnetError;

    fn try_from(value: Vec<FloatValue>) -> Result<Self, Self::Error> {
        Weights::new(Array1::from(value))
    }
}

impl From<Weights> for Vec<FloatValue> {
    fn from(value: Weights) -> Self {
        value.0.to_vec()
    }
}

/// Ordered sequence of column states, one per full step
///
/// Only ever appended to while a window is being integrated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    states: Vec<ColumnState>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, state: ColumnState) {
        self.states.push(state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ColumnState> {
        self.states.get(index)
    }

    pub fn first(&self) -> Option<&ColumnState> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&ColumnState> {
        self.states.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnState> {
        self.states.iter()
    }

    pub fn into_states(self) -> Vec<ColumnState> {
        self.states
    }

    /// Build a trajectory from `time x level` arrays, one per field
    pub fn from_series(series: &IndexMap<String, Array2<FloatValue>>) -> ColnetResult<Self> {
        let n_times = match series.values().next() {
            Some(values) => values.nrows(),
            None => return Ok(Self::new()),
        };
        for (name, values) in series {
            if values.nrows() != n_times {
                return Err(ColnetError::shape(
                    format!("time axis of {name}"),
                    n_times,
                    values.nrows(),
                ));
            }
        }

        let states = (0..n_times)
            .map(|t| {
                series
                    .iter()
                    .map(|(name, values)| (name.clone(), values.row(t).to_owned()))
                    .collect()
            })
            .collect();
        Ok(Self { states })
    }

    /// Stack one field over time into a `time x level` array
    pub fn field_series(&self, name: &str) -> ColnetResult<Array2<FloatValue>> {
        let rows = self
            .states
            .iter()
            .map(|state| state.get(name).map(|v| v.view()))
            .collect::<ColnetResult<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        ndarray::stack(Axis(0), &rows).map_err(|e| {
            ColnetError::Error(format!("Could not stack field {name} over time: {e}"))
        })
    }

    /// Convert to `time x level` arrays for every field of the first state
    pub fn to_series(&self) -> ColnetResult<IndexMap<String, Array2<FloatValue>>> {
        let names: Vec<String> = match self.first() {
            Some(state) => state.names().map(|n| n.to_string()).collect(),
            None => return Ok(IndexMap::new()),
        };
        names
            .into_iter()
            .map(|name| -> ColnetResult<(String, Array2<FloatValue>)> {
                let series = self.field_series(&name)?;
                Ok((name, series))
            })
            .collect()
    }
}

impl FromIterator<ColumnState> for Trajectory {
    fn from_iter<T: IntoIterator<Item = ColumnState>>(iter: T) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn state() -> Fields {
        Fields::new()
            .with_field("sl", array![300.0, 310.0])
            .with_field("qt", array![10.0, 2.0])
    }

    #[test]
    fn euler_step_creates_new_state() {
        let x = state();
        let f = Fields::new()
            .with_field("sl", array![1.0, -1.0])
            .with_field("qt", array![-2.0, 0.5]);

        let y = x.euler_step(&f, 0.5).unwrap();
        assert_eq!(y.get("sl").unwrap(), &array![300.5, 309.5]);
        assert_eq!(y.get("qt").unwrap(), &array![9.0, 2.25]);
        // The original is untouched
        assert_eq!(x, state());
    }

    #[test]
    fn euler_step_requires_matching_tendency() {
        let x = state();
        let f = Fields::new().with_field("sl", array![1.0, -1.0]);
        assert!(matches!(
            x.euler_step(&f, 1.0),
            Err(ColnetError::MissingField(name)) if name == "qt"
        ));

        let f = Fields::new()
            .with_field("sl", array![1.0])
            .with_field("qt", array![1.0, 1.0]);
        assert!(matches!(
            x.euler_step(&f, 1.0),
            Err(ColnetError::ShapeMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn check_finite_names_the_field() {
        let x = state().with_field("qt", array![f64::NAN, 1.0]);
        match x.check_finite("test") {
            Err(ColnetError::NumericValidity { field, .. }) => assert_eq!(field, "qt"),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(state().check_finite("test").is_ok());
    }

    #[test]
    fn weights_reject_invalid_values() {
        assert!(Weights::new(array![]).is_err());
        assert!(Weights::new(array![1.0, f64::INFINITY]).is_err());
        let w = Weights::new(array![100.0, 200.0]).unwrap();
        assert_eq!(w.levels(), 2);
        assert_eq!(w.total(), 300.0);
    }

    #[test]
    fn weights_serialise_as_list() {
        let w = Weights::new(array![100.0, 200.0]).unwrap();
        let s = serde_json::to_string(&w).unwrap();
        assert_eq!(s, "[100.0,200.0]");

        let bad: Result<Weights, _> = serde_json::from_str("[]");
        assert!(bad.is_err());
    }

    #[test]
    fn trajectory_series_round_trip() {
        let mut series = IndexMap::new();
        series.insert("sl".to_string(), array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        series.insert("qt".to_string(), array![[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]);

        let trajectory = Trajectory::from_series(&series).unwrap();
        assert_eq!(trajectory.len(), 3);
        assert_eq!(trajectory.get(1).unwrap().get("qt").unwrap(), &array![0.3, 0.4]);
        assert_eq!(trajectory.to_series().unwrap(), series);
    }

    #[test]
    fn trajectory_series_requires_common_time_axis() {
        let mut series = IndexMap::new();
        series.insert("sl".to_string(), array![[1.0, 2.0], [3.0, 4.0]]);
        series.insert("qt".to_string(), array![[0.1, 0.2]]);
        assert!(Trajectory::from_series(&series).is_err());
    }
}

//! Concrete scalers

use colnet_core::errors::{ColnetError, ColnetResult};
use colnet_core::scaler::Scaler;
use colnet_core::FloatValue;
use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Standardises each named field with a per-field mean and scale
///
/// $$ \hat{x} = \frac{x - \mu}{\sigma} $$
///
/// Statistics are either profiles (one value per level) or a single value which is
/// broadcast over every level. Scalar drivers such as `LHF` use the latter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerStatistics")]
pub struct StandardScaler {
    mean: IndexMap<String, Array1<FloatValue>>,
    scale: IndexMap<String, Array1<FloatValue>>,
}

/// Unchecked serialised form of a [`StandardScaler`]
#[derive(Deserialize)]
struct ScalerStatistics {
    mean: IndexMap<String, Array1<FloatValue>>,
    scale: IndexMap<String, Array1<FloatValue>>,
}

impl TryFrom<ScalerStatistics> for StandardScaler {
    type Error = ColnetError;

    fn try_from(value: ScalerStatistics) -> Result<Self, Self::Error> {
        let ScalerStatistics { mean, mut scale } = value;
        let scaler = mean
            .into_iter()
            .try_fold(StandardScaler::new(), |scaler, (name, mean)| {
                let scale = scale
                    .shift_remove(&name)
                    .ok_or_else(|| ColnetError::MissingField(format!("scale of {name}")))?;
                scaler.with_field(name, mean, scale)
            })?;
        match scale.keys().next() {
            Some(name) => Err(ColnetError::MissingField(format!("mean of {name}"))),
            None => Ok(scaler),
        }
    }
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add statistics for a field
    ///
    /// `mean` and `scale` must have the same length and every scale must be non-zero.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        mean: Array1<FloatValue>,
        scale: Array1<FloatValue>,
    ) -> ColnetResult<Self> {
        let name = name.into();
        if mean.len() != scale.len() {
            return Err(ColnetError::shape(
                format!("scale of {name}"),
                mean.len(),
                scale.len(),
            ));
        }
        if scale.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(ColnetError::InvalidParameters(format!(
                "Scale of {name} must be finite and non-zero"
            )));
        }
        self.mean.insert(name.clone(), mean);
        self.scale.insert(name, scale);
        Ok(self)
    }

    /// Convenience for a field with scalar statistics
    pub fn with_scalar_field(
        self,
        name: impl Into<String>,
        mean: FloatValue,
        scale: FloatValue,
    ) -> ColnetResult<Self> {
        self.with_field(name, Array1::from_elem(1, mean), Array1::from_elem(1, scale))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.mean.keys().map(|k| k.as_str())
    }

    fn statistics(
        &self,
        name: &str,
        len: usize,
    ) -> ColnetResult<(&Array1<FloatValue>, &Array1<FloatValue>)> {
        let (mean, scale) = match (self.mean.get(name), self.scale.get(name)) {
            (Some(mean), Some(scale)) => (mean, scale),
            _ => return Err(ColnetError::MissingField(name.to_string())),
        };
        if mean.len() != 1 && mean.len() != len {
            return Err(ColnetError::shape(format!("{name} to scale"), mean.len(), len));
        }
        Ok((mean, scale))
    }
}

#[typetag::serde]
impl Scaler for StandardScaler {
    fn transform(
        &self,
        name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>> {
        let (mean, scale) = self.statistics(name, values.len())?;
        Ok((&values - mean) / scale)
    }

    fn inverse_transform(
        &self,
        name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>> {
        let (mean, scale) = self.statistics(name, values.len())?;
        Ok(&values * scale + mean)
    }
}

/// Leaves every field untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityScaler {}

#[typetag::serde]
impl Scaler for IdentityScaler {
    fn transform(
        &self,
        _name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>> {
        Ok(values.to_owned())
    }

    fn inverse_transform(
        &self,
        _name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>> {
        Ok(values.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colnet_core::column::Fields;
    use is_close::is_close;
    use ndarray::array;

    fn scaler() -> StandardScaler {
        StandardScaler::new()
            .with_field("sl", array![300.0, 320.0], array![10.0, 20.0])
            .unwrap()
            .with_scalar_field("LHF", 100.0, 50.0)
            .unwrap()
    }

    #[test]
    fn profiles_are_standardised_per_level() {
        let y = scaler().transform("sl", array![310.0, 300.0].view()).unwrap();
        assert_eq!(y, array![1.0, -1.0]);

        let x = scaler().inverse_transform("sl", y.view()).unwrap();
        assert_eq!(x, array![310.0, 300.0]);
    }

    #[test]
    fn scalar_statistics_broadcast() {
        let s = scaler();
        assert!(is_close!(s.transform_scalar("LHF", 200.0).unwrap(), 2.0));
        let y = s.transform("LHF", array![0.0, 100.0, 150.0].view()).unwrap();
        assert_eq!(y, array![-2.0, 0.0, 1.0]);
    }

    #[test]
    fn unknown_fields_and_shapes_are_errors() {
        let s = scaler();
        assert!(matches!(
            s.transform("qt", array![1.0].view()),
            Err(ColnetError::MissingField(name)) if name == "qt"
        ));
        assert!(matches!(
            s.transform("sl", array![1.0, 2.0, 3.0].view()),
            Err(ColnetError::ShapeMismatch { .. })
        ));
        assert!(StandardScaler::new()
            .with_scalar_field("SHF", 0.0, 0.0)
            .is_err());
    }

    #[test]
    fn fields_are_transformed_together() {
        let fields = Fields::new().with_field("sl", array![300.0, 340.0]);
        let out = scaler().transform_fields(&fields).unwrap();
        assert_eq!(out.get("sl").unwrap(), &array![0.0, 1.0]);
    }

    /// Serialised scaler with the statistics of `sl` replaced
    fn statistics_json(mean: Array1<f64>, scale: Array1<f64>) -> serde_json::Value {
        let boxed: Box<dyn Scaler> = Box::new(scaler());
        let mut value = serde_json::to_value(&boxed).unwrap();
        value["mean"]["sl"] = serde_json::to_value(mean).unwrap();
        value["scale"]["sl"] = serde_json::to_value(scale).unwrap();
        value
    }

    #[test]
    fn saved_statistics_are_validated() {
        let value = statistics_json(array![300.0, 300.0], array![1.0, 1.0, 1.0]);
        let res: Result<Box<dyn Scaler>, _> = serde_json::from_value(value);
        let message = res.unwrap_err().to_string();
        assert!(message.contains("Shape mismatch for scale of sl"), "{}", message);

        let value = statistics_json(array![300.0, 300.0], array![1.0, 0.0]);
        let res: Result<Box<dyn Scaler>, _> = serde_json::from_value(value);
        assert!(res.unwrap_err().to_string().contains("non-zero"));

        let mut value = statistics_json(array![300.0], array![1.0]);
        value["scale"].as_object_mut().unwrap().remove("sl");
        let res: Result<Box<dyn Scaler>, _> = serde_json::from_value(value);
        assert!(res.unwrap_err().to_string().contains("scale of sl"));

        let mut value = statistics_json(array![300.0], array![1.0]);
        value["mean"].as_object_mut().unwrap().remove("LHF");
        let res: Result<Box<dyn Scaler>, _> = serde_json::from_value(value);
        assert!(res.unwrap_err().to_string().contains("mean of LHF"));

        let value = statistics_json(array![300.0, 310.0], array![2.0, 5.0]);
        let restored: Box<dyn Scaler> = serde_json::from_value(value).unwrap();
        let y = restored.transform("sl", array![302.0, 300.0].view()).unwrap();
        assert_eq!(y, array![1.0, -2.0]);
    }

    #[test]
    fn scalers_serialise_with_type_tag() {
        let boxed: Box<dyn Scaler> = Box::new(scaler());
        let value = serde_json::to_value(&boxed).unwrap();
        assert_eq!(value["type"], "StandardScaler");

        let restored: Box<dyn Scaler> = serde_json::from_value(value).unwrap();
        let y = restored.transform("sl", array![300.0, 320.0].view()).unwrap();
        assert_eq!(y, array![0.0, 0.0]);

        let identity: Box<dyn Scaler> =
            serde_json::from_str(r#"{"type": "IdentityScaler"}"#).unwrap();
        assert_eq!(
            identity.transform("anything", array![1.5].view()).unwrap(),
            array![1.5]
        );
    }
}

//! Normalisation of physical fields
//!
//! Learned source terms are trained on normalised inputs. A [`Scaler`] converts between
//! physical and normalised representations, one named field at a time. Concrete scalers
//! are provided by `colnet-components`.

use crate::column::Fields;
use crate::errors::ColnetResult;
use crate::FloatValue;
use ndarray::{array, Array1, ArrayView1};
use std::fmt::Debug;

/// Forward and inverse normalisation of named fields
#[typetag::serde(tag = "type")]
pub trait Scaler: Debug + Send + Sync {
    /// Physical to normalised values
    fn transform(
        &self,
        name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>>;

    /// Normalised to physical values
    fn inverse_transform(
        &self,
        name: &str,
        values: ArrayView1<FloatValue>,
    ) -> ColnetResult<Array1<FloatValue>>;

    /// Normalise a scalar quantity such as a surface flux
    fn transform_scalar(&self, name: &str, value: FloatValue) -> ColnetResult<FloatValue> {
        Ok(self.transform(name, array![value].view())?[0])
    }

    /// Normalise every field of a collection
    fn transform_fields(&self, fields: &Fields) -> ColnetResult<Fields> {
        fields
            .iter()
            .map(|(name, values)| -> ColnetResult<(String, Array1<FloatValue>)> {
                Ok((name.to_string(), self.transform(name, values.view())?))
            })
            .collect()
    }
}

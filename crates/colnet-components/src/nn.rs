//! Neural network building blocks
//!
//! Inference-only layers for the learned source term. Parameters are plain `ndarray`
//! values so they can be persisted and restored by name (see [`crate::persistence`]).
//!
//! Parameter names follow a sequential layout: the affine layers of an [`Mlp`] are numbered
//! as if every activation also occupied a slot, so the layers of a network with two hidden
//! layers are `0`, `2` and `4`.

use colnet_core::errors::{ColnetError, ColnetResult};
use colnet_core::source::{FunctionApproximator, ParameterState};
use colnet_core::FloatValue;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Dimension, Ix1, Ix2};
use serde::{Deserialize, Serialize};

/// Look up a named parameter and convert it to a fixed dimensionality
fn parameter<D: Dimension>(
    state: &ParameterState,
    name: &str,
) -> ColnetResult<ndarray::Array<FloatValue, D>> {
    let value: &ArrayD<FloatValue> = state
        .get(name)
        .ok_or_else(|| ColnetError::MissingField(name.to_string()))?;
    value.clone().into_dimensionality::<D>().map_err(|e| {
        ColnetError::InvalidParameters(format!("Parameter {name} has the wrong shape: {e}"))
    })
}

/// Layer indices present in `state`, read from the `{k}.bias` names in numeric order
fn layer_indices(state: &ParameterState) -> Vec<usize> {
    let mut indices: Vec<usize> = state
        .keys()
        .filter_map(|key| key.strip_suffix(".bias"))
        .filter_map(|index| index.parse().ok())
        .collect();
    indices.sort_unstable();
    indices
}

/// Affine map `y = W x + b`
///
/// `weight` is stored as `out x in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    weight: Array2<FloatValue>,
    bias: Array1<FloatValue>,
}

impl Linear {
    pub fn new(weight: Array2<FloatValue>, bias: Array1<FloatValue>) -> ColnetResult<Self> {
        if bias.len() != weight.nrows() {
            return Err(ColnetError::shape(
                "linear layer bias",
                weight.nrows(),
                bias.len(),
            ));
        }
        Ok(Self { weight, bias })
    }

    /// A layer which outputs zero for every input
    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Array2::zeros((out_features, in_features)),
            bias: Array1::zeros(out_features),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn weight(&self) -> &Array2<FloatValue> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<FloatValue> {
        &self.bias
    }

    pub fn forward(&self, x: ArrayView1<FloatValue>) -> ColnetResult<Array1<FloatValue>> {
        if x.len() != self.in_features() {
            return Err(ColnetError::shape(
                "linear layer input",
                self.in_features(),
                x.len(),
            ));
        }
        Ok(self.weight.dot(&x) + &self.bias)
    }
}

/// Multilayer perceptron with ReLU activations between the affine layers
///
/// No activation is applied after the final layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Linear>", into = "Vec<Linear>")]
pub struct Mlp {
    layers: Vec<Linear>,
}

impl Mlp {
    pub fn new(layers: Vec<Linear>) -> ColnetResult<Self> {
        if layers.is_empty() {
            return Err(ColnetError::InvalidParameters(
                "An MLP needs at least one layer".to_string(),
            ));
        }
        for pair in layers.windows(2) {
            if pair[0].out_features() != pair[1].in_features() {
                return Err(ColnetError::shape(
                    "MLP layer input",
                    pair[0].out_features(),
                    pair[1].in_features(),
                ));
            }
        }
        Ok(Self { layers })
    }

    /// Zero-initialised network with the given layer sizes
    pub fn zeros(input_size: usize, hidden: &[usize], output_size: usize) -> Self {
        let sizes: Vec<usize> = std::iter::once(input_size)
            .chain(hidden.iter().copied())
            .chain(std::iter::once(output_size))
            .collect();
        let layers = sizes
            .windows(2)
            .map(|pair| Linear::zeros(pair[0], pair[1]))
            .collect();
        Self { layers }
    }

    /// Rebuild a network from `{k}.weight` / `{k}.bias` parameters
    ///
    /// Layer indices are read from the bias names and sorted numerically; gaps left by
    /// activations are expected.
    pub fn from_parameters(state: &ParameterState) -> ColnetResult<Self> {
        let layers = layer_indices(state)
            .into_iter()
            .map(|k| -> ColnetResult<Linear> {
                let weight = parameter::<Ix2>(state, &format!("{k}.weight"))?;
                let bias = parameter::<Ix1>(state, &format!("{k}.bias"))?;
                Linear::new(weight, bias)
            })
            .collect::<ColnetResult<Vec<_>>>()?;
        Self::new(layers)
    }

    /// Fill this network's layers with named parameters
    ///
    /// Saved layers are matched to `self.layers()` in index order and must have exactly
    /// the same shapes.
    pub fn load_parameters(self, state: &ParameterState) -> ColnetResult<Self> {
        let indices = layer_indices(state);
        if indices.len() != self.layers.len() {
            return Err(ColnetError::InvalidParameters(format!(
                "Expected {} MLP layers, found {}",
                self.layers.len(),
                indices.len()
            )));
        }

        let layers = self
            .layers
            .iter()
            .zip(indices)
            .map(|(layer, k)| -> ColnetResult<Linear> {
                let weight = parameter::<Ix2>(state, &format!("{k}.weight"))?;
                if weight.nrows() != layer.out_features() {
                    return Err(ColnetError::shape(
                        format!("outputs of layer {k}"),
                        layer.out_features(),
                        weight.nrows(),
                    ));
                }
                if weight.ncols() != layer.in_features() {
                    return Err(ColnetError::shape(
                        format!("inputs of layer {k}"),
                        layer.in_features(),
                        weight.ncols(),
                    ));
                }
                let bias = parameter::<Ix1>(state, &format!("{k}.bias"))?;
                Linear::new(weight, bias)
            })
            .collect::<ColnetResult<Vec<_>>>()?;
        Self::new(layers)
    }

    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    /// Widths of the hidden layers
    pub fn hidden_sizes(&self) -> Vec<usize> {
        let n = self.layers.len();
        self.layers[..n - 1]
            .iter()
            .map(|layer| layer.out_features())
            .collect()
    }
}

impl TryFrom<Vec<Linear>> for Mlp {
    type Error = ColnetError;

    fn try_from(layers: Vec<Linear>) -> Result<Self, Self::Error> {
        Mlp::new(layers)
    }
}

impl From<Mlp> for Vec<Linear> {
    fn from(value: Mlp) -> Self {
        value.layers
    }
}

#[typetag::serde]
impl FunctionApproximator for Mlp {
    fn input_size(&self) -> usize {
        self.layers[0].in_features()
    }

    fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features()
    }

    fn evaluate(&self, input: ArrayView1<FloatValue>) -> ColnetResult<Array1<FloatValue>> {
        let last = self.layers.len() - 1;
        let mut x = input.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x.view())?;
            if i < last {
                x.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(x)
    }

    fn parameters(&self) -> ParameterState {
        let mut state = ParameterState::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let k = 2 * i;
            state.insert(format!("{k}.weight"), layer.weight.clone().into_dyn());
            state.insert(format!("{k}.bias"), layer.bias.clone().into_dyn());
        }
        state
    }
}

/// Per-feature normalisation with fixed running statistics
///
/// $$ y = \frac{x - \mu}{\sqrt{\sigma^2 + \epsilon}} \gamma + \beta $$
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm {
    weight: Array1<FloatValue>,
    bias: Array1<FloatValue>,
    running_mean: Array1<FloatValue>,
    running_var: Array1<FloatValue>,
    #[serde(default = "BatchNorm::default_eps")]
    eps: FloatValue,
}

impl BatchNorm {
    const PARAMETER_NAMES: [&'static str; 4] = ["weight", "bias", "running_mean", "running_var"];

    fn default_eps() -> FloatValue {
        1e-5
    }

    /// Freshly initialised statistics (unit scale, zero shift, zero mean, unit variance)
    pub fn new(features: usize) -> Self {
        Self {
            weight: Array1::ones(features),
            bias: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            eps: Self::default_eps(),
        }
    }

    pub fn from_parameters(state: &ParameterState) -> ColnetResult<Self> {
        let [weight, bias, running_mean, running_var] = Self::PARAMETER_NAMES
            .map(|name| parameter::<Ix1>(state, name));
        let bn = Self {
            weight: weight?,
            bias: bias?,
            running_mean: running_mean?,
            running_var: running_var?,
            eps: Self::default_eps(),
        };
        bn.validate()?;
        Ok(bn)
    }

    fn validate(&self) -> ColnetResult<()> {
        let n = self.features();
        for (name, values) in Self::PARAMETER_NAMES.iter().zip(self.arrays()) {
            if values.len() != n {
                return Err(ColnetError::shape(
                    format!("batch norm {name}"),
                    n,
                    values.len(),
                ));
            }
        }
        if self.running_var.iter().any(|&v| v + self.eps <= 0.0) {
            return Err(ColnetError::InvalidParameters(
                "batch norm running variance must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn arrays(&self) -> [&Array1<FloatValue>; 4] {
        [
            &self.weight,
            &self.bias,
            &self.running_mean,
            &self.running_var,
        ]
    }

    pub fn features(&self) -> usize {
        self.weight.len()
    }

    pub fn forward(&self, x: ArrayView1<FloatValue>) -> ColnetResult<Array1<FloatValue>> {
        if x.len() != self.features() {
            return Err(ColnetError::shape(
                "batch norm input",
                self.features(),
                x.len(),
            ));
        }
        let std = self.running_var.mapv(|v| (v + self.eps).sqrt());
        Ok((&x - &self.running_mean) / std * &self.weight + &self.bias)
    }

    pub fn parameters(&self) -> ParameterState {
        Self::PARAMETER_NAMES
            .iter()
            .zip(self.arrays())
            .map(|(name, values)| (name.to_string(), values.clone().into_dyn()))
            .collect()
    }
}

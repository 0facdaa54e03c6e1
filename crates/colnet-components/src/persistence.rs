//! Saving and restoring trained steppers
//!
//! A stepper is stored as three parts:
//!
//! - `rhs`: the size of the source term (`m`), its options and the scaler
//! - `stepper`: the time stepping options (`h`, `nsteps`, ...)
//! - `state`: every numeric parameter, keyed by name
//!
//! Parameter names are `rhs.mlp.{k}.weight`, `rhs.mlp.{k}.bias` for the affine layers
//! and `rhs.bn.{weight,bias,running_mean,running_var}` for the driver normalisation. The
//! hidden layer sizes are not stored separately; they are recovered from the bias shapes.
//!
//! Saved steppers are written as TOML.

use crate::nn::{BatchNorm, Mlp};
use crate::rhs::{RhsConfig, SourceTermModel};
use colnet_core::errors::{ColnetError, ColnetResult};
use colnet_core::scaler::Scaler;
use colnet_core::source::ParameterState;
use colnet_core::stepper::{ForcedStepper, StepperConfig};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MLP_PREFIX: &str = "rhs.mlp.";
const BATCH_NORM_PREFIX: &str = "rhs.bn.";

/// A stepper driven by the learned source term
pub type LearnedStepper = ForcedStepper<SourceTermModel>;

/// Construction arguments of the source term
#[derive(Debug, Serialize, Deserialize)]
pub struct SavedRhs {
    /// Prognostic values per column (twice the number of levels)
    pub m: usize,
    #[serde(default)]
    pub config: RhsConfig,
    pub scaler: Box<dyn Scaler>,
}

/// Everything needed to reconstruct a [`LearnedStepper`]
#[derive(Debug, Serialize, Deserialize)]
pub struct SavedStepper {
    pub rhs: SavedRhs,
    pub stepper: StepperConfig,
    pub state: ParameterState,
}

/// Parameters whose name starts with `prefix`, with the prefix removed
fn strip_prefix(state: &ParameterState, prefix: &str) -> ParameterState {
    state
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|rest| (rest.to_string(), v.clone())))
        .collect()
}

/// Hidden layer sizes of the source term network
///
/// Layers are identified by their `rhs.mlp.{k}.bias` parameters, ordered by `k`. The
/// size of the last layer is the output size and is not part of the result.
pub fn hidden_from_state(state: &ParameterState) -> ColnetResult<Vec<usize>> {
    let mut sizes: Vec<(usize, usize)> = state
        .iter()
        .filter_map(|(key, value)| {
            let index = key.strip_prefix(MLP_PREFIX)?.strip_suffix(".bias")?;
            Some((index.parse().ok()?, value.len()))
        })
        .collect();
    if sizes.is_empty() {
        return Err(ColnetError::MissingField(format!("{MLP_PREFIX}0.bias")));
    }
    sizes.sort_unstable_by_key(|&(index, _)| index);

    let n = sizes.len();
    Ok(sizes[..n - 1].iter().map(|&(_, size)| size).collect())
}

impl SavedStepper {
    /// Capture a stepper
    pub fn from_stepper(stepper: &LearnedStepper) -> ColnetResult<Self> {
        let rhs = stepper.rhs();
        // Scalers are only reachable as trait objects, so copy through their serialised form
        let scaler = toml::Value::try_from(rhs.scaler())
            .map_err(|e| ColnetError::Serialization(e.to_string()))?;
        let scaler: Box<dyn Scaler> = scaler
            .try_into()
            .map_err(|e| ColnetError::Serialization(e.to_string()))?;

        let state = rhs
            .parameters()
            .into_iter()
            .map(|(k, v)| (format!("rhs.{k}"), v))
            .collect();

        Ok(Self {
            rhs: SavedRhs {
                m: rhs.m(),
                config: rhs.config().clone(),
                scaler,
            },
            stepper: stepper.config().clone(),
            state,
        })
    }

    /// Rebuild the stepper
    ///
    /// # Errors
    ///
    /// - [`ColnetError::MissingField`] if a required parameter is absent
    /// - [`ColnetError::ShapeMismatch`] / [`ColnetError::InvalidParameters`] if the
    ///   parameters are inconsistent with `m` or with each other
    pub fn into_stepper(self) -> ColnetResult<LearnedStepper> {
        let m = self.rhs.m;
        let hidden = hidden_from_state(&self.state)?;
        debug!("Restoring source term with hidden layers {:?}", hidden);

        let input_size = m + self.rhs.config.num_2d_inputs + m;
        let mlp = Mlp::zeros(input_size, &hidden, m)
            .load_parameters(&strip_prefix(&self.state, MLP_PREFIX))?;
        let batch_norm =
            BatchNorm::from_parameters(&strip_prefix(&self.state, BATCH_NORM_PREFIX))?;

        let unused: Vec<&str> = self
            .state
            .keys()
            .filter(|k| !k.starts_with(MLP_PREFIX) && !k.starts_with(BATCH_NORM_PREFIX))
            .map(|k| k.as_str())
            .collect();
        if !unused.is_empty() {
            debug!("Ignoring saved parameters {:?}", unused);
        }

        let rhs = SourceTermModel::new(
            m,
            self.rhs.config,
            self.rhs.scaler,
            batch_norm,
            Box::new(mlp),
        )?;
        ForcedStepper::from_config(rhs, self.stepper)
    }

    pub fn to_toml_string(&self) -> ColnetResult<String> {
        toml::to_string(self).map_err(|e| ColnetError::Serialization(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> ColnetResult<Self> {
        toml::from_str(content).map_err(|e| ColnetError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ColnetResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?)?;
        info!("Saved stepper to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> ColnetResult<Self> {
        let path = path.as_ref();
        info!("Loading stepper from {}", path.display());
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

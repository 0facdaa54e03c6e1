//! Learned source term
//!
//! [`SourceTermModel`] evaluates a [`FunctionApproximator`] on the normalised column state
//! and forcing. For a column of `L` levels and `m = 2L` prognostic values the input is
//!
//! ```text
//! [ sl (L) | qt (L) | BN([SHF, LHF, SOLIN, f_sl (L), f_qt (L)]) ]
//! ```
//!
//! of length `m + num_2d_inputs + m`, where `BN` is a batch normalisation with frozen
//! statistics. The `m` outputs are the tendencies of `sl` (first `L`) and `qt` (last `L`),
//! per day. The moisture tendency is then constrained so that the implied precipitation
//! is non-negative.

use crate::nn::{BatchNorm, Mlp};
use colnet_core::column::{ColumnState, Fields, Tendency, Weights};
use colnet_core::constants::{DRIVER_LHF, DRIVER_SHF, DRIVER_SOLIN, FIELD_QT, FIELD_SL};
use colnet_core::errors::{ColnetError, ColnetResult};
use colnet_core::forcing::ForcingSlice;
use colnet_core::scaler::Scaler;
use colnet_core::source::{
    enforce_precipitation_positive, FunctionApproximator, ParameterState, SourceTerm,
};
use colnet_core::FloatValue;
use ndarray::{concatenate, s, Array1, Axis};
use serde::{Deserialize, Serialize};

/// Options of the learned source term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhsConfig {
    /// Number of scalar drivers in the 2-D input block
    pub num_2d_inputs: usize,
    /// Constrain the moisture tendency so that precipitation is non-negative
    pub precip_positive: bool,
}

impl Default for RhsConfig {
    fn default() -> Self {
        Self {
            num_2d_inputs: 3,
            precip_positive: true,
        }
    }
}

/// Source term evaluated by a learned function approximator
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceTermModel {
    m: usize,
    config: RhsConfig,
    scaler: Box<dyn Scaler>,
    batch_norm: BatchNorm,
    approximator: Box<dyn FunctionApproximator>,
}

impl SourceTermModel {
    /// Assemble a source term from its parts
    ///
    /// `m` is the number of prognostic values per column (twice the number of levels).
    ///
    /// # Errors
    ///
    /// [`ColnetError::ShapeMismatch`] if the approximator or batch norm sizes do not match
    /// `m` and `config.num_2d_inputs`.
    pub fn new(
        m: usize,
        config: RhsConfig,
        scaler: Box<dyn Scaler>,
        batch_norm: BatchNorm,
        approximator: Box<dyn FunctionApproximator>,
    ) -> ColnetResult<Self> {
        if m % 2 != 0 {
            return Err(ColnetError::InvalidParameters(format!(
                "m must be twice the number of levels, got {m}"
            )));
        }
        let n_2d = config.num_2d_inputs + m;
        if batch_norm.features() != n_2d {
            return Err(ColnetError::shape(
                "batch norm features",
                n_2d,
                batch_norm.features(),
            ));
        }
        if approximator.input_size() != m + n_2d {
            return Err(ColnetError::shape(
                "approximator input",
                m + n_2d,
                approximator.input_size(),
            ));
        }
        if approximator.output_size() != m {
            return Err(ColnetError::shape(
                "approximator output",
                m,
                approximator.output_size(),
            ));
        }
        Ok(Self {
            m,
            config,
            scaler,
            batch_norm,
            approximator,
        })
    }

    /// Zero-initialised MLP source term with fresh batch norm statistics
    pub fn with_mlp(
        m: usize,
        hidden: &[usize],
        config: RhsConfig,
        scaler: Box<dyn Scaler>,
    ) -> ColnetResult<Self> {
        let n_2d = config.num_2d_inputs + m;
        let mlp = Mlp::zeros(m + n_2d, hidden, m);
        Self::new(m, config, scaler, BatchNorm::new(n_2d), Box::new(mlp))
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn levels(&self) -> usize {
        self.m / 2
    }

    pub fn config(&self) -> &RhsConfig {
        &self.config
    }

    pub fn scaler(&self) -> &dyn Scaler {
        self.scaler.as_ref()
    }

    pub fn batch_norm(&self) -> &BatchNorm {
        &self.batch_norm
    }

    pub fn approximator(&self) -> &dyn FunctionApproximator {
        self.approximator.as_ref()
    }

    /// Numeric parameters keyed as `mlp.*` and `bn.*`
    pub fn parameters(&self) -> ParameterState {
        let mlp = self
            .approximator
            .parameters()
            .into_iter()
            .map(|(k, v)| (format!("mlp.{k}"), v));
        let bn = self
            .batch_norm
            .parameters()
            .into_iter()
            .map(|(k, v)| (format!("bn.{k}"), v));
        mlp.chain(bn).collect()
    }

    /// Normalised input vector for the approximator
    fn inputs(
        &self,
        state: &ColumnState,
        forcing: &ForcingSlice,
    ) -> ColnetResult<Array1<FloatValue>> {
        let scaler = self.scaler.as_ref();
        let x_sl = scaler.transform(FIELD_SL, state.get(FIELD_SL)?.view())?;
        let x_qt = scaler.transform(FIELD_QT, state.get(FIELD_QT)?.view())?;

        let drivers = [DRIVER_SHF, DRIVER_LHF, DRIVER_SOLIN]
            .iter()
            .map(|&name| -> ColnetResult<FloatValue> {
                scaler.transform_scalar(name, forcing.driver(name)?)
            })
            .collect::<ColnetResult<Array1<FloatValue>>>()?;
        let f_sl = scaler.transform(FIELD_SL, forcing.tendencies.get(FIELD_SL)?.view())?;
        let f_qt = scaler.transform(FIELD_QT, forcing.tendencies.get(FIELD_QT)?.view())?;

        let data_2d = concatenate![Axis(0), drivers, f_sl, f_qt];
        let expected = self.config.num_2d_inputs + self.m;
        if data_2d.len() != expected {
            return Err(ColnetError::shape("2-D inputs", expected, data_2d.len()));
        }
        let data_2d = self.batch_norm.forward(data_2d.view())?;

        Ok(concatenate![Axis(0), x_sl, x_qt, data_2d])
    }
}

impl SourceTerm for SourceTermModel {
    fn tendency(
        &self,
        state: &ColumnState,
        forcing: &ForcingSlice,
        weights: &Weights,
    ) -> ColnetResult<Tendency> {
        let levels = self.levels();
        if weights.levels() != levels {
            return Err(ColnetError::shape("weights", levels, weights.levels()));
        }

        let input = self.inputs(state, forcing)?;
        let output = self.approximator.evaluate(input.view())?;
        if output.len() != self.m {
            return Err(ColnetError::shape("approximator output", self.m, output.len()));
        }

        let fsl = output.slice(s![..levels]).to_owned();
        let mut fqt = output.slice(s![levels..]).to_owned();
        if self.config.precip_positive {
            fqt = enforce_precipitation_positive(fqt.view(), forcing.lhf, weights)?;
        }

        Ok(Fields::new()
            .with_field(FIELD_SL, fsl)
            .with_field(FIELD_QT, fqt))
    }
}

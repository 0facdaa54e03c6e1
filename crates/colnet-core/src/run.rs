//! Whole-column runs
//!
//! Wraps [`ForcedStepper::integrate`] for data held as `time x level` arrays: the
//! prognostic snapshots of a dataset are replaced by the simulated trajectory and the
//! budget diagnostics are added as new time series.

use crate::column::{Trajectory, Weights};
use crate::diagnostics::budget_series;
use crate::errors::ColnetResult;
use crate::forcing::ForcingSeries;
use crate::source::SourceTerm;
use crate::stepper::ForcedStepper;
use crate::FloatValue;
use indexmap::IndexMap;
use log::info;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Prognostic snapshots of a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDataset {
    /// `time x level` array per prognostic field
    pub prognostic: IndexMap<String, Array2<FloatValue>>,
    /// Layer masses
    /// unit: kg / m^2
    pub weights: Weights,
}

impl ColumnDataset {
    pub fn new(prognostic: IndexMap<String, Array2<FloatValue>>, weights: Weights) -> Self {
        Self {
            prognostic,
            weights,
        }
    }

    /// Number of snapshots
    pub fn n_times(&self) -> usize {
        self.prognostic.values().next().map_or(0, |v| v.nrows())
    }

    pub fn window(&self) -> ColnetResult<Trajectory> {
        Trajectory::from_series(&self.prognostic)
    }
}

/// Result of a column run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRunOutput {
    /// Simulated `time x level` array per prognostic field, same length as the input
    pub prognostic: IndexMap<String, Array2<FloatValue>>,
    /// One value per full step for each budget term
    pub diagnostic: IndexMap<String, Array1<FloatValue>>,
    /// Forcing the run was driven with
    pub forcing: ForcingSeries,
    pub weights: Weights,
}

/// Run a stepper over every snapshot of a dataset
///
/// The first snapshot is the initial condition. The forcing must cover every transition.
pub fn column_run<S: SourceTerm>(
    model: &ForcedStepper<S>,
    dataset: &ColumnDataset,
    forcing: &ForcingSeries,
) -> ColnetResult<ColumnRunOutput> {
    let window = dataset.window()?;
    let output = model.integrate(&window, forcing, &dataset.weights)?;

    Ok(ColumnRunOutput {
        prognostic: output.trajectory.to_series()?,
        diagnostic: budget_series(&output.diagnostics),
        forcing: forcing.clone(),
        weights: dataset.weights.clone(),
    })
}

/// Run many independent columns in parallel
///
/// Results are returned in input order. Every column is run even if another fails.
pub fn run_columns<S: SourceTerm>(
    model: &ForcedStepper<S>,
    columns: &[(ColumnDataset, ForcingSeries)],
) -> Vec<ColnetResult<ColumnRunOutput>> {
    info!("Running {} columns", columns.len());
    columns
        .par_iter()
        .map(|(dataset, forcing)| column_run(model, dataset, forcing))
        .collect()
}

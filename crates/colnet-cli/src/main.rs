//! colnet single-column runner
//!
//! Runs a saved stepper over a column dataset and writes the simulated prognostic fields
//! and budget diagnostics as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p colnet-cli -- \
//!   --model stepper.toml \
//!   --inputs column.json \
//!   --forcings forcing.json \
//!   --output run.json
//! ```
//!
//! Input files hold plain nested lists:
//!
//! - inputs: `{"prognostic": {"sl": [[...], ...], "qt": [[...], ...]}, "w": [...]}`
//! - forcings: `{"tendencies": {"sl": [[...]], "qt": [[...]]}, "SHF": [...], "LHF": [...],
//!   "SOLIN": [...]}`
//!
//! with one row per time step. Set `RUST_LOG=debug` for per-step output.

use clap::Parser;
use colnet_components::SavedStepper;
use colnet_core::column::Weights;
use colnet_core::errors::{ColnetError, ColnetResult};
use colnet_core::forcing::ForcingSeries;
use colnet_core::run::{column_run, ColumnDataset, ColumnRunOutput};
use colnet_core::FloatValue;
use indexmap::IndexMap;
use log::{error, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Run a trained single-column model
#[derive(Parser, Debug)]
#[command(name = "colnet-run")]
#[command(about = "Integrate a saved single-column stepper under prescribed forcing")]
struct Args {
    /// Saved stepper (TOML)
    #[arg(short, long)]
    model: PathBuf,

    /// Initial prognostic snapshots and layer masses (JSON)
    #[arg(short, long)]
    inputs: PathBuf,

    /// Large-scale forcing for every time step (JSON)
    #[arg(short, long)]
    forcings: PathBuf,

    /// Where to write the results (JSON)
    #[arg(short, long)]
    output: PathBuf,

    /// Hold the forcing at its time mean (radiative-convective equilibrium)
    #[arg(long)]
    rce: bool,

    /// Override the number of sub-steps per interval
    #[arg(long)]
    nsteps: Option<usize>,
}

type Table = Vec<Vec<FloatValue>>;

#[derive(Debug, Deserialize)]
struct InputFile {
    prognostic: IndexMap<String, Table>,
    w: Vec<FloatValue>,
}

#[derive(Debug, Deserialize)]
struct ForcingFile {
    tendencies: IndexMap<String, Table>,
    #[serde(rename = "SHF")]
    shf: Vec<FloatValue>,
    #[serde(rename = "LHF")]
    lhf: Vec<FloatValue>,
    #[serde(rename = "SOLIN")]
    solin: Vec<FloatValue>,
}

#[derive(Debug, Serialize)]
struct OutputFile {
    prognostic: IndexMap<String, Table>,
    diagnostic: IndexMap<String, Vec<FloatValue>>,
}

fn to_array(name: &str, table: Table) -> ColnetResult<Array2<FloatValue>> {
    let rows = table.len();
    let cols = table.first().map_or(0, |row| row.len());
    if let Some(row) = table.iter().find(|row| row.len() != cols) {
        return Err(ColnetError::shape(format!("rows of {name}"), cols, row.len()));
    }
    let data = table.into_iter().flatten().collect();
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| ColnetError::Error(format!("Could not read {name}: {e}")))
}

fn to_arrays(
    tables: IndexMap<String, Table>,
) -> ColnetResult<IndexMap<String, Array2<FloatValue>>> {
    tables
        .into_iter()
        .map(|(name, table)| -> ColnetResult<(String, Array2<FloatValue>)> {
            let array = to_array(&name, table)?;
            Ok((name, array))
        })
        .collect()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> ColnetResult<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ColnetError::Serialization(format!("{}: {e}", path.display())))
}

fn load_inputs(path: &Path) -> ColnetResult<ColumnDataset> {
    let file: InputFile = read_json(path)?;
    Ok(ColumnDataset::new(
        to_arrays(file.prognostic)?,
        Weights::new(Array1::from(file.w))?,
    ))
}

fn load_forcing(path: &Path) -> ColnetResult<ForcingSeries> {
    let file: ForcingFile = read_json(path)?;
    ForcingSeries::from_arrays(
        &to_arrays(file.tendencies)?,
        &Array1::from(file.shf),
        &Array1::from(file.lhf),
        &Array1::from(file.solin),
    )
}

fn to_output(run: ColumnRunOutput) -> OutputFile {
    let prognostic = run
        .prognostic
        .into_iter()
        .map(|(name, values)| {
            let rows = values.outer_iter().map(|row| row.to_vec()).collect();
            (name, rows)
        })
        .collect();
    let diagnostic = run
        .diagnostic
        .into_iter()
        .map(|(name, values)| (name, values.to_vec()))
        .collect();
    OutputFile {
        prognostic,
        diagnostic,
    }
}

fn run(args: &Args) -> ColnetResult<()> {
    let mut saved = SavedStepper::load(&args.model)?;
    if let Some(nsteps) = args.nsteps {
        saved.stepper.nsteps = nsteps;
    }
    let stepper = saved.into_stepper()?;

    let dataset = load_inputs(&args.inputs)?;
    let mut forcing = load_forcing(&args.forcings)?;
    if args.rce {
        info!("Using time-homogeneous forcing");
        forcing = forcing.time_homogeneous()?;
    }

    info!(
        "Integrating {} snapshots with h = {} days and {} sub-steps",
        dataset.n_times(),
        stepper.h(),
        stepper.nsteps()
    );
    let output = to_output(column_run(&stepper, &dataset, &forcing)?);

    let content = serde_json::to_string_pretty(&output)
        .map_err(|e| ColnetError::Serialization(e.to_string()))?;
    fs::write(&args.output, content)?;
    info!("Wrote {}", args.output.display());
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("{}", e);
        eprintln!("colnet-run failed: {}", e);
        std::process::exit(1);
    }
}

//! End-to-end runs of the learned source term through the stepper.

use approx::assert_relative_eq;
use colnet_components::nn::{BatchNorm, Linear, Mlp};
use colnet_components::scaler::IdentityScaler;
use colnet_components::{LearnedStepper, RhsConfig, SavedStepper, SourceTermModel};
use colnet_core::column::{Fields, Weights};
use colnet_core::constants::{FIELD_QT, FIELD_SL};
use colnet_core::forcing::{ForcingSeries, ForcingSlice};
use colnet_core::run::{column_run, run_columns, ColumnDataset};
use colnet_core::stepper::{ForcedStepper, StepperConfig};
use indexmap::IndexMap;
use ndarray::{array, Array1, Array2};

const M: usize = 6;

/// Source term with a constant output `bias`, split as `[sl (3) | qt (3)]`
fn constant_model(bias: Array1<f64>, precip_positive: bool) -> SourceTermModel {
    let config = RhsConfig {
        precip_positive,
        ..RhsConfig::default()
    };
    let n_2d = config.num_2d_inputs + M;
    let hidden = Linear::new(Array2::zeros((4, M + n_2d)), Array1::zeros(4)).unwrap();
    let output = Linear::new(Array2::zeros((M, 4)), bias).unwrap();
    SourceTermModel::new(
        M,
        config,
        Box::new(IdentityScaler {}),
        BatchNorm::new(n_2d),
        Box::new(Mlp::new(vec![hidden, output]).unwrap()),
    )
    .unwrap()
}

fn stepper(model: SourceTermModel) -> LearnedStepper {
    let config = StepperConfig {
        h: 0.125,
        nsteps: 4,
        ..StepperConfig::default()
    };
    ForcedStepper::from_config(model, config).unwrap()
}

fn dataset(n_times: usize) -> ColumnDataset {
    let mut prognostic = IndexMap::new();
    prognostic.insert(
        FIELD_SL.to_string(),
        Array2::from_shape_fn((n_times, 3), |(_, k)| 300.0 + 10.0 * k as f64),
    );
    prognostic.insert(
        FIELD_QT.to_string(),
        Array2::from_shape_fn((n_times, 3), |(_, k)| 12.0 - 4.0 * k as f64),
    );
    ColumnDataset::new(prognostic, Weights::new(array![300.0, 250.0, 200.0]).unwrap())
}

fn forcing(n_times: usize, lhf: f64) -> ForcingSeries {
    let tendencies = Fields::new()
        .with_field(FIELD_SL, array![0.5, 0.0, -0.5])
        .with_field(FIELD_QT, array![0.1, 0.1, 0.1]);
    ForcingSeries::new(vec![ForcingSlice::new(tendencies, 15.0, lhf, 400.0); n_times])
}

#[test]
fn test_precipitation_is_non_negative() {
    // Strong moistening at every level
    let model = constant_model(array![0.0, 0.0, 0.0, 40.0, 40.0, 40.0], true);
    let out = column_run(&stepper(model), &dataset(5), &forcing(5, 80.0)).unwrap();

    for prec in out.diagnostic["PREC"].iter() {
        assert!(*prec >= -1e-9);
        assert_relative_eq!(*prec, 0.0, epsilon = 1e-9);
    }
}

#[test]
fn test_unconstrained_moistening_implies_negative_precipitation() {
    let model = constant_model(array![0.0, 0.0, 0.0, 40.0, 40.0, 40.0], false);
    let out = column_run(&stepper(model), &dataset(3), &forcing(3, 80.0)).unwrap();
    assert!(out.diagnostic["PREC"].iter().all(|&p| p < 0.0));
}

#[test]
fn test_energy_budget_matches_constant_heating() {
    let model = constant_model(array![2.0, 2.0, 2.0, 0.0, 0.0, 0.0], true);
    let data = dataset(4);
    let out = column_run(&stepper(model), &data, &forcing(4, 80.0)).unwrap();

    let expected = 1004.0 * 2.0 * data.weights.total() / 86400.0;
    for snn in out.diagnostic["SNN"].iter() {
        assert_relative_eq!(*snn, expected, max_relative = 1e-8);
    }
    let sl = &out.prognostic[FIELD_SL];
    assert_relative_eq!(sl[[3, 0]], 300.0 + 3.0 * 0.125 * 2.0, max_relative = 1e-12);
}

#[test]
fn test_saved_stepper_runs_identically() {
    let bias = array![0.5, -0.25, 0.1, -1.0, 2.0, 0.5];
    let original = stepper(constant_model(bias, true));

    let toml = SavedStepper::from_stepper(&original)
        .unwrap()
        .to_toml_string()
        .unwrap();
    let restored = SavedStepper::from_toml_str(&toml)
        .unwrap()
        .into_stepper()
        .unwrap();

    let columns = vec![(dataset(6), forcing(6, 50.0)), (dataset(6), forcing(6, 120.0))];
    let expected: Vec<_> = columns
        .iter()
        .map(|(d, f)| column_run(&original, d, f).unwrap())
        .collect();
    let actual: Vec<_> = run_columns(&restored, &columns)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_run_output_serialises_to_json() {
    let model = constant_model(Array1::zeros(M), true);
    let out = column_run(&stepper(model), &dataset(3), &forcing(3, 80.0)).unwrap();

    let json = serde_json::to_string(&out).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["diagnostic"]["QLSF"].is_object());
    assert_eq!(value["weights"].as_array().unwrap().len(), 3);
}

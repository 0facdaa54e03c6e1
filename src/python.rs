use crate::{
    column_run, ColnetError, ColumnDataset, ForcingSeries, LearnedStepper, SavedStepper, Weights,
};
use colnet_core::FloatValue;
use indexmap::IndexMap;
use ndarray::Array2;
use numpy::{PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::HashMap;

fn to_py_err(e: ColnetError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Copy numpy arrays into an ordered map, sorted by name
fn to_series(
    arrays: HashMap<String, PyReadonlyArray2<'_, FloatValue>>,
) -> IndexMap<String, Array2<FloatValue>> {
    let mut series: IndexMap<String, Array2<FloatValue>> = arrays
        .into_iter()
        .map(|(name, values)| (name, values.as_array().to_owned()))
        .collect();
    series.sort_keys();
    series
}

/// Stepper driven by a learned source term
#[pyclass(name = "ForcedStepper")]
pub struct PyForcedStepper(LearnedStepper);

#[pymethods]
impl PyForcedStepper {
    /// Rebuild a stepper from the dictionary produced by `to_saved`
    #[staticmethod]
    fn from_saved(saved: Bound<'_, PyAny>) -> PyResult<Self> {
        let saved: SavedStepper = pythonize::depythonize_bound(saved)
            .map_err(|e| PyValueError::new_err(format!("{}", e)))?;
        Ok(Self(saved.into_stepper().map_err(to_py_err)?))
    }

    #[staticmethod]
    fn from_toml(content: &str) -> PyResult<Self> {
        let saved = SavedStepper::from_toml_str(content).map_err(to_py_err)?;
        Ok(Self(saved.into_stepper().map_err(to_py_err)?))
    }

    fn to_saved(&self, py: Python<'_>) -> PyResult<PyObject> {
        let saved = SavedStepper::from_stepper(&self.0).map_err(to_py_err)?;
        pythonize::pythonize(py, &saved).map_err(|e| PyValueError::new_err(format!("{}", e)))
    }

    fn to_toml(&self) -> PyResult<String> {
        SavedStepper::from_stepper(&self.0)
            .and_then(|saved| saved.to_toml_string())
            .map_err(to_py_err)
    }

    #[getter]
    fn h(&self) -> FloatValue {
        self.0.h()
    }

    #[getter]
    fn nsteps(&self) -> usize {
        self.0.nsteps()
    }

    /// Integrate a column
    ///
    /// `prognostic` and `tendencies` map field names to `(time, level)` arrays; the
    /// drivers hold one value per time step. Returns a dictionary with the simulated
    /// `prognostic` fields and the `diagnostic` budget series.
    #[pyo3(signature = (prognostic, w, tendencies, shf, lhf, solin, rce=false))]
    #[allow(clippy::too_many_arguments)]
    fn run<'py>(
        &self,
        py: Python<'py>,
        prognostic: HashMap<String, PyReadonlyArray2<'py, FloatValue>>,
        w: PyReadonlyArray1<'py, FloatValue>,
        tendencies: HashMap<String, PyReadonlyArray2<'py, FloatValue>>,
        shf: PyReadonlyArray1<'py, FloatValue>,
        lhf: PyReadonlyArray1<'py, FloatValue>,
        solin: PyReadonlyArray1<'py, FloatValue>,
        rce: bool,
    ) -> PyResult<Bound<'py, PyDict>> {
        let weights = Weights::new(w.as_array().to_owned()).map_err(to_py_err)?;
        let dataset = ColumnDataset::new(to_series(prognostic), weights);
        let mut forcing = ForcingSeries::from_arrays(
            &to_series(tendencies),
            &shf.as_array().to_owned(),
            &lhf.as_array().to_owned(),
            &solin.as_array().to_owned(),
        )
        .map_err(to_py_err)?;
        if rce {
            forcing = forcing.time_homogeneous().map_err(to_py_err)?;
        }

        let stepper = &self.0;
        let output = py
            .allow_threads(|| column_run(stepper, &dataset, &forcing))
            .map_err(to_py_err)?;

        let prognostic = PyDict::new_bound(py);
        for (name, values) in output.prognostic.iter() {
            prognostic.set_item(name, values.to_pyarray_bound(py))?;
        }
        let diagnostic = PyDict::new_bound(py);
        for (name, values) in output.diagnostic.iter() {
            diagnostic.set_item(name, values.to_pyarray_bound(py))?;
        }

        let result = PyDict::new_bound(py);
        result.set_item("prognostic", prognostic)?;
        result.set_item("diagnostic", diagnostic)?;
        Ok(result)
    }

    fn __repr__(&self) -> String {
        format!(
            "ForcedStepper(m={}, h={}, nsteps={})",
            self.0.rhs().m(),
            self.0.h(),
            self.0.nsteps()
        )
    }
}

#[pymodule]
#[pyo3(name = "_lib")]
fn colnet(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_class::<PyForcedStepper>()?;
    Ok(())
}

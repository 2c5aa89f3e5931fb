use crate::{
    BaseParameters, BurstyBase, BurstyGrn, LimitGrn, ModelParameters, Network, SimError,
    Trajectory,
};
use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray2, PyUntypedArrayMethods};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

type PyTrajectory<'py> = (Bound<'py, PyArray1<f64>>, Bound<'py, PyArray2<f64>>);

impl From<SimError> for PyErr {
    fn from(err: SimError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn read_network(basal: Vec<f64>, inter: PyReadonlyArray2<f64>) -> Result<Network, SimError> {
    let shape = inter.shape();
    if shape.len() != 2 {
        return Err(SimError::Shape("interaction matrix must be 2-dimensional".into()));
    }
    let (rows, cols) = (shape[0], shape[1]);
    let data = inter
        .as_slice()
        .map_err(|_| SimError::Shape("interaction matrix must be contiguous".into()))?;
    let inter = if cols == 0 {
        vec![Vec::new(); rows]
    } else {
        data.chunks(cols).map(<[f64]>::to_vec).collect()
    };
    Network::from_parts(basal, inter)
}

/// Scalars are promoted to a single recording time.
fn read_time_points(time: &Bound<'_, PyAny>) -> Result<Vec<f64>, SimError> {
    if let Ok(value) = time.extract::<f64>() {
        return Ok(vec![value]);
    }
    time.extract::<Vec<f64>>().map_err(|_| {
        SimError::Validation("time points should either be a scalar or a 1-D sequence".into())
    })
}

fn export<'py>(py: Python<'py>, trajectory: Trajectory, verbose: bool) -> PyResult<PyTrajectory<'py>> {
    if verbose {
        println!("{}", trajectory.summary());
    }
    let shape = (trajectory.len(), trajectory.n_genes());
    let (t, x) = trajectory.into_parts();
    let x = Array2::from_shape_vec(shape, x)
        .map_err(|err| PyValueError::new_err(format!("failed to export data: {err}")))?;
    Ok((t.into_pyarray(py), x.into_pyarray(py)))
}

#[pyfunction(signature = (
    basal,
    inter,
    time,
    init_state=None,
    seed=None,
    verbose=false,
    burst_size=1.0,
    burst_frequency_min=0.0,
    burst_frequency_max=2.0,
    degradation_rate=1.0
))]
#[allow(clippy::too_many_arguments)]
pub fn simulate_grn<'py>(
    py: Python<'py>,
    basal: Vec<f64>,
    inter: PyReadonlyArray2<f64>,
    time: &Bound<'py, PyAny>,
    init_state: Option<Vec<f64>>,
    seed: Option<u64>,
    verbose: bool,
    burst_size: f64,
    burst_frequency_min: f64,
    burst_frequency_max: f64,
    degradation_rate: f64,
) -> PyResult<PyTrajectory<'py>> {
    let network = read_network(basal, inter)?;
    let params = ModelParameters::builder()
        .burst_size(burst_size)
        .burst_frequency_min(burst_frequency_min)
        .burst_frequency_max(burst_frequency_max)
        .degradation_rate(degradation_rate)
        .build()?;
    let time = read_time_points(time)?;
    let model = BurstyGrn::new(network, params);
    let trajectory = py.detach(|| model.simulate(&time, init_state.as_deref(), seed, false))?;
    export(py, trajectory, verbose)
}

#[pyfunction(signature = (
    basal,
    inter,
    time,
    init_state=None,
    verbose=false,
    burst_size=1.0,
    burst_frequency_min=0.0,
    burst_frequency_max=2.0,
    degradation_rate=1.0
))]
#[allow(clippy::too_many_arguments)]
pub fn simulate_limit<'py>(
    py: Python<'py>,
    basal: Vec<f64>,
    inter: PyReadonlyArray2<f64>,
    time: &Bound<'py, PyAny>,
    init_state: Option<Vec<f64>>,
    verbose: bool,
    burst_size: f64,
    burst_frequency_min: f64,
    burst_frequency_max: f64,
    degradation_rate: f64,
) -> PyResult<PyTrajectory<'py>> {
    let network = read_network(basal, inter)?;
    let params = ModelParameters::builder()
        .burst_size(burst_size)
        .burst_frequency_min(burst_frequency_min)
        .burst_frequency_max(burst_frequency_max)
        .degradation_rate(degradation_rate)
        .build()?;
    let time = read_time_points(time)?;
    let model = LimitGrn::new(network, params);
    let trajectory = py.detach(|| model.simulate(&time, init_state.as_deref(), false))?;
    export(py, trajectory, verbose)
}

#[pyfunction(signature = (
    time,
    init_state=0.0,
    seed=None,
    verbose=false,
    burst_size=1.0,
    burst_frequency=1.0,
    degradation_rate=1.0
))]
#[allow(clippy::too_many_arguments)]
pub fn simulate_base<'py>(
    py: Python<'py>,
    time: &Bound<'py, PyAny>,
    init_state: f64,
    seed: Option<u64>,
    verbose: bool,
    burst_size: f64,
    burst_frequency: f64,
    degradation_rate: f64,
) -> PyResult<PyTrajectory<'py>> {
    let params = BaseParameters::new(burst_size, burst_frequency, degradation_rate)?;
    let time = read_time_points(time)?;
    let model = BurstyBase::new(params);
    let trajectory = py.detach(|| model.simulate(&time, init_state, seed, false))?;
    export(py, trajectory, verbose)
}

#[pymodule]
fn bursty(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(simulate_grn, module)?)?;
    module.add_function(wrap_pyfunction!(simulate_limit, module)?)?;
    module.add_function(wrap_pyfunction!(simulate_base, module)?)?;
    Ok(())
}

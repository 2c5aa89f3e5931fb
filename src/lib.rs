//! Exact simulation of bursty gene expression driven by a gene regulatory network.
//!
//! Protein levels decay deterministically between instantaneous bursts whose
//! rates depend on the current levels through a sigmoid network response.
//! [`BurstyGrn`] samples this piecewise-deterministic Markov process exactly by
//! thinning a homogeneous candidate process, [`BurstyBase`] covers the single
//! gene without feedback in closed form, and [`LimitGrn`] integrates the
//! deterministic slow-fast limit.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Poisson};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod networks;
#[cfg(feature = "python")]
mod python;

/// Euler step of the limit model, in units of the protein lifetime.
const LIMIT_STEP_SCALE: f64 = 1e-3;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SimError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Basal activities and pairwise interactions of a gene regulatory network.
///
/// `interaction(i, j)` is the effect of gene `i`'s protein level on the burst
/// rate of gene `j`. The matrix is stored row-major.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "NetworkParts", into = "NetworkParts")
)]
pub struct Network {
    n_genes: usize,
    basal: Vec<f64>,
    inter: Vec<f64>,
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct NetworkParts {
    basal: Vec<f64>,
    inter: Vec<Vec<f64>>,
}

#[cfg(feature = "serde")]
impl TryFrom<NetworkParts> for Network {
    type Error = SimError;

    fn try_from(parts: NetworkParts) -> Result<Self, Self::Error> {
        Network::from_parts(parts.basal, parts.inter)
    }
}

#[cfg(feature = "serde")]
impl From<Network> for NetworkParts {
    fn from(network: Network) -> Self {
        let inter = (0..network.n_genes)
            .map(|row| network.interaction_row(row).to_vec())
            .collect();
        Self {
            basal: network.basal,
            inter,
        }
    }
}

impl Network {
    /// Creates a network of `n_genes` genes with zero basal activity and no interactions.
    pub fn new(n_genes: usize) -> Result<Self, SimError> {
        if n_genes == 0 {
            return Err(SimError::Shape(
                "network must contain at least one gene".into(),
            ));
        }
        Ok(Self {
            n_genes,
            basal: vec![0.0; n_genes],
            inter: vec![0.0; n_genes * n_genes],
        })
    }

    pub fn from_parts(basal: Vec<f64>, inter: Vec<Vec<f64>>) -> Result<Self, SimError> {
        let n_genes = basal.len();
        if n_genes == 0 {
            return Err(SimError::Shape(
                "network must contain at least one gene".into(),
            ));
        }
        if inter.len() != n_genes {
            return Err(SimError::Shape(format!(
                "interaction matrix has {} rows but basal vector has {} genes",
                inter.len(),
                n_genes
            )));
        }
        let mut flat = Vec::with_capacity(n_genes * n_genes);
        for (idx, row) in inter.iter().enumerate() {
            if row.len() != n_genes {
                return Err(SimError::Shape(format!(
                    "interaction row {} has {} columns, expected {}",
                    idx,
                    row.len(),
                    n_genes
                )));
            }
            flat.extend_from_slice(row);
        }
        if basal.iter().chain(flat.iter()).any(|value| !value.is_finite()) {
            return Err(SimError::InvalidConfiguration(
                "network parameters must be finite".into(),
            ));
        }
        Ok(Self {
            n_genes,
            basal,
            inter: flat,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.n_genes
    }

    pub fn basal(&self) -> &[f64] {
        &self.basal
    }

    /// Effect of gene `from` on gene `to`, `None` when either index is out of range.
    pub fn interaction(&self, from: usize, to: usize) -> Option<f64> {
        if from >= self.n_genes || to >= self.n_genes {
            return None;
        }
        Some(self.inter[from * self.n_genes + to])
    }

    fn interaction_row(&self, from: usize) -> &[f64] {
        &self.inter[from * self.n_genes..(from + 1) * self.n_genes]
    }

    pub fn set_basal(&mut self, gene: usize, value: f64) -> Result<(), SimError> {
        self.check_gene(gene)?;
        check_finite(value, "basal activity")?;
        self.basal[gene] = value;
        Ok(())
    }

    /// Sets the same basal activity on every gene.
    pub fn fill_basal(&mut self, value: f64) -> Result<(), SimError> {
        check_finite(value, "basal activity")?;
        self.basal.fill(value);
        Ok(())
    }

    pub fn set_interaction(&mut self, from: usize, to: usize, value: f64) -> Result<(), SimError> {
        self.check_gene(from)?;
        self.check_gene(to)?;
        check_finite(value, "interaction strength")?;
        self.inter[from * self.n_genes + to] = value;
        Ok(())
    }

    fn check_gene(&self, gene: usize) -> Result<(), SimError> {
        if gene >= self.n_genes {
            return Err(SimError::Shape(format!(
                "gene index {} exceeds number of genes {}",
                gene, self.n_genes
            )));
        }
        Ok(())
    }

    fn check_state(&self, x: &[f64]) -> Result<(), SimError> {
        if x.len() != self.n_genes {
            return Err(SimError::Shape(format!(
                "state length {} does not match number of genes {}",
                x.len(),
                self.n_genes
            )));
        }
        Ok(())
    }
}

fn check_finite(value: f64, name: &str) -> Result<(), SimError> {
    if !value.is_finite() {
        return Err(SimError::InvalidConfiguration(format!(
            "{name} must be finite"
        )));
    }
    Ok(())
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Burst frequencies `(1 - s) * k0 + s * k1` with `s = sigmoid(basal + x · inter)`.
pub fn kon_sigmoid(x: &[f64], k0: f64, k1: f64, network: &Network) -> Result<Vec<f64>, SimError> {
    network.check_state(x)?;
    let mut rates = vec![0.0; network.n_genes];
    kon_sigmoid_into(network, k0, k1, x, &mut rates);
    Ok(rates)
}

fn kon_sigmoid_into(network: &Network, k0: f64, k1: f64, x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(x.len(), network.n_genes);
    debug_assert_eq!(out.len(), network.n_genes);
    out.copy_from_slice(&network.basal);
    for (from, &level) in x.iter().enumerate() {
        for (acc, &weight) in out.iter_mut().zip(network.interaction_row(from)) {
            *acc += level * weight;
        }
    }
    for value in out.iter_mut() {
        let sigma = sigmoid(*value);
        *value = (1.0 - sigma) * k0 + sigma * k1;
    }
}

#[inline]
fn decay(degradation_rate: f64, dt: f64, x: &mut [f64]) {
    let factor = (-degradation_rate * dt).exp();
    for value in x.iter_mut() {
        *value *= factor;
    }
}

/// Parameters of the network-driven bursty model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawModelParameters")
)]
pub struct ModelParameters {
    burst_size: f64,
    burst_frequency_min: f64,
    burst_frequency_max: f64,
    degradation_rate: f64,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawModelParameters {
    burst_size: f64,
    burst_frequency_min: f64,
    burst_frequency_max: f64,
    degradation_rate: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawModelParameters> for ModelParameters {
    type Error = SimError;

    fn try_from(raw: RawModelParameters) -> Result<Self, Self::Error> {
        ModelParameters::builder()
            .burst_size(raw.burst_size)
            .burst_frequency_min(raw.burst_frequency_min)
            .burst_frequency_max(raw.burst_frequency_max)
            .degradation_rate(raw.degradation_rate)
            .build()
    }
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            burst_size: 1.0,
            burst_frequency_min: 0.0,
            burst_frequency_max: 2.0,
            degradation_rate: 1.0,
        }
    }
}

impl ModelParameters {
    pub fn builder() -> ModelParametersBuilder {
        ModelParametersBuilder::default()
    }

    pub fn burst_size(&self) -> f64 {
        self.burst_size
    }

    pub fn burst_frequency_min(&self) -> f64 {
        self.burst_frequency_min
    }

    pub fn burst_frequency_max(&self) -> f64 {
        self.burst_frequency_max
    }

    pub fn degradation_rate(&self) -> f64 {
        self.degradation_rate
    }

    /// Re-checks the invariants enforced by the builder, for values obtained by deserialization.
    pub fn validate(&self) -> Result<(), SimError> {
        let fields = [
            ("burst_size", self.burst_size),
            ("burst_frequency_min", self.burst_frequency_min),
            ("burst_frequency_max", self.burst_frequency_max),
            ("degradation_rate", self.degradation_rate),
        ];
        for (name, value) in fields {
            check_finite(value, name)?;
        }
        if self.burst_size <= 0.0 {
            return Err(SimError::InvalidConfiguration(
                "burst_size must be positive".into(),
            ));
        }
        if self.degradation_rate <= 0.0 {
            return Err(SimError::InvalidConfiguration(
                "degradation_rate must be positive".into(),
            ));
        }
        if self.burst_frequency_min < 0.0 {
            return Err(SimError::InvalidConfiguration(
                "burst_frequency_min must be non-negative".into(),
            ));
        }
        if self.burst_frequency_min > self.burst_frequency_max {
            return Err(SimError::InvalidConfiguration(format!(
                "burst_frequency_min {} exceeds burst_frequency_max {}",
                self.burst_frequency_min, self.burst_frequency_max
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelParametersBuilder {
    params: ModelParameters,
}

impl ModelParametersBuilder {
    pub fn burst_size(mut self, value: f64) -> Self {
        self.params.burst_size = value;
        self
    }

    pub fn burst_frequency_min(mut self, value: f64) -> Self {
        self.params.burst_frequency_min = value;
        self
    }

    pub fn burst_frequency_max(mut self, value: f64) -> Self {
        self.params.burst_frequency_max = value;
        self
    }

    pub fn degradation_rate(mut self, value: f64) -> Self {
        self.params.degradation_rate = value;
        self
    }

    pub fn build(self) -> Result<ModelParameters, SimError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// Checks that recording times are finite, nonnegative and sorted.
pub fn check_time_points(time: &[f64]) -> Result<Vec<f64>, SimError> {
    if time.iter().any(|t| !t.is_finite()) {
        return Err(SimError::Validation("time points must be finite".into()));
    }
    if time.windows(2).any(|w| w[0] > w[1]) {
        return Err(SimError::Validation(
            "time points must be given in increasing order".into(),
        ));
    }
    if time.iter().any(|&t| t < 0.0) {
        return Err(SimError::Validation(
            "time points must be nonnegative".into(),
        ));
    }
    Ok(time.to_vec())
}

pub fn check_init_state(state: &[f64], expected_len: Option<usize>) -> Result<Vec<f64>, SimError> {
    if state.iter().any(|x| !x.is_finite() || *x < 0.0) {
        return Err(SimError::Validation(
            "initial state must be finite and nonnegative".into(),
        ));
    }
    if let Some(expected) = expected_len {
        if state.len() != expected {
            return Err(SimError::Shape(format!(
                "initial state length {} does not match number of genes {}",
                state.len(),
                expected
            )));
        }
    }
    Ok(state.to_vec())
}

/// Diagnostics gathered while producing a trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimulationSummary {
    Exact { real_jumps: u64, phantom_jumps: u64 },
    ClosedForm { jumps: u64 },
    Euler { steps: u64, step_size: f64 },
}

impl SimulationSummary {
    pub fn total_jumps(&self) -> u64 {
        match *self {
            Self::Exact {
                real_jumps,
                phantom_jumps,
            } => real_jumps + phantom_jumps,
            Self::ClosedForm { jumps } => jumps,
            Self::Euler { .. } => 0,
        }
    }

    /// Fraction of candidate jumps that were thinned out, zero when nothing was drawn.
    pub fn phantom_fraction(&self) -> f64 {
        match *self {
            Self::Exact { phantom_jumps, .. } if phantom_jumps > 0 => {
                phantom_jumps as f64 / self.total_jumps() as f64
            }
            _ => 0.0,
        }
    }
}

impl fmt::Display for SimulationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exact { phantom_jumps, .. } => write!(
                f,
                "Exact simulation used {} jumps including {} phantom jumps ({:.2}%)",
                self.total_jumps(),
                phantom_jumps,
                100.0 * self.phantom_fraction()
            ),
            Self::ClosedForm { jumps } => write!(f, "Simulation generated {jumps} jumps."),
            Self::Euler { steps, step_size } => write!(
                f,
                "ODE simulation used {steps} steps (step size = {step_size:.5})"
            ),
        }
    }
}

/// Protein levels recorded at the requested time points.
///
/// `x` is row-major with one row of `n_genes` levels per time point.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trajectory {
    t: Vec<f64>,
    x: Vec<f64>,
    n_genes: usize,
    summary: SimulationSummary,
}

impl Trajectory {
    pub fn t(&self) -> &[f64] {
        &self.t
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn n_genes(&self) -> usize {
        self.n_genes
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn summary(&self) -> &SimulationSummary {
        &self.summary
    }

    /// Levels of every gene at the `k`-th recording time.
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.len()`; see [`Trajectory::get_row`] for a checked variant.
    pub fn row(&self, k: usize) -> &[f64] {
        &self.x[k * self.n_genes..(k + 1) * self.n_genes]
    }

    pub fn get_row(&self, k: usize) -> Option<&[f64]> {
        (k < self.len()).then(|| self.row(k))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.x.chunks_exact(self.n_genes)
    }

    /// Levels of a single gene across all recorded times, `None` for an unknown gene.
    pub fn gene(&self, gene: usize) -> Option<impl Iterator<Item = f64> + '_> {
        (gene < self.n_genes).then(|| self.rows().map(move |row| row[gene]))
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.len().checked_sub(1).map(|k| self.row(k))
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.t, self.x)
    }
}

struct StateRecorder<'a> {
    buffer: &'a mut [f64],
    write_idx: usize,
    n_genes: usize,
}

impl<'a> StateRecorder<'a> {
    fn new(buffer: &'a mut [f64], n_genes: usize) -> Self {
        Self {
            buffer,
            write_idx: 0,
            n_genes,
        }
    }

    fn record(&mut self, state: &[f64]) {
        let end = self.write_idx + self.n_genes;
        debug_assert!(end <= self.buffer.len());
        self.buffer[self.write_idx..end].copy_from_slice(state);
        self.write_idx = end;
    }

    /// Records `state` after decaying it for `dt` at `degradation_rate`.
    fn record_decayed(&mut self, state: &[f64], degradation_rate: f64, dt: f64) {
        let start = self.write_idx;
        self.record(state);
        decay(degradation_rate, dt, &mut self.buffer[start..self.write_idx]);
    }
}

/// Outcome of one thinning candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Jump {
    pub waiting_time: f64,
    /// Gene that burst, `None` for a phantom jump.
    pub gene: Option<usize>,
}

impl Jump {
    pub fn is_real(&self) -> bool {
        self.gene.is_some()
    }
}

/// Inverse-CDF draw from a discrete distribution.
///
/// Returns the first index whose cumulative probability strictly exceeds
/// `draw`, so a draw sitting exactly on a boundary resolves to the next
/// category. When rounding leaves `draw` at or past the total mass, the last
/// category with positive probability is chosen.
pub fn select_outcome(probabilities: &[f64], draw: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, &p) in probabilities.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return idx;
        }
    }
    probabilities.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

/// Samples jumps of the bursty model by thinning a homogeneous process at the
/// global rate bound `n_genes * burst_frequency_max`.
///
/// Each call to [`JumpSampler::step`] draws exactly one candidate.
pub struct JumpSampler<'a> {
    model: &'a BurstyGrn,
    rate_bound: f64,
    waiting_time: Exp<f64>,
    burst_height: Exp<f64>,
    rates: Vec<f64>,
    probabilities: Vec<f64>,
}

impl<'a> JumpSampler<'a> {
    pub fn new(model: &'a BurstyGrn) -> Result<Self, SimError> {
        let rate_bound = model.rate_bound();
        if !(rate_bound > 0.0 && rate_bound.is_finite()) {
            return Err(SimError::InvalidConfiguration(format!(
                "rate bound must be positive and finite, got {rate_bound}"
            )));
        }
        let waiting_time = Exp::new(rate_bound).map_err(|err| {
            SimError::InvalidConfiguration(format!("waiting time distribution: {err}"))
        })?;
        let burst_height = Exp::new(1.0 / model.params.burst_size).map_err(|err| {
            SimError::InvalidConfiguration(format!("burst size distribution: {err}"))
        })?;
        let n_genes = model.n_genes();
        Ok(Self {
            model,
            rate_bound,
            waiting_time,
            burst_height,
            rates: vec![0.0; n_genes],
            probabilities: vec![0.0; n_genes + 1],
        })
    }

    pub fn rate_bound(&self) -> f64 {
        self.rate_bound
    }

    /// Draws the next candidate and updates `x` to the state just after it.
    pub fn step<R: Rng + ?Sized>(&mut self, x: &mut [f64], rng: &mut R) -> Result<Jump, SimError> {
        let model = self.model;
        model.network.check_state(x)?;
        let params = &model.params;

        let waiting_time = self.waiting_time.sample(rng);
        decay(params.degradation_rate, waiting_time, x);

        kon_sigmoid_into(
            &model.network,
            params.burst_frequency_min,
            params.burst_frequency_max,
            x,
            &mut self.rates,
        );
        let mut accepted = 0.0;
        for (p, &rate) in self.probabilities[1..].iter_mut().zip(&self.rates) {
            *p = rate / self.rate_bound;
            accepted += *p;
        }
        // round-off can push the accepted mass slightly past one
        self.probabilities[0] = (1.0 - accepted).max(0.0);

        let draw: f64 = rng.r#gen();
        let gene = select_outcome(&self.probabilities, draw).checked_sub(1);
        if let Some(gene) = gene {
            x[gene] += self.burst_height.sample(rng);
        }
        Ok(Jump { waiting_time, gene })
    }
}

/// Bursty model for a gene regulatory network with any number of genes.
#[derive(Clone, Debug)]
pub struct BurstyGrn {
    network: Arc<Network>,
    params: ModelParameters,
}

impl BurstyGrn {
    pub fn new(network: impl Into<Arc<Network>>, params: ModelParameters) -> Self {
        Self {
            network: network.into(),
            params,
        }
    }

    /// Same network, different parameters.
    pub fn with_parameters(&self, params: ModelParameters) -> Self {
        Self {
            network: Arc::clone(&self.network),
            params,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    pub fn n_genes(&self) -> usize {
        self.network.n_genes
    }

    pub fn kon(&self, x: &[f64]) -> Result<Vec<f64>, SimError> {
        kon_sigmoid(
            x,
            self.params.burst_frequency_min,
            self.params.burst_frequency_max,
            &self.network,
        )
    }

    pub fn rate_bound(&self) -> f64 {
        self.n_genes() as f64 * self.params.burst_frequency_max
    }

    /// Exact solution of the decay between jumps.
    pub fn flow(&self, dt: f64, x: &[f64]) -> Result<Vec<f64>, SimError> {
        if !(dt >= 0.0) {
            return Err(SimError::InvalidArgument(format!(
                "flow duration must be nonnegative, got {dt}"
            )));
        }
        let mut out = x.to_vec();
        decay(self.params.degradation_rate, dt, &mut out);
        Ok(out)
    }

    /// Runs one exact simulation on a private generator, seeded from `seed`
    /// or from system entropy.
    ///
    /// With `verbose` the jump summary is emitted as a `tracing` info event,
    /// which only shows up once the caller installs a subscriber. The same
    /// summary is always available from [`Trajectory::summary`].
    pub fn simulate(
        &self,
        time: &[f64],
        init_state: Option<&[f64]>,
        seed: Option<u64>,
        verbose: bool,
    ) -> Result<Trajectory, SimError> {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        self.simulate_with_rng(time, init_state, &mut rng, verbose)
    }

    pub fn simulate_with_rng<R: Rng + ?Sized>(
        &self,
        time: &[f64],
        init_state: Option<&[f64]>,
        rng: &mut R,
        verbose: bool,
    ) -> Result<Trajectory, SimError> {
        let n_genes = self.n_genes();
        let time = check_time_points(time)?;
        let init_state = match init_state {
            Some(state) => check_init_state(state, Some(n_genes))?,
            None => vec![0.0; n_genes],
        };
        let degradation_rate = self.params.degradation_rate;

        // Without bursts the process is pure decay and no candidate is ever drawn.
        let mut sampler = if self.rate_bound() > 0.0 {
            Some(JumpSampler::new(self)?)
        } else {
            None
        };

        let mut output = vec![0.0; time.len() * n_genes];
        let mut recorder = StateRecorder::new(&mut output, n_genes);
        let mut real_jumps = 0u64;
        let mut phantom_jumps = 0u64;

        let mut current_time = 0.0;
        let mut state = init_state.clone();
        let mut previous_time = current_time;
        let mut previous_state = init_state;

        for &record_time in &time {
            if let Some(sampler) = sampler.as_mut() {
                while current_time < record_time {
                    previous_time = current_time;
                    previous_state.copy_from_slice(&state);
                    let jump = sampler.step(&mut state, rng)?;
                    current_time += jump.waiting_time;
                    if jump.is_real() {
                        real_jumps += 1;
                    } else {
                        phantom_jumps += 1;
                    }
                }
            }
            // `state` may already include a jump past `record_time`.
            recorder.record_decayed(&previous_state, degradation_rate, record_time - previous_time);
        }

        let summary = SimulationSummary::Exact {
            real_jumps,
            phantom_jumps,
        };
        tracing::debug!(
            real_jumps,
            phantom_jumps,
            records = time.len(),
            "exact simulation finished"
        );
        if verbose {
            tracing::info!("{summary}");
        }
        Ok(Trajectory {
            t: time,
            x: output,
            n_genes,
            summary,
        })
    }

    /// Simulates `n_cells` independent cells one after another.
    ///
    /// Cell `i` runs on its own generator seeded with `derive_seed(seed, i)`,
    /// so any single cell can be reproduced on its own.
    pub fn simulate_cells(
        &self,
        time: &[f64],
        init_state: Option<&[f64]>,
        n_cells: usize,
        seed: Option<u64>,
    ) -> Result<Vec<Trajectory>, SimError> {
        if n_cells == 0 {
            return Err(SimError::InvalidArgument(
                "number of cells must be greater than zero".into(),
            ));
        }
        let base = seed.unwrap_or_else(rand::random);
        (0..n_cells)
            .map(|cell| {
                let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(base, cell as u64));
                self.simulate_with_rng(time, init_state, &mut rng, false)
            })
            .collect()
    }
}

/// Mixes a base seed with a stream index (SplitMix64 finalizer).
pub fn derive_seed(seed: u64, index: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let mut z = seed ^ index.wrapping_mul(GOLDEN_GAMMA);
    z = z.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawBaseParameters")
)]
pub struct BaseParameters {
    burst_size: f64,
    burst_frequency: f64,
    degradation_rate: f64,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawBaseParameters {
    burst_size: f64,
    burst_frequency: f64,
    degradation_rate: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawBaseParameters> for BaseParameters {
    type Error = SimError;

    fn try_from(raw: RawBaseParameters) -> Result<Self, Self::Error> {
        BaseParameters::new(raw.burst_size, raw.burst_frequency, raw.degradation_rate)
    }
}

impl Default for BaseParameters {
    fn default() -> Self {
        Self {
            burst_size: 1.0,
            burst_frequency: 1.0,
            degradation_rate: 1.0,
        }
    }
}

impl BaseParameters {
    pub fn new(
        burst_size: f64,
        burst_frequency: f64,
        degradation_rate: f64,
    ) -> Result<Self, SimError> {
        check_finite(burst_size, "burst_size")?;
        check_finite(burst_frequency, "burst_frequency")?;
        check_finite(degradation_rate, "degradation_rate")?;
        if burst_size <= 0.0 {
            return Err(SimError::InvalidConfiguration(
                "burst_size must be positive".into(),
            ));
        }
        if burst_frequency < 0.0 {
            return Err(SimError::InvalidConfiguration(
                "burst_frequency must be non-negative".into(),
            ));
        }
        if degradation_rate <= 0.0 {
            return Err(SimError::InvalidConfiguration(
                "degradation_rate must be positive".into(),
            ));
        }
        Ok(Self {
            burst_size,
            burst_frequency,
            degradation_rate,
        })
    }

    pub fn burst_size(&self) -> f64 {
        self.burst_size
    }

    pub fn burst_frequency(&self) -> f64 {
        self.burst_frequency
    }

    pub fn degradation_rate(&self) -> f64 {
        self.degradation_rate
    }
}

/// Bursty model for a single gene with no feedback.
///
/// Bursts arrive at a constant rate, so the post-jump chain is sampled
/// directly: a Poisson number of uniform burst times over the horizon.
#[derive(Clone, Debug, Default)]
pub struct BurstyBase {
    params: BaseParameters,
}

impl BurstyBase {
    pub fn new(params: BaseParameters) -> Self {
        Self { params }
    }

    pub fn parameters(&self) -> &BaseParameters {
        &self.params
    }

    pub fn simulate(
        &self,
        time: &[f64],
        init_state: f64,
        seed: Option<u64>,
        verbose: bool,
    ) -> Result<Trajectory, SimError> {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        self.simulate_with_rng(time, init_state, &mut rng, verbose)
    }

    pub fn simulate_with_rng<R: Rng + ?Sized>(
        &self,
        time: &[f64],
        init_state: f64,
        rng: &mut R,
        verbose: bool,
    ) -> Result<Trajectory, SimError> {
        let BaseParameters {
            burst_size,
            burst_frequency,
            degradation_rate,
        } = self.params;
        let time = check_time_points(time)?;
        let init_state = check_init_state(&[init_state], Some(1))?[0];

        let horizon = time.last().copied().unwrap_or(0.0);
        let expected_bursts = burst_frequency * horizon;
        let n_bursts = if expected_bursts > 0.0 {
            let count: f64 = Poisson::new(expected_bursts)
                .map_err(|err| SimError::InvalidConfiguration(format!("burst count: {err}")))?
                .sample(rng);
            count as usize
        } else {
            0
        };
        let heights = Exp::new(1.0 / burst_size)
            .map_err(|err| SimError::InvalidConfiguration(format!("burst size: {err}")))?;

        let mut jump_times = Vec::with_capacity(n_bursts + 1);
        jump_times.push(0.0);
        jump_times.extend((0..n_bursts).map(|_| rng.gen_range(0.0..horizon)));
        let burst_heights: Vec<f64> = (0..n_bursts).map(|_| heights.sample(rng)).collect();
        jump_times[1..].sort_by(f64::total_cmp);

        // post-jump chain
        let mut levels = Vec::with_capacity(n_bursts + 1);
        levels.push(init_state);
        for (k, height) in burst_heights.iter().enumerate() {
            let dt = jump_times[k + 1] - jump_times[k];
            levels.push(levels[k] * (-degradation_rate * dt).exp() + height);
        }

        let mut output = vec![0.0; time.len()];
        let mut recorder = StateRecorder::new(&mut output, 1);
        for &record_time in &time {
            let k = jump_times
                .partition_point(|&s| s <= record_time)
                .saturating_sub(1);
            recorder.record_decayed(
                &levels[k..=k],
                degradation_rate,
                record_time - jump_times[k],
            );
        }

        let summary = SimulationSummary::ClosedForm {
            jumps: n_bursts as u64,
        };
        tracing::debug!(jumps = n_bursts, records = time.len(), "closed-form simulation finished");
        if verbose {
            tracing::info!("{summary}");
        }
        Ok(Trajectory {
            t: time,
            x: output,
            n_genes: 1,
            summary,
        })
    }
}

/// Deterministic slow-fast limit of [`BurstyGrn`], integrated with forward Euler.
#[derive(Clone, Debug)]
pub struct LimitGrn {
    network: Arc<Network>,
    params: ModelParameters,
}

impl LimitGrn {
    pub fn new(network: impl Into<Arc<Network>>, params: ModelParameters) -> Self {
        Self {
            network: network.into(),
            params,
        }
    }

    pub fn with_parameters(&self, params: ModelParameters) -> Self {
        Self {
            network: Arc::clone(&self.network),
            params,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    pub fn n_genes(&self) -> usize {
        self.network.n_genes
    }

    pub fn step_size(&self) -> f64 {
        LIMIT_STEP_SCALE / self.params.degradation_rate
    }

    /// `x <- (1 - dt * d) * x + dt * burst_size * kon(x)`
    fn euler_step(&self, dt: f64, x: &mut [f64], rates: &mut [f64]) {
        let params = &self.params;
        kon_sigmoid_into(
            &self.network,
            params.burst_frequency_min,
            params.burst_frequency_max,
            x,
            rates,
        );
        let retained = 1.0 - dt * params.degradation_rate;
        for (level, &rate) in x.iter_mut().zip(rates.iter()) {
            *level = retained * *level + dt * params.burst_size * rate;
        }
    }

    pub fn simulate(
        &self,
        time: &[f64],
        init_state: Option<&[f64]>,
        verbose: bool,
    ) -> Result<Trajectory, SimError> {
        let n_genes = self.n_genes();
        let time = check_time_points(time)?;
        let mut state = match init_state {
            Some(state) => check_init_state(state, Some(n_genes))?,
            None => vec![0.0; n_genes],
        };
        let step_size = self.step_size();
        let mut rates = vec![0.0; n_genes];

        let mut output = vec![0.0; time.len() * n_genes];
        let mut recorder = StateRecorder::new(&mut output, n_genes);
        let mut current_time = 0.0;
        let mut steps = 0u64;
        for &record_time in &time {
            while current_time < record_time {
                self.euler_step(step_size, &mut state, &mut rates);
                current_time += step_size;
                steps += 1;
            }
            recorder.record(&state);
        }

        let summary = SimulationSummary::Euler { steps, step_size };
        tracing::debug!(steps, step_size, records = time.len(), "limit simulation finished");
        if verbose {
            tracing::info!("{summary}");
        }
        Ok(Trajectory {
            t: time,
            x: output,
            n_genes,
            summary,
        })
    }
}

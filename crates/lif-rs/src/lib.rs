//! # LIF-RS: Mean-field kernels for LIF populations with exponential PSCs
//!
//! Pure numerical functions behind the network controller. Every kernel
//! receives fully resolved SI inputs and returns a freshly allocated result;
//! none of them holds state between calls.
//!
//! Shapes follow one convention: frequency first.
//! - transfer function: `(n_omegas, n_populations)`
//! - delay distribution / effective connectivity: `(n_omegas, n, n)`
//! - power spectra: `(n_omegas, n_populations)`
//! - eigenvalues: `(n_omegas, n)`, eigenvectors: `(n_omegas, n, n)`
//!
//! Key pieces:
//! - Self-consistent stationary rates (shifted Siegert formula)
//! - Low-pass transfer function around the Siegert slope
//! - Delay distributions (none, gaussian, truncated gaussian)
//! - Effective connectivity, propagator, sensitivity measure, power spectra

pub mod linalg;
pub mod siegert;

use meanfield_core::{Complex, KernelError, MeanFieldError, Result};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RESOLVED INPUTS
// ============================================================================

/// Single-neuron parameters in SI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronParams {
    pub tau_m: f64,    // Membrane time constant (s)
    pub tau_s: f64,    // Synaptic time constant (s)
    pub tau_r: f64,    // Refractory period (s)
    pub v_0_rel: f64,  // Reset relative to rest (V)
    pub v_th_rel: f64, // Threshold relative to rest (V)
}

impl Default for NeuronParams {
    fn default() -> Self {
        Self {
            tau_m: 10e-3,
            tau_s: 0.5e-3,
            tau_r: 2e-3,
            v_0_rel: 0.0,
            v_th_rel: 15e-3,
        }
    }
}

/// Population coupling in SI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    pub dimension: usize,
    /// In-degrees `K[target, source]`
    pub k: Array2<f64>,
    /// Weights `J[target, source]` (V)
    pub j_matrix: Array2<f64>,
    /// Weight of external synapses (V)
    pub j_ext: f64,
    /// External in-degree per population
    pub k_ext: Array1<f64>,
    /// Rate of external sources (Hz)
    pub nu_ext: f64,
}

impl Connectivity {
    pub fn check(&self) -> std::result::Result<(), KernelError> {
        let n = self.dimension;
        for (what, got) in [
            ("in-degree matrix", self.k.nrows()),
            ("weight matrix", self.j_matrix.nrows()),
            ("external in-degrees", self.k_ext.len()),
        ] {
            if got != n {
                return Err(KernelError::ShapeMismatch {
                    what: what.into(),
                    expected: n,
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Distribution of synaptic delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayDistribution {
    /// Fixed delays
    None,
    Gaussian,
    /// Gaussian truncated at zero delay
    TruncatedGaussian,
}

impl FromStr for DelayDistribution {
    type Err = MeanFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "gaussian" => Ok(Self::Gaussian),
            "truncated_gaussian" => Ok(Self::TruncatedGaussian),
            other => Err(MeanFieldError::InvalidParameter {
                name: "delay_dist".into(),
                reason: format!("unknown delay distribution '{}'", other),
            }),
        }
    }
}

/// Delay matrices in SI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayParams {
    pub delay: Array2<f64>,
    pub delay_sd: Array2<f64>,
    pub distribution: DelayDistribution,
}

/// Matrix whose eigen-structure is analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixSelector {
    /// `MH`
    EffectiveConnectivity,
    /// `prop`
    Propagator,
    /// `prop_inv`
    InversePropagator,
}

impl MatrixSelector {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::EffectiveConnectivity => "MH",
            Self::Propagator => "prop",
            Self::InversePropagator => "prop_inv",
        }
    }
}

impl fmt::Display for MatrixSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MatrixSelector {
    type Err = MeanFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MH" => Ok(Self::EffectiveConnectivity),
            "prop" => Ok(Self::Propagator),
            "prop_inv" => Ok(Self::InversePropagator),
            other => Err(MeanFieldError::UnknownMatrixSelector(other.to_string())),
        }
    }
}

/// Which part of the eigen-decomposition to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EigenMode {
    Eigenvalues,
    RightEigenvectors,
    LeftEigenvectors,
}

/// Output of [`MeanFieldKernels::eigen_spectra`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EigenSpectra {
    /// `(n_omegas, n)`
    Values(Array2<Complex>),
    /// `(n_omegas, n, n)`, eigenvectors in columns
    Vectors(Array3<Complex>),
}

/// Sensitivity of the critical eigenmode to individual connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityMeasure {
    /// Angular frequency of evaluation (Hz)
    pub omega: f64,
    pub eigenvalue_index: usize,
    /// Eigenvalue closest to 1 + 0i
    pub critical_eigenvalue: Complex,
    /// Unit direction from the critical eigenvalue towards 1 + 0i
    pub k: [f64; 2],
    /// Unit direction perpendicular to `k`
    pub k_per: [f64; 2],
    pub sensitivity: Array2<Complex>,
    /// Projection altering the peak amplitude of the spectrum
    pub sensitivity_amp: Array2<f64>,
    /// Projection altering the peak frequency of the spectrum
    pub sensitivity_freq: Array2<f64>,
}

/// Settings of the self-consistent rate iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixpointSettings {
    /// Relaxation step of `d nu / ds = -nu + Phi(nu)`
    pub step: f64,
    /// Largest admissible `|Phi(nu) - nu|` (Hz)
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FixpointSettings {
    fn default() -> Self {
        Self {
            step: 0.1,
            tolerance: 1e-7,
            max_iterations: 10_000,
        }
    }
}

// ============================================================================
// KERNEL INTERFACE
// ============================================================================

/// One pure function per cached result.
///
/// Implementations must not keep per-network state; the controller decides
/// when a kernel runs and stores what it returns.
pub trait MeanFieldKernels {
    fn firing_rates(&self, neuron: &NeuronParams, conn: &Connectivity) -> Result<Array1<f64>>;

    fn mean(&self, rates: &Array1<f64>, neuron: &NeuronParams, conn: &Connectivity) -> Result<Array1<f64>>;

    fn standard_deviation(
        &self,
        rates: &Array1<f64>,
        neuron: &NeuronParams,
        conn: &Connectivity,
    ) -> Result<Array1<f64>>;

    /// Transfer function at angular frequencies `omegas`
    fn transfer_function(
        &self,
        mu: &Array1<f64>,
        sigma: &Array1<f64>,
        neuron: &NeuronParams,
        omegas: &[f64],
    ) -> Result<Array2<Complex>>;

    fn delay_dist_matrix(&self, delays: &DelayParams, omegas: &[f64]) -> Result<Array3<Complex>>;

    fn sensitivity_measure(
        &self,
        transfer: &Array1<Complex>,
        delay_dist: &Array2<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        omega: f64,
    ) -> Result<SensitivityMeasure>;

    fn power_spectra(
        &self,
        rates: &Array1<f64>,
        transfer: &Array2<Complex>,
        delay_dist: &Array3<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        population_sizes: &Array1<f64>,
    ) -> Result<Array2<f64>>;

    fn eigen_spectra(
        &self,
        transfer: &Array2<Complex>,
        delay_dist: &Array3<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        mode: EigenMode,
        matrix: MatrixSelector,
    ) -> Result<EigenSpectra>;
}

// ============================================================================
// INPUT STATISTICS
// ============================================================================

/// Mean input `tau_m (sum_j K_ij J_ij nu_j + J_ext K_ext_i nu_ext)` in V
pub fn mean_input(rates: &Array1<f64>, neuron: &NeuronParams, conn: &Connectivity) -> Array1<f64> {
    let recurrent = (&conn.k * &conn.j_matrix).dot(rates);
    let external = &conn.k_ext * (conn.j_ext * conn.nu_ext);
    (recurrent + external) * neuron.tau_m
}

/// Input standard deviation in V
pub fn std_input(rates: &Array1<f64>, neuron: &NeuronParams, conn: &Connectivity) -> Array1<f64> {
    let recurrent = (&conn.k * &conn.j_matrix.mapv(|j| j * j)).dot(rates);
    let external = &conn.k_ext * (conn.j_ext * conn.j_ext * conn.nu_ext);
    ((recurrent + external) * neuron.tau_m).mapv(f64::sqrt)
}

// ============================================================================
// LINEAR RESPONSE
// ============================================================================

/// `W_ij = tau_m J_ij K_ij H_i D_ij` at one frequency
pub fn effective_connectivity(
    transfer: ArrayView1<Complex>,
    delay_dist: ArrayView2<Complex>,
    neuron: &NeuronParams,
    conn: &Connectivity,
) -> Array2<Complex> {
    let n = conn.dimension;
    Array2::from_shape_fn((n, n), |(i, j)| {
        transfer[i] * delay_dist[[i, j]] * (neuron.tau_m * conn.j_matrix[[i, j]] * conn.k[[i, j]])
    })
}

fn check_spectra_shapes(transfer: &Array2<Complex>, delay_dist: &Array3<Complex>) -> std::result::Result<(), KernelError> {
    if transfer.nrows() != delay_dist.len_of(Axis(0)) {
        return Err(KernelError::ShapeMismatch {
            what: "frequencies of transfer function and delay distribution".into(),
            expected: transfer.nrows(),
            got: delay_dist.len_of(Axis(0)),
        });
    }
    Ok(())
}

fn delay_factor(distribution: DelayDistribution, d: f64, sd: f64, omega: f64) -> Complex {
    let phase = Complex::new(0.0, -omega * d).exp();
    match distribution {
        DelayDistribution::None => phase,
        DelayDistribution::Gaussian => phase * (-0.5 * (sd * omega).powi(2)).exp(),
        DelayDistribution::TruncatedGaussian => {
            if sd <= 0.0 {
                return phase;
            }
            // normalised characteristic function of the density on [0, inf)
            let lower = (d - 8.0 * sd).max(0.0);
            let upper = d + 8.0 * sd;
            let density = |t: f64| (-(t - d).powi(2) / (2.0 * sd * sd)).exp();
            let norm = siegert::simpson(density, lower, upper, 400);
            let re = siegert::simpson(|t| density(t) * (omega * t).cos(), lower, upper, 400);
            let im = siegert::simpson(|t| -density(t) * (omega * t).sin(), lower, upper, 400);
            Complex::new(re, im) / norm
        }
    }
}

// ============================================================================
// DEFAULT KERNELS
// ============================================================================

/// LIF neurons with exponentially decaying synaptic currents
#[derive(Debug, Clone, Default)]
pub struct LifExpKernels {
    pub fixpoint: FixpointSettings,
}

impl LifExpKernels {
    pub fn new(fixpoint: FixpointSettings) -> Self {
        Self { fixpoint }
    }
}

impl MeanFieldKernels for LifExpKernels {
    fn firing_rates(&self, neuron: &NeuronParams, conn: &Connectivity) -> Result<Array1<f64>> {
        conn.check()?;
        let settings = &self.fixpoint;
        let mut nu = Array1::<f64>::zeros(conn.dimension);
        let mut residual = f64::INFINITY;

        for iteration in 0..settings.max_iterations {
            let mu = mean_input(&nu, neuron, conn);
            let sigma = std_input(&nu, neuron, conn);
            let target = mu
                .iter()
                .zip(sigma.iter())
                .map(|(&m, &s)| siegert::firing_rate_shift(neuron, m, s))
                .collect::<std::result::Result<Vec<f64>, KernelError>>()?;
            let target = Array1::from(target);

            let diff = &target - &nu;
            residual = diff.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
            if residual < settings.tolerance {
                tracing::debug!(iteration, residual, "firing rates converged");
                return Ok(target);
            }
            nu = (&nu + &(diff * settings.step)).mapv(|v| v.max(0.0));
        }

        Err(KernelError::NonConvergence {
            iterations: settings.max_iterations,
            residual,
        }
        .into())
    }

    fn mean(&self, rates: &Array1<f64>, neuron: &NeuronParams, conn: &Connectivity) -> Result<Array1<f64>> {
        conn.check()?;
        Ok(mean_input(rates, neuron, conn))
    }

    fn standard_deviation(
        &self,
        rates: &Array1<f64>,
        neuron: &NeuronParams,
        conn: &Connectivity,
    ) -> Result<Array1<f64>> {
        conn.check()?;
        Ok(std_input(rates, neuron, conn))
    }

    /// `H(w) = H0 / ((1 + i|w| tau_m)(1 + i|w| tau_s))` with `H0 = d nu / d mu`.
    ///
    /// Only the positive-frequency branch is evaluated; callers obtain
    /// negative frequencies by conjugation.
    fn transfer_function(
        &self,
        mu: &Array1<f64>,
        sigma: &Array1<f64>,
        neuron: &NeuronParams,
        omegas: &[f64],
    ) -> Result<Array2<Complex>> {
        if mu.len() != sigma.len() {
            return Err(KernelError::ShapeMismatch {
                what: "mean and standard deviation".into(),
                expected: mu.len(),
                got: sigma.len(),
            }
            .into());
        }
        let slopes = mu
            .iter()
            .zip(sigma.iter())
            .map(|(&m, &s)| siegert::rate_slope(neuron, m, s))
            .collect::<std::result::Result<Vec<f64>, KernelError>>()?;

        Ok(Array2::from_shape_fn((omegas.len(), mu.len()), |(w, p)| {
            let omega = omegas[w].abs();
            let membrane = Complex::new(1.0, omega * neuron.tau_m);
            let synapse = Complex::new(1.0, omega * neuron.tau_s);
            Complex::new(slopes[p], 0.0) / (membrane * synapse)
        }))
    }

    fn delay_dist_matrix(&self, delays: &DelayParams, omegas: &[f64]) -> Result<Array3<Complex>> {
        let (rows, cols) = delays.delay.dim();
        if delays.delay_sd.dim() != (rows, cols) {
            return Err(KernelError::ShapeMismatch {
                what: "delay standard deviation matrix".into(),
                expected: rows,
                got: delays.delay_sd.nrows(),
            }
            .into());
        }
        Ok(Array3::from_shape_fn((omegas.len(), rows, cols), |(w, i, j)| {
            delay_factor(delays.distribution, delays.delay[[i, j]], delays.delay_sd[[i, j]], omegas[w])
        }))
    }

    fn sensitivity_measure(
        &self,
        transfer: &Array1<Complex>,
        delay_dist: &Array2<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        omega: f64,
    ) -> Result<SensitivityMeasure> {
        conn.check()?;
        let w = effective_connectivity(transfer.view(), delay_dist.view(), neuron, conn);
        let eig = linalg::eigen_decomposition(&w)?;

        let (eigenvalue_index, critical_eigenvalue) = eig
            .values
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, Complex)>, (i, e)| match best {
                Some((_, b)) if (b - 1.0).norm() <= (e - 1.0).norm() => best,
                _ => Some((i, e)),
            })
            .ok_or_else(|| KernelError::InvalidInput("empty network".into()))?;

        let left = eig.left.column(eigenvalue_index);
        let right = eig.right.column(eigenvalue_index);
        let norm = left.dot(&right);
        let n = conn.dimension;
        let sensitivity = Array2::from_shape_fn((n, n), |(i, j)| left[i] * right[j] / norm * w[[i, j]]);

        let dx = 1.0 - critical_eigenvalue.re;
        let dy = -critical_eigenvalue.im;
        let length = (dx * dx + dy * dy).sqrt();
        // no direction towards 1+0i from 1+0i itself
        if !(length > f64::EPSILON) {
            return Err(KernelError::InvalidInput(format!(
                "critical eigenvalue {} lies on 1+0i at omega = {}",
                critical_eigenvalue, omega
            ))
            .into());
        }
        let k =[dx / length, dy / length];
        let k_per = [-k[1], k[0]];

        Ok(SensitivityMeasure {
            omega,
            eigenvalue_index,
            critical_eigenvalue,
            k,
            k_per,
            sensitivity_amp: sensitivity.mapv(|t| t.re * k[0] + t.im * k[1]),
            sensitivity_freq: sensitivity.mapv(|t| t.re * k_per[0] + t.im * k_per[1]),
            sensitivity,
        })
    }

    /// Diagonal of `(1 - W)^-1 diag(nu / N) (1 - W)^-H` per frequency
    fn power_spectra(
        &self,
        rates: &Array1<f64>,
        transfer: &Array2<Complex>,
        delay_dist: &Array3<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        population_sizes: &Array1<f64>,
    ) -> Result<Array2<f64>> {
        conn.check()?;
        check_spectra_shapes(transfer, delay_dist)?;
        let n = conn.dimension;
        let noise = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                Complex::new(rates[i] / population_sizes[i], 0.0)
            } else {
                Complex::new(0.0, 0.0)
            }
        });

        let rows = (0..transfer.nrows())
            .into_par_iter()
            .map(|f| {
                let w = effective_connectivity(
                    transfer.row(f),
                    delay_dist.index_axis(Axis(0), f),
                    neuron,
                    conn,
                );
                let q = linalg::resolvent(&w)?;
                let q_h = q.t().mapv(|x| x.conj());
                let c = q.dot(&noise).dot(&q_h);
                Ok(c.diag().mapv(|x| x.norm()))
            })
            .collect::<std::result::Result<Vec<Array1<f64>>, KernelError>>()?;

        let mut power = Array2::<f64>::zeros((rows.len(), n));
        for (f, row) in rows.into_iter().enumerate() {
            power.row_mut(f).assign(&row);
        }
        Ok(power)
    }

    fn eigen_spectra(
        &self,
        transfer: &Array2<Complex>,
        delay_dist: &Array3<Complex>,
        neuron: &NeuronParams,
        conn: &Connectivity,
        mode: EigenMode,
        matrix: MatrixSelector,
    ) -> Result<EigenSpectra> {
        conn.check()?;
        check_spectra_shapes(transfer, delay_dist)?;
        let n = conn.dimension;
        let n_omegas = transfer.nrows();

        let per_frequency = (0..n_omegas)
            .into_par_iter()
            .map(|f| {
                let w = effective_connectivity(
                    transfer.row(f),
                    delay_dist.index_axis(Axis(0), f),
                    neuron,
                    conn,
                );
                let m = match matrix {
                    MatrixSelector::EffectiveConnectivity => w,
                    MatrixSelector::Propagator => linalg::propagator(&w)?,
                    MatrixSelector::InversePropagator => {
                        linalg::inverse(&linalg::propagator(&w)?, "propagator")?
                    }
                };
                match mode {
                    EigenMode::Eigenvalues => Ok(linalg::eigenvalues(&m)?.insert_axis(Axis(1))),
                    EigenMode::RightEigenvectors => Ok(linalg::eigen_decomposition(&m)?.right),
                    EigenMode::LeftEigenvectors => Ok(linalg::eigen_decomposition(&m)?.left),
                }
            })
            .collect::<std::result::Result<Vec<Array2<Complex>>, KernelError>>()?;

        Ok(match mode {
            EigenMode::Eigenvalues => EigenSpectra::Values(Array2::from_shape_fn((n_omegas, n), |(f, k)| {
                per_frequency[f][[k, 0]]
            })),
            EigenMode::RightEigenvectors | EigenMode::LeftEigenvectors => {
                EigenSpectra::Vectors(Array3::from_shape_fn((n_omegas, n, n), |(f, i, k)| {
                    per_frequency[f][[i, k]]
                }))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::f64::consts::PI;

    fn two_population_network(weight: f64) -> Connectivity {
        Connectivity {
            dimension: 2,
            k: array![[100.0, 25.0], [80.0, 30.0]],
            j_matrix: array![[weight, -4.0 * weight], [weight, -4.0 * weight]],
            j_ext: 0.1e-3,
            k_ext: array![1200.0, 1000.0],
            nu_ext: 8.0,
        }
    }

    #[test]
    fn test_matrix_selector_tags() {
        for tag in ["MH", "prop", "prop_inv"] {
            let selector: MatrixSelector = tag.parse().unwrap();
            assert_eq!(selector.to_string(), tag);
        }
        assert!(matches!(
            "eigvals".parse::<MatrixSelector>(),
            Err(MeanFieldError::UnknownMatrixSelector(tag)) if tag == "eigvals"
        ));
    }

    #[test]
    fn test_mean_and_std_input() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.1e-3);
        let rates = array![2.0, 4.0];

        let mu = mean_input(&rates, &neuron, &conn);
        // tau_m * (100*J*2 + 25*(-4J)*4 + 1200*J_ext*8)
        let expected = 10e-3 * (100.0 * 0.1e-3 * 2.0 - 25.0 * 0.4e-3 * 4.0 + 1200.0 * 0.1e-3 * 8.0);
        assert!((mu[0] - expected).abs() < 1e-15);

        let sigma = std_input(&rates, &neuron, &conn);
        let var: f64 = 10e-3 * (100.0 * 1e-8 * 2.0 + 25.0 * 16e-8 * 4.0 + 1200.0 * 1e-8 * 8.0);
        assert!((sigma[0] - var.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_uncoupled_rates_match_siegert() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.0);
        let kernels = LifExpKernels::default();

        let rates = kernels.firing_rates(&neuron, &conn).unwrap();
        let zero = Array1::zeros(2);
        let mu = mean_input(&zero, &neuron, &conn);
        let sigma = std_input(&zero, &neuron, &conn);
        for p in 0..2 {
            let direct = siegert::firing_rate_shift(&neuron, mu[p], sigma[p]).unwrap();
            assert!((rates[p] - direct).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fixpoint_reports_nonconvergence() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.1e-3);
        let kernels = LifExpKernels::new(FixpointSettings {
            tolerance: 0.0,
            max_iterations: 3,
            ..FixpointSettings::default()
        });
        let err = kernels.firing_rates(&neuron, &conn).unwrap_err();
        assert!(matches!(err, MeanFieldError::Kernel(KernelError::NonConvergence { .. })));
    }

    #[test]
    fn test_transfer_function_is_low_pass() {
        let neuron = NeuronParams::default();
        let kernels = LifExpKernels::default();
        let mu = array![10e-3];
        let sigma = array![4e-3];
        let omegas = [0.0, 2.0 * PI * 10.0, 2.0 * PI * 100.0];

        let tf = kernels.transfer_function(&mu, &sigma, &neuron, &omegas).unwrap();
        assert_eq!(tf.dim(), (3, 1));
        assert!(tf[[0, 0]].im.abs() < 1e-12);
        assert!(tf[[1, 0]].norm() < tf[[0, 0]].norm());
        assert!(tf[[2, 0]].norm() < tf[[1, 0]].norm());

        // negative frequencies evaluate the positive branch
        let negative = kernels.transfer_function(&mu, &sigma, &neuron, &[-omegas[1]]).unwrap();
        assert_eq!(negative[[0, 0]], tf[[1, 0]]);
    }

    #[test]
    fn test_delay_distributions() {
        let kernels = LifExpKernels::default();
        let omega = 2.0 * PI * 20.0;
        let mut delays = DelayParams {
            delay: array![[1.5e-3]],
            delay_sd: array![[0.75e-3]],
            distribution: DelayDistribution::None,
        };

        let fixed = kernels.delay_dist_matrix(&delays, &[omega]).unwrap();
        assert!((fixed[[0, 0, 0]] - Complex::new(0.0, -omega * 1.5e-3).exp()).norm() < 1e-12);
        assert!((fixed[[0, 0, 0]].norm() - 1.0).abs() < 1e-12);

        delays.distribution = DelayDistribution::Gaussian;
        let gaussian = kernels.delay_dist_matrix(&delays, &[omega]).unwrap();
        assert!(gaussian[[0, 0, 0]].norm() < 1.0);

        delays.distribution = DelayDistribution::TruncatedGaussian;
        let truncated = kernels.delay_dist_matrix(&delays, &[0.0, omega]).unwrap();
        assert_eq!(truncated.dim(), (2, 1, 1));
        assert!((truncated[[0, 0, 0]] - Complex::new(1.0, 0.0)).norm() < 1e-9);
        assert!(truncated[[1, 0, 0]].norm() < 1.0);
    }

    #[test]
    fn test_power_spectra_without_coupling() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.0);
        let kernels = LifExpKernels::default();
        let rates = array![5.0, 10.0];
        let sizes = array![100.0, 50.0];
        let transfer = Array2::from_elem((2, 2), Complex::new(1.0, 0.0));
        let delay_dist = Array3::from_elem((2, 2, 2), Complex::new(1.0, 0.0));

        let power = kernels
            .power_spectra(&rates, &transfer, &delay_dist, &neuron, &conn, &sizes)
            .unwrap();
        assert_eq!(power.dim(), (2, 2));
        assert!((power[[0, 0]] - 0.05).abs() < 1e-12);
        assert!((power[[1, 1]] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_eigen_spectra_shapes() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.1e-3);
        let kernels = LifExpKernels::default();
        let transfer = Array2::from_elem((3, 2), Complex::new(20.0, -5.0));
        let delay_dist = Array3::from_elem((3, 2, 2), Complex::new(0.9, -0.1));

        match kernels
            .eigen_spectra(&transfer, &delay_dist, &neuron, &conn, EigenMode::Eigenvalues, MatrixSelector::EffectiveConnectivity)
            .unwrap()
        {
            EigenSpectra::Values(values) => assert_eq!(values.dim(), (3, 2)),
            other => panic!("unexpected {:?}", other),
        }
        match kernels
            .eigen_spectra(&transfer, &delay_dist, &neuron, &conn, EigenMode::LeftEigenvectors, MatrixSelector::Propagator)
            .unwrap()
        {
            EigenSpectra::Vectors(vectors) => assert_eq!(vectors.dim(), (3, 2, 2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sensitivity_measure_directions() {
        let neuron = NeuronParams::default();
        let conn = two_population_network(0.1e-3);
        let kernels = LifExpKernels::default();
        let transfer = array![Complex::new(30.0, -10.0), Complex::new(25.0, -8.0)];
        let delay_dist = Array2::from_elem((2, 2), Complex::new(0.8, -0.3));

        let measure = kernels
            .sensitivity_measure(&transfer, &delay_dist, &neuron, &conn, 2.0 * PI * 60.0)
            .unwrap();
        let k_len = (measure.k[0].powi(2) + measure.k[1].powi(2)).sqrt();
        assert!((k_len - 1.0).abs() < 1e-12);
        assert!((measure.k[0] * measure.k_per[0] + measure.k[1] * measure.k_per[1]).abs() < 1e-12);
        assert_eq!(measure.sensitivity.dim(), (2, 2));

        // the sensitivity matrix sums to the critical eigenvalue
        let total: Complex = measure.sensitivity.iter().sum();
        assert!((total - measure.critical_eigenvalue).norm() < 1e-8);
    }

    #[test]
    fn test_sensitivity_measure_rejects_eigenvalue_at_one() {
        // tau_m * J * K = 0.5 * 2 * 1, so W = [[1 + 0i]]
        let neuron = NeuronParams {
            tau_m: 0.5,
            ..NeuronParams::default()
        };
        let conn = Connectivity {
            dimension: 1,
            k: array![[1.0]],
            j_matrix: array![[2.0]],
            j_ext: 0.0,
            k_ext: array![0.0],
            nu_ext: 0.0,
        };
        let transfer = array![Complex::new(1.0, 0.0)];
        let delay_dist = array![[Complex::new(1.0, 0.0)]];

        let result = LifExpKernels::default().sensitivity_measure(&transfer, &delay_dist, &neuron, &conn, 0.0);
        assert!(matches!(
            result,
            Err(MeanFieldError::Kernel(KernelError::InvalidInput(_)))
        ));
    }
}

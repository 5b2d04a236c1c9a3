//! The network controller.
//!
//! A [`Network`] owns its parameters and every result computed from them.
//! Public methods resolve parameters, pull their inputs through the cache
//! and call the kernel library only on a miss.

use crate::cache::{self, slots, CacheHost, IndexLists, IndexValue, ResultStore};
use crate::io::{KeySelection, NoArchive, ParameterSource, ResultArchive, SourceId, YamlParameterFile};
use crate::params::{derive_analysis_parameters, derive_network_parameters, AnalysisParameters, NetworkParameters};
use meanfield_core::{Complex, KernelError, ParameterMap, Quantity, Result, Unit};
use meanfield_lif::{EigenMode, EigenSpectra, LifExpKernels, MatrixSelector, MeanFieldKernels, SensitivityMeasure};
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;

/// Stationary state of all populations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingPoint {
    /// Hz
    pub firing_rates: Array1<f64>,
    /// V
    pub mu: Array1<f64>,
    /// V
    pub sigma: Array1<f64>,
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

pub struct NetworkBuilder<K> {
    network_source: SourceId,
    analysis_source: SourceId,
    source: Arc<dyn ParameterSource + Send + Sync>,
    archive: Arc<dyn ResultArchive + Send + Sync>,
    kernels: K,
    network_overrides: ParameterMap,
    analysis_overrides: ParameterMap,
}

impl<K: MeanFieldKernels> NetworkBuilder<K> {
    /// Where parameter sets are read from (YAML files by default)
    pub fn source(mut self, source: Arc<dyn ParameterSource + Send + Sync>) -> Self {
        self.source = source;
        self
    }

    /// Where results are pre-seeded from and saved to (nowhere by default)
    pub fn archive(mut self, archive: Arc<dyn ResultArchive + Send + Sync>) -> Self {
        self.archive = archive;
        self
    }

    pub fn kernels<K2: MeanFieldKernels>(self, kernels: K2) -> NetworkBuilder<K2> {
        NetworkBuilder {
            network_source: self.network_source,
            analysis_source: self.analysis_source,
            source: self.source,
            archive: self.archive,
            kernels,
            network_overrides: self.network_overrides,
            analysis_overrides: self.analysis_overrides,
        }
    }

    pub fn network_overrides(mut self, overrides: ParameterMap) -> Self {
        self.network_overrides.extend(overrides);
        self
    }

    pub fn analysis_overrides(mut self, overrides: ParameterMap) -> Self {
        self.analysis_overrides.extend(overrides);
        self
    }

    pub fn build(self) -> Result<Network<K>> {
        let mut network_params = NetworkParameters::new(self.source.load(&self.network_source)?);
        network_params.merge(self.network_overrides);
        let derived = derive_network_parameters(network_params.as_map())?;
        network_params.merge(derived.into_entries());

        let mut analysis_params = AnalysisParameters::new(self.source.load(&self.analysis_source)?);
        analysis_params.merge(self.analysis_overrides);
        let derived = derive_analysis_parameters(analysis_params.as_map())?;
        analysis_params.merge(derived);

        let mut results = ResultStore::default();
        if let Some(archived) = self.archive.load_existing(&network_params)? {
            // archived results were computed on the archived frequency grid
            analysis_params.merge(archived.analysis_params);
            analysis_params.indices = archived.index_lists;
            results = archived.results;
        }

        tracing::info!(
            label = network_params.label().unwrap_or("-"),
            network = %self.network_source.path().display(),
            analysis = %self.analysis_source.path().display(),
            cached = results.len(),
            "network constructed"
        );

        Ok(Network {
            network_source: self.network_source,
            analysis_source: self.analysis_source,
            source: self.source,
            archive: self.archive,
            kernels: self.kernels,
            network_params,
            analysis_params,
            results,
        })
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// Parameters, kernels and memoized results of one network configuration
pub struct Network<K = LifExpKernels> {
    network_source: SourceId,
    analysis_source: SourceId,
    source: Arc<dyn ParameterSource + Send + Sync>,
    archive: Arc<dyn ResultArchive + Send + Sync>,
    kernels: K,
    network_params: NetworkParameters,
    analysis_params: AnalysisParameters,
    results: ResultStore,
}

impl Network<LifExpKernels> {
    pub fn builder(network: impl Into<SourceId>, analysis: impl Into<SourceId>) -> NetworkBuilder<LifExpKernels> {
        NetworkBuilder {
            network_source: network.into(),
            analysis_source: analysis.into(),
            source: Arc::new(YamlParameterFile),
            archive: Arc::new(NoArchive),
            kernels: LifExpKernels::default(),
            network_overrides: ParameterMap::new(),
            analysis_overrides: ParameterMap::new(),
        }
    }
}

impl<K> CacheHost for Network<K> {
    fn results(&self) -> &ResultStore {
        &self.results
    }

    fn results_mut(&mut self) -> &mut ResultStore {
        &mut self.results
    }

    fn index_lists(&self) -> &IndexLists {
        &self.analysis_params.indices
    }

    fn index_lists_mut(&mut self) -> &mut IndexLists {
        &mut self.analysis_params.indices
    }
}

fn angular(freq: &Quantity) -> Result<f64> {
    Ok(2.0 * PI * freq.to(Unit::Hertz)?.value)
}

impl<K: MeanFieldKernels> Network<K> {
    pub fn network_params(&self) -> &NetworkParameters {
        &self.network_params
    }

    pub fn analysis_params(&self) -> &AnalysisParameters {
        &self.analysis_params
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn kernels(&self) -> &K {
        &self.kernels
    }

    /// Names of all cached results, sorted
    pub fn list_computed_results(&self) -> Vec<String> {
        self.results.names()
    }

    /// Write results to the archive; returns the file written, if any
    pub fn save(&self, keys: &KeySelection, output_name: Option<&str>) -> Result<Option<PathBuf>> {
        self.archive
            .save(&self.results, &self.network_params, &self.analysis_params, keys, output_name)
    }

    // ------------------------------------------------------------------------
    // Working point
    // ------------------------------------------------------------------------

    /// Stationary firing rates in Hz
    pub fn firing_rates(&mut self) -> Result<Array1<f64>> {
        cache::check_and_store(self, slots::FIRING_RATES, |net| {
            let neuron = net.network_params.neuron()?;
            let conn = net.network_params.connectivity()?;
            net.kernels.firing_rates(&neuron, &conn)
        })
    }

    /// Mean input in V
    pub fn mean(&mut self) -> Result<Array1<f64>> {
        cache::check_and_store(self, slots::MEAN, |net| {
            let rates = net.firing_rates()?;
            let neuron = net.network_params.neuron()?;
            let conn = net.network_params.connectivity()?;
            net.kernels.mean(&rates, &neuron, &conn)
        })
    }

    /// Input standard deviation in V
    pub fn standard_deviation(&mut self) -> Result<Array1<f64>> {
        cache::check_and_store(self, slots::STANDARD_DEVIATION, |net| {
            let rates = net.firing_rates()?;
            let neuron = net.network_params.neuron()?;
            let conn = net.network_params.connectivity()?;
            net.kernels.standard_deviation(&rates, &neuron, &conn)
        })
    }

    /// Rates, mean and standard deviation together (not cached as a unit)
    pub fn working_point(&mut self) -> Result<WorkingPoint> {
        Ok(WorkingPoint {
            firing_rates: self.firing_rates()?,
            mu: self.mean()?,
            sigma: self.standard_deviation()?,
        })
    }

    // ------------------------------------------------------------------------
    // Delay distribution
    // ------------------------------------------------------------------------

    /// Delay distribution matrix, shape `(n_omegas, n, n)`.
    ///
    /// `None` evaluates all analysis frequencies; `Some(omega)` a single
    /// angular frequency, returned with a leading axis of length one.
    pub fn delay_dist_matrix(&mut self, omega: Option<Quantity>) -> Result<Array3<Complex>> {
        match omega {
            None => self.delay_dist_matrix_multi(),
            Some(omega) => Ok(self.delay_dist_matrix_single(omega)?.insert_axis(Axis(0))),
        }
    }

    pub fn delay_dist_matrix_multi(&mut self) -> Result<Array3<Complex>> {
        cache::check_and_store(self, slots::DELAY_DIST, |net| {
            let delays = net.network_params.delays()?;
            let omegas = net.analysis_params.omegas()?;
            net.kernels.delay_dist_matrix(&delays, &omegas)
        })
    }

    /// Delay distribution at angular frequency `omega` (used as given)
    pub fn delay_dist_matrix_single(&mut self, omega: Quantity) -> Result<Array2<Complex>> {
        cache::check_and_store_indexed(
            self,
            slots::DELAY_DIST_SINGLE,
            slots::DELAY_DIST_FREQS,
            IndexValue::Quantity(omega),
            |net| {
                let delays = net.network_params.delays()?;
                let omega = omega.to(Unit::Hertz)?.value;
                let matrix = net.kernels.delay_dist_matrix(&delays, &[omega])?;
                Ok(matrix.index_axis_move(Axis(0), 0))
            },
        )
    }

    // ------------------------------------------------------------------------
    // Transfer function
    // ------------------------------------------------------------------------

    /// Transfer function, shape `(n_omegas, n)`.
    ///
    /// `None` evaluates all analysis frequencies; `Some(f)` the ordinary
    /// frequency `f`, returned as a single row.
    pub fn transfer_function(&mut self, freq: Option<Quantity>) -> Result<Array2<Complex>> {
        match freq {
            None => self.transfer_function_multi(),
            Some(freq) => Ok(self.transfer_function_single(freq)?.insert_axis(Axis(0))),
        }
    }

    pub fn transfer_function_multi(&mut self) -> Result<Array2<Complex>> {
        cache::check_and_store(self, slots::TRANSFER_FUNCTION, |net| {
            let mu = net.mean()?;
            let sigma = net.standard_deviation()?;
            let neuron = net.network_params.neuron()?;
            let omegas = net.analysis_params.omegas()?;
            net.kernels.transfer_function(&mu, &sigma, &neuron, &omegas)
        })
    }

    pub fn transfer_function_single(&mut self, freq: Quantity) -> Result<Array1<Complex>> {
        cache::check_and_store_indexed(
            self,
            slots::TRANSFER_FUNCTION_SINGLE,
            slots::TRANSFER_FREQS,
            IndexValue::Quantity(freq),
            |net| {
                let omega = angular(&freq)?;
                let mu = net.mean()?;
                let sigma = net.standard_deviation()?;
                let neuron = net.network_params.neuron()?;
                let tf = net.kernels.transfer_function(&mu, &sigma, &neuron, &[omega])?;
                Ok(tf.index_axis_move(Axis(0), 0))
            },
        )
    }

    // ------------------------------------------------------------------------
    // Linear response
    // ------------------------------------------------------------------------

    /// Sensitivity of the critical eigenmode at ordinary frequency `freq`
    pub fn sensitivity_measure(&mut self, freq: Quantity) -> Result<SensitivityMeasure> {
        cache::check_and_store_indexed(
            self,
            slots::SENSITIVITY_MEASURE,
            slots::SENSITIVITY_FREQS,
            IndexValue::Quantity(freq),
            |net| {
                let omega = angular(&freq)?;
                let mu = net.mean()?;
                let sigma = net.standard_deviation()?;
                let neuron = net.network_params.neuron()?;
                let conn = net.network_params.connectivity()?;
                let delays = net.network_params.delays()?;

                let mut transfer = net
                    .kernels
                    .transfer_function(&mu, &sigma, &neuron, &[omega])?
                    .index_axis_move(Axis(0), 0);
                // the kernel only covers the positive-frequency branch
                if omega < 0.0 {
                    transfer.mapv_inplace(|h| h.conj());
                }
                let delay_dist = net
                    .kernels
                    .delay_dist_matrix(&delays, &[omega])?
                    .index_axis_move(Axis(0), 0);

                net.kernels
                    .sensitivity_measure(&transfer, &delay_dist, &neuron, &conn, omega)
            },
        )
    }

    /// Power spectra of all populations, shape `(n_omegas, n)`
    pub fn power_spectra(&mut self) -> Result<Array2<f64>> {
        cache::check_and_store(self, slots::POWER_SPECTRA, |net| {
            let rates = net.firing_rates()?;
            let transfer = net.transfer_function_multi()?;
            let delay_dist = net.delay_dist_matrix_multi()?;
            let neuron = net.network_params.neuron()?;
            let conn = net.network_params.connectivity()?;
            let sizes = net.network_params.population_sizes()?;
            net.kernels
                .power_spectra(&rates, &transfer, &delay_dist, &neuron, &conn, &sizes)
        })
    }

    fn eigen_spectra(&mut self, mode: EigenMode, matrix: MatrixSelector) -> Result<EigenSpectra> {
        let transfer = self.transfer_function_multi()?;
        let delay_dist = self.delay_dist_matrix_multi()?;
        let neuron = self.network_params.neuron()?;
        let conn = self.network_params.connectivity()?;
        self.kernels
            .eigen_spectra(&transfer, &delay_dist, &neuron, &conn, mode, matrix)
    }

    /// Eigenvalues of `matrix` per analysis frequency, shape `(n_omegas, n)`
    pub fn eigenvalue_spectra(&mut self, matrix: MatrixSelector) -> Result<Array2<Complex>> {
        cache::check_and_store_indexed(
            self,
            slots::EIGENVALUE_SPECTRA,
            slots::EIGENVALUE_MATRIX,
            IndexValue::Selector(matrix),
            |net| match net.eigen_spectra(EigenMode::Eigenvalues, matrix)? {
                EigenSpectra::Values(values) => Ok(values),
                EigenSpectra::Vectors(_) => Err(unexpected_spectra("eigenvalues")),
            },
        )
    }

    /// Right eigenvectors (columns) per analysis frequency, shape `(n_omegas, n, n)`
    pub fn r_eigenvec_spectra(&mut self, matrix: MatrixSelector) -> Result<Array3<Complex>> {
        cache::check_and_store_indexed(
            self,
            slots::R_EIGENVEC_SPECTRA,
            slots::R_EIGENVEC_MATRIX,
            IndexValue::Selector(matrix),
            |net| match net.eigen_spectra(EigenMode::RightEigenvectors, matrix)? {
                EigenSpectra::Vectors(vectors) => Ok(vectors),
                EigenSpectra::Values(_) => Err(unexpected_spectra("right eigenvectors")),
            },
        )
    }

    /// Left eigenvectors (columns) per analysis frequency, shape `(n_omegas, n, n)`
    pub fn l_eigenvec_spectra(&mut self, matrix: MatrixSelector) -> Result<Array3<Complex>> {
        cache::check_and_store_indexed(
            self,
            slots::L_EIGENVEC_SPECTRA,
            slots::L_EIGENVEC_MATRIX,
            IndexValue::Selector(matrix),
            |net| match net.eigen_spectra(EigenMode::LeftEigenvectors, matrix)? {
                EigenSpectra::Vectors(vectors) => Ok(vectors),
                EigenSpectra::Values(_) => Err(unexpected_spectra("left eigenvectors")),
            },
        )
    }
}

fn unexpected_spectra(expected: &str) -> meanfield_core::MeanFieldError {
    KernelError::InvalidInput(format!("eigen kernel did not return {}", expected)).into()
}

impl<K: MeanFieldKernels + Clone> Network<K> {
    /// A new network from the same sources with some parameters replaced.
    ///
    /// The current parameter maps plus the changes become the overrides of
    /// the new network; derived entries are recomputed and no result or
    /// index list is carried over.
    pub fn change_parameters(&self, changed_network: ParameterMap, changed_analysis: ParameterMap) -> Result<Network<K>> {
        let mut network_overrides = self.network_params.as_map().clone();
        network_overrides.extend(changed_network);
        let mut analysis_overrides = self.analysis_params.as_map().clone();
        analysis_overrides.extend(changed_analysis);

        NetworkBuilder {
            network_source: self.network_source.clone(),
            analysis_source: self.analysis_source.clone(),
            source: Arc::clone(&self.source),
            archive: Arc::clone(&self.archive),
            kernels: self.kernels.clone(),
            network_overrides,
            analysis_overrides,
        }
        .build()
    }
}

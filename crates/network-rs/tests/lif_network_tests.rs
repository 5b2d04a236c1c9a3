//! End-to-end analyses of a small network with the default LIF kernels.

use meanfield_core::{MeanFieldError, ParamValue, ParameterMap, Quantity, Result, Unit};
use meanfield_lif::{siegert, LifExpKernels, MatrixSelector, MeanFieldKernels};
use meanfield_network::{Network, ParameterSource, SourceId};
use ndarray::{array, Axis};
use std::f64::consts::PI;
use std::sync::Arc;

struct InMemory {
    network: ParameterMap,
    analysis: ParameterMap,
}

impl ParameterSource for InMemory {
    fn load(&self, id: &SourceId) -> Result<ParameterMap> {
        match id.path().to_str() {
            Some("network") => Ok(self.network.clone()),
            Some("analysis") => Ok(self.analysis.clone()),
            _ => Err(MeanFieldError::ParseError(format!("unknown source {:?}", id))),
        }
    }
}

/// Excitatory and inhibitory population driven above threshold
fn network() -> Network {
    let mut net = ParameterMap::new();
    net.insert("label".into(), ParamValue::text("ei_pair"));
    net.insert("dimension".into(), ParamValue::scalar(2.0, Unit::Dimensionless));
    net.insert("tau_m".into(), ParamValue::scalar(10.0, Unit::Millisecond));
    net.insert("tau_s".into(), ParamValue::scalar(0.5, Unit::Millisecond));
    net.insert("tau_r".into(), ParamValue::scalar(2.0, Unit::Millisecond));
    net.insert("V_0_rel".into(), ParamValue::scalar(0.0, Unit::Millivolt));
    net.insert("V_th_rel".into(), ParamValue::scalar(15.0, Unit::Millivolt));
    net.insert("K".into(), ParamValue::matrix(array![[100.0, 25.0], [80.0, 30.0]], Unit::Dimensionless));
    net.insert("J".into(), ParamValue::matrix(array![[0.1, -0.4], [0.1, -0.4]], Unit::Millivolt));
    net.insert("j".into(), ParamValue::scalar(0.15, Unit::Millivolt));
    net.insert("K_ext".into(), ParamValue::vector(array![2000.0, 1800.0], Unit::Dimensionless));
    net.insert("nu_ext".into(), ParamValue::scalar(8.0, Unit::Hertz));
    net.insert("Delay".into(), ParamValue::matrix(array![[1.5, 0.75], [1.5, 0.75]], Unit::Millisecond));
    net.insert("Delay_sd".into(), ParamValue::matrix(array![[0.75, 0.375], [0.75, 0.375]], Unit::Millisecond));
    net.insert("delay_dist".into(), ParamValue::text("truncated_gaussian"));
    net.insert("N".into(), ParamValue::vector(array![400.0, 100.0], Unit::Dimensionless));

    let mut analysis = ParameterMap::new();
    analysis.insert("f_min".into(), ParamValue::scalar(0.0, Unit::Hertz));
    analysis.insert("f_max".into(), ParamValue::scalar(100.0, Unit::Hertz));
    analysis.insert("df".into(), ParamValue::scalar(10.0, Unit::Hertz));

    Network::builder("network", "analysis")
        .source(Arc::new(InMemory { network: net, analysis }))
        .build()
        .unwrap()
}

#[test]
fn test_working_point_is_self_consistent() {
    let mut net = network();
    let wp = net.working_point().unwrap();
    let neuron = net.network_params().neuron().unwrap();

    for p in 0..2 {
        assert!(wp.firing_rates[p] > 0.0);
        assert!(wp.firing_rates[p] < 1.0 / neuron.tau_r);
        let rate = siegert::firing_rate_shift(&neuron, wp.mu[p], wp.sigma[p]).unwrap();
        assert!((rate - wp.firing_rates[p]).abs() < 1e-5);
    }
}

#[test]
fn test_spectra_shapes() {
    let mut net = network();
    let power = net.power_spectra().unwrap();
    assert_eq!(power.dim(), (10, 2));
    assert!(power.iter().all(|p| p.is_finite() && *p > 0.0));

    let values = net.eigenvalue_spectra(MatrixSelector::EffectiveConnectivity).unwrap();
    assert_eq!(values.dim(), (10, 2));
    let left = net.l_eigenvec_spectra(MatrixSelector::Propagator).unwrap();
    let right = net.r_eigenvec_spectra(MatrixSelector::Propagator).unwrap();
    assert_eq!(left.dim(), (10, 2, 2));

    // left and right eigenvectors are biorthonormal at every frequency
    for f in 0..10 {
        let l = left.index_axis(Axis(0), f);
        let r = right.index_axis(Axis(0), f);
        let product = l.t().dot(&r);
        for ((i, k), v) in product.indexed_iter() {
            let expected = if i == k { 1.0 } else { 0.0 };
            assert!((v.re - expected).abs() < 1e-6 && v.im.abs() < 1e-6);
        }
    }
}

#[test]
fn test_sensitivity_at_negative_frequency() {
    let mut net = network();
    let freq = Quantity::hz(-40.0);
    let measure = net.sensitivity_measure(freq).unwrap();

    // same inputs, computed by hand: kernel value at -omega, conjugated
    let omega = -2.0 * PI * 40.0;
    let kernels = LifExpKernels::default();
    let neuron = net.network_params().neuron().unwrap();
    let conn = net.network_params().connectivity().unwrap();
    let delays = net.network_params().delays().unwrap();
    let mu = net.mean().unwrap();
    let sigma = net.standard_deviation().unwrap();
    let transfer = kernels
        .transfer_function(&mu, &sigma, &neuron, &[omega])
        .unwrap()
        .index_axis_move(Axis(0), 0)
        .mapv(|h| h.conj());
    let delay_dist = kernels
        .delay_dist_matrix(&delays, &[omega])
        .unwrap()
        .index_axis_move(Axis(0), 0);
    let expected = kernels
        .sensitivity_measure(&transfer, &delay_dist, &neuron, &conn, omega)
        .unwrap();
    assert_eq!(measure, expected);

    // mirrored frequency: same amplitude projection, mirrored frequency projection
    let mirrored = net.sensitivity_measure(Quantity::hz(40.0)).unwrap();
    for (a, b) in measure.sensitivity_amp.iter().zip(mirrored.sensitivity_amp.iter()) {
        assert!((a - b).abs() < 1e-8);
    }
    for (a, b) in measure.sensitivity_freq.iter().zip(mirrored.sensitivity_freq.iter()) {
        assert!((a + b).abs() < 1e-8);
    }
}

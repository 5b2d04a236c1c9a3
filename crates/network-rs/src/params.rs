//! Network and analysis parameter records.
//!
//! Both records are owned maps that are merged, never aliased. Derived
//! entries are recomputed from scratch on every network construction.

use crate::cache::IndexLists;
use meanfield_core::{require, MeanFieldError, ParamValue, ParameterMap, Quantity, Result, Unit};
use meanfield_lif::{Connectivity, DelayDistribution, DelayParams, NeuronParams};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of populations in the cortical microcircuit (L2/3, L4, L5, L6; E and I)
pub const MICROCIRCUIT_POPULATIONS: usize = 8;

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Network layout selected by the `label` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Microcircuit,
    Unrecognized(String),
}

impl Topology {
    pub fn from_label(label: &str) -> Self {
        match label {
            "microcircuit" => Topology::Microcircuit,
            other => Topology::Unrecognized(other.to_string()),
        }
    }

    pub fn of(params: &ParameterMap) -> Result<Self> {
        Ok(Self::from_label(require(params, "label")?.as_text("label")?))
    }
}

/// Entries derived for the microcircuit layout
#[derive(Debug, Clone, PartialEq)]
pub struct MicrocircuitDerived {
    /// Weight in mV
    pub j: Quantity,
    pub v_0_rel: Quantity,
    pub v_th_rel: Quantity,
    pub d_e_sd: Quantity,
    pub d_i_sd: Quantity,
    /// Weight matrix in mV
    pub weights: Array2<f64>,
    /// Delay matrix in ms
    pub delays: Array2<f64>,
    /// Delay standard deviation matrix in ms
    pub delay_sd: Array2<f64>,
    pub dimension: usize,
}

/// Derived network parameters, one variant per topology
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedParameters {
    Microcircuit(MicrocircuitDerived),
    /// Topologies without derivation rules contribute nothing
    Empty,
}

impl DerivedParameters {
    pub fn into_entries(self) -> ParameterMap {
        let mut entries = ParameterMap::new();
        if let DerivedParameters::Microcircuit(d) = self {
            entries.insert("j".into(), d.j.into());
            entries.insert("V_0_rel".into(), d.v_0_rel.into());
            entries.insert("V_th_rel".into(), d.v_th_rel.into());
            entries.insert("d_e_sd".into(), d.d_e_sd.into());
            entries.insert("d_i_sd".into(), d.d_i_sd.into());
            entries.insert("J".into(), ParamValue::matrix(d.weights, Unit::Millivolt));
            entries.insert("Delay".into(), ParamValue::matrix(d.delays, Unit::Millisecond));
            entries.insert("Delay_sd".into(), ParamValue::matrix(d.delay_sd, Unit::Millisecond));
            entries.insert(
                "dimension".into(),
                ParamValue::scalar(d.dimension as f64, Unit::Dimensionless),
            );
        }
        entries
    }
}

fn quantity(params: &ParameterMap, name: &str) -> Result<Quantity> {
    require(params, name)?.as_quantity().ok_or_else(|| MeanFieldError::InvalidParameter {
        name: name.to_string(),
        reason: "expected a scalar quantity".into(),
    })
}

/// Uniform matrix with odd rows replaced, then transposed.
///
/// Rows index the presynaptic population before transposition, so after it
/// every column of an inhibitory source carries `inhibitory`.
fn alternating_transposed(excitatory: f64, inhibitory: f64) -> Array2<f64> {
    let n = MICROCIRCUIT_POPULATIONS;
    let mut m = Array2::from_elem((n, n), excitatory);
    for row in (1..n).step_by(2) {
        m.row_mut(row).fill(inhibitory);
    }
    m.reversed_axes()
}

fn derive_microcircuit(params: &ParameterMap) -> Result<MicrocircuitDerived> {
    let tau_s = require(params, "tau_s")?.scalar_si("tau_s")?;
    let w = require(params, "w")?.scalar_si("w")?;
    let c = require(params, "C")?.scalar_si("C")?;
    let j = Quantity::new(tau_s * w / c, Unit::Volt).to(Unit::Millivolt)?;

    let v_th_abs = quantity(params, "V_th_abs")?.to(Unit::Millivolt)?;
    let v_0_abs = quantity(params, "V_0_abs")?.to(Unit::Millivolt)?;

    let d_e = quantity(params, "d_e")?.to(Unit::Millisecond)?;
    let d_i = quantity(params, "d_i")?.to(Unit::Millisecond)?;
    let d_e_sd = d_e.scale(0.5);
    let d_i_sd = d_i.scale(0.5);

    let g = require(params, "g")?.scalar_si("g")?;
    let mut weights = alternating_transposed(j.value, -g * j.value);
    // L4E -> L2/3E connections are twice as strong
    weights[[0, 2]] *= 2.0;

    let populations = require(params, "populations")?.as_text_list("populations")?;

    Ok(MicrocircuitDerived {
        j,
        v_0_rel: Quantity::mv(0.0),
        v_th_rel: Quantity::mv(v_th_abs.value - v_0_abs.value),
        d_e_sd,
        d_i_sd,
        weights,
        delays: alternating_transposed(d_e.value, d_i.value),
        delay_sd: alternating_transposed(d_e_sd.value, d_i_sd.value),
        dimension: populations.len(),
    })
}

/// Parameters implied by the topology named in `label`
pub fn derive_network_parameters(params: &ParameterMap) -> Result<DerivedParameters> {
    match Topology::of(params)? {
        Topology::Microcircuit => Ok(DerivedParameters::Microcircuit(derive_microcircuit(params)?)),
        Topology::Unrecognized(label) => {
            // Accepted for now; a stricter build could reject unknown labels here.
            tracing::warn!(label = %label, "no derivation rules for network label");
            Ok(DerivedParameters::Empty)
        }
    }
}

/// `arange(2 pi f_min, 2 pi f_max, 2 pi df)` in Hz
pub fn angular_frequencies(f_min: f64, f_max: f64, df: f64) -> Result<Vec<f64>> {
    if !(df > 0.0) || !df.is_finite() || !f_min.is_finite() || !f_max.is_finite() {
        return Err(MeanFieldError::NonTerminatingRange(df));
    }
    let (w_min, w_max, dw) = (2.0 * PI * f_min, 2.0 * PI * f_max, 2.0 * PI * df);
    let count = ((w_max - w_min) / dw).ceil().max(0.0) as usize;
    Ok((0..count).map(|i| w_min + i as f64 * dw).collect())
}

/// Parameters implied by the analysis settings (currently `omegas`)
pub fn derive_analysis_parameters(params: &ParameterMap) -> Result<ParameterMap> {
    let f_min = require(params, "f_min")?.scalar_si("f_min")?;
    let f_max = require(params, "f_max")?.scalar_si("f_max")?;
    let df = require(params, "df")?.scalar_si("df")?;

    let omegas = angular_frequencies(f_min, f_max, df)?;
    let mut derived = ParameterMap::new();
    derived.insert("omegas".into(), ParamValue::vector(Array1::from(omegas), Unit::Hertz));
    Ok(derived)
}

// ============================================================================
// PARAMETER RECORDS
// ============================================================================

/// Network parameters: user entries plus derived ones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameters {
    params: ParameterMap,
}

impl NetworkParameters {
    pub fn new(params: ParameterMap) -> Self {
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ParamValue> {
        require(&self.params, name)
    }

    /// Merge `entries`, replacing existing values of the same name
    pub fn merge(&mut self, entries: ParameterMap) {
        self.params.extend(entries);
    }

    pub fn as_map(&self) -> &ParameterMap {
        &self.params
    }

    pub fn label(&self) -> Option<&str> {
        match self.params.get("label") {
            Some(ParamValue::Text(label)) => Some(label),
            _ => None,
        }
    }

    pub fn dimension(&self) -> Result<usize> {
        let value = self.require("dimension")?.scalar_si("dimension")?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(MeanFieldError::InvalidParameter {
                name: "dimension".into(),
                reason: format!("expected a population count, got {}", value),
            });
        }
        Ok(value as usize)
    }

    pub fn neuron(&self) -> Result<NeuronParams> {
        let scalar = |name: &str| self.require(name)?.scalar_si(name);
        Ok(NeuronParams {
            tau_m: scalar("tau_m")?,
            tau_s: scalar("tau_s")?,
            tau_r: scalar("tau_r")?,
            v_0_rel: scalar("V_0_rel")?,
            v_th_rel: scalar("V_th_rel")?,
        })
    }

    pub fn connectivity(&self) -> Result<Connectivity> {
        let dimension = self.dimension()?;
        Ok(Connectivity {
            dimension,
            k: self.require("K")?.matrix_si("K", dimension)?,
            j_matrix: self.require("J")?.matrix_si("J", dimension)?,
            j_ext: self.require("j")?.scalar_si("j")?,
            k_ext: self.require("K_ext")?.vector_si("K_ext", dimension)?,
            nu_ext: self.require("nu_ext")?.scalar_si("nu_ext")?,
        })
    }

    pub fn delays(&self) -> Result<DelayParams> {
        let dimension = self.dimension()?;
        Ok(DelayParams {
            delay: self.require("Delay")?.matrix_si("Delay", dimension)?,
            delay_sd: self.require("Delay_sd")?.matrix_si("Delay_sd", dimension)?,
            distribution: self.require("delay_dist")?.as_text("delay_dist")?.parse::<DelayDistribution>()?,
        })
    }

    /// Neurons per population
    pub fn population_sizes(&self) -> Result<Array1<f64>> {
        let dimension = self.dimension()?;
        self.require("N")?.vector_si("N", dimension)
    }
}

/// Analysis parameters plus the index lists of frequency-indexed results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParameters {
    params: ParameterMap,
    pub(crate) indices: IndexLists,
}

impl AnalysisParameters {
    pub fn new(params: ParameterMap) -> Self {
        Self {
            params,
            indices: IndexLists::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ParamValue> {
        require(&self.params, name)
    }

    pub fn merge(&mut self, entries: ParameterMap) {
        self.params.extend(entries);
    }

    pub fn as_map(&self) -> &ParameterMap {
        &self.params
    }

    pub fn index_lists(&self) -> &IndexLists {
        &self.indices
    }

    /// Angular analysis frequencies in Hz
    pub fn omegas(&self) -> Result<Vec<f64>> {
        Ok(self.require("omegas")?.sequence_si("omegas")?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn microcircuit_params() -> ParameterMap {
        let mut p = ParameterMap::new();
        p.insert("label".into(), ParamValue::text("microcircuit"));
        p.insert(
            "populations".into(),
            ParamValue::TextList(
                ["23E", "23I", "4E", "4I", "5E", "5I", "6E", "6I"].iter().map(|s| s.to_string()).collect(),
            ),
        );
        p.insert("tau_s".into(), ParamValue::scalar(0.5, Unit::Millisecond));
        p.insert("w".into(), ParamValue::scalar(87.8, Unit::Picoampere));
        p.insert("C".into(), ParamValue::scalar(250.0, Unit::Picofarad));
        p.insert("V_th_abs".into(), ParamValue::scalar(-50.0, Unit::Millivolt));
        p.insert("V_0_abs".into(), ParamValue::scalar(-65.0, Unit::Millivolt));
        p.insert("d_e".into(), ParamValue::scalar(1.5, Unit::Millisecond));
        p.insert("d_i".into(), ParamValue::scalar(0.75, Unit::Millisecond));
        p.insert("g".into(), ParamValue::scalar(4.0, Unit::Dimensionless));
        p
    }

    #[test]
    fn test_microcircuit_derivation() {
        let derived = match derive_network_parameters(&microcircuit_params()).unwrap() {
            DerivedParameters::Microcircuit(d) => d,
            DerivedParameters::Empty => panic!("microcircuit must derive parameters"),
        };

        // 0.5 ms * 87.8 pA / 250 pF = 0.1756 mV
        assert_eq!(derived.j.unit, Unit::Millivolt);
        assert!((derived.j.value - 0.1756).abs() < 1e-12);
        assert!((derived.v_th_rel.value - 15.0).abs() < 1e-12);
        assert_eq!(derived.v_0_rel, Quantity::mv(0.0));
        assert_eq!(derived.d_i_sd, Quantity::ms(0.375));
        assert_eq!(derived.dimension, 8);

        // columns of inhibitory sources carry the inhibitory delay
        assert_eq!(derived.delays[[0, 1]], 0.75);
        assert_eq!(derived.delays[[1, 0]], 1.5);
        assert_eq!(derived.delay_sd[[3, 3]], 0.375);
    }

    #[test]
    fn test_unrecognized_topology_derives_nothing() {
        let mut params = microcircuit_params();
        params.insert("label".into(), ParamValue::text("brunel_a"));
        let derived = derive_network_parameters(&params).unwrap();
        assert_eq!(derived, DerivedParameters::Empty);
        assert!(derived.into_entries().is_empty());
    }

    #[test]
    fn test_missing_label() {
        let mut params = microcircuit_params();
        params.remove("label");
        assert!(matches!(
            derive_network_parameters(&params),
            Err(MeanFieldError::MissingParameter(name)) if name == "label"
        ));
    }

    #[test]
    fn test_angular_frequencies() {
        let omegas = angular_frequencies(0.0, 10.0, 2.5).unwrap();
        assert_eq!(omegas.len(), 4);
        for (i, w) in omegas.iter().enumerate() {
            assert!((w - 5.0 * PI * i as f64).abs() < 1e-12);
        }
        assert!(angular_frequencies(10.0, 0.0, 1.0).unwrap().is_empty());
        assert!(matches!(
            angular_frequencies(0.0, 10.0, 0.0),
            Err(MeanFieldError::NonTerminatingRange(_))
        ));
        assert!(angular_frequencies(0.0, 10.0, -1.0).is_err());
        assert!(angular_frequencies(0.0, 10.0, f64::NAN).is_err());
    }

    #[test]
    fn test_connectivity_resolution() {
        let mut map = ParameterMap::new();
        map.insert("dimension".into(), ParamValue::scalar(2.0, Unit::Dimensionless));
        map.insert("K".into(), ParamValue::matrix(array![[10.0, 5.0], [10.0, 5.0]], Unit::Dimensionless));
        map.insert("J".into(), ParamValue::matrix(array![[0.1, -0.4], [0.1, -0.4]], Unit::Millivolt));
        map.insert("j".into(), ParamValue::scalar(0.1, Unit::Millivolt));
        map.insert("K_ext".into(), ParamValue::scalar(100.0, Unit::Dimensionless));
        map.insert("nu_ext".into(), ParamValue::scalar(8.0, Unit::Hertz));
        let params = NetworkParameters::new(map);

        let conn = params.connectivity().unwrap();
        assert_eq!(conn.dimension, 2);
        assert!((conn.j_matrix[[0, 1]] + 0.4e-3).abs() < 1e-18);
        assert_eq!(conn.k_ext, array![100.0, 100.0]);
        assert!(matches!(params.neuron(), Err(MeanFieldError::MissingParameter(_))));
    }
}

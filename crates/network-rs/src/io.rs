//! Parameter files and result archives.
//!
//! Parameter files are YAML maps whose entries are either bare values or
//! `{val, unit}` pairs:
//!
//! ```yaml
//! label: microcircuit
//! populations: [23E, 23I]
//! tau_m: {val: 10.0, unit: ms}
//! K: {val: [[100, 25], [80, 30]], unit: dimensionless}
//! ```
//!
//! Results are archived as JSON, one file per parameter set, named after the
//! network label and a SHA-256 digest of the network parameters.

use crate::cache::{IndexLists, ResultStore};
use crate::params::{AnalysisParameters, NetworkParameters};
use meanfield_core::{MeanFieldError, ParamValue, ParameterMap, Result, Unit};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the default archive directory
pub const RESULTS_DIR_ENV: &str = "MEANFIELD_RESULTS_DIR";

/// Identifier of a parameter set, usually a file path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub PathBuf);

impl SourceId {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId(PathBuf::from(s))
    }
}

impl From<PathBuf> for SourceId {
    fn from(p: PathBuf) -> Self {
        SourceId(p)
    }
}

impl From<&Path> for SourceId {
    fn from(p: &Path) -> Self {
        SourceId(p.to_path_buf())
    }
}

// ============================================================================
// PARAMETER SOURCES
// ============================================================================

pub trait ParameterSource {
    fn load(&self, id: &SourceId) -> Result<ParameterMap>;
}

/// YAML parameter files on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParameterFile;

impl ParameterSource for YamlParameterFile {
    fn load(&self, id: &SourceId) -> Result<ParameterMap> {
        let text = fs::read_to_string(id.path())?;
        let params = parse_parameters(&text)?;
        tracing::info!(path = %id.path().display(), entries = params.len(), "loaded parameters");
        Ok(params)
    }
}

fn parse_error(name: &str, reason: impl std::fmt::Display) -> MeanFieldError {
    MeanFieldError::ParseError(format!("{}: {}", name, reason))
}

fn number(name: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| parse_error(name, format!("expected a number, got {:?}", value)))
}

fn numeric_value(name: &str, value: &Value, unit: Unit) -> Result<ParamValue> {
    match value {
        Value::Sequence(rows) if rows.first().map_or(false, Value::is_sequence) => {
            let n_rows = rows.len();
            let mut data = Vec::new();
            let mut n_cols = None;
            for row in rows {
                let row = row
                    .as_sequence()
                    .ok_or_else(|| parse_error(name, "mixed vector and matrix rows"))?;
                if *n_cols.get_or_insert(row.len()) != row.len() {
                    return Err(parse_error(name, "ragged matrix"));
                }
                for v in row {
                    data.push(number(name, v)?);
                }
            }
            let matrix = Array2::from_shape_vec((n_rows, n_cols.unwrap_or(0)), data)
                .map_err(|e| parse_error(name, e))?;
            Ok(ParamValue::matrix(matrix, unit))
        }
        Value::Sequence(items) => {
            let values = items.iter().map(|v| number(name, v)).collect::<Result<Vec<f64>>>()?;
            Ok(ParamValue::vector(Array1::from(values), unit))
        }
        other => Ok(ParamValue::scalar(number(name, other)?, unit)),
    }
}

fn parse_value(name: &str, value: &Value) -> Result<ParamValue> {
    match value {
        Value::Mapping(map) => {
            let val = map
                .get("val")
                .ok_or_else(|| parse_error(name, "quantity without 'val'"))?;
            let unit = match map.get("unit") {
                Some(Value::String(symbol)) => symbol.parse::<Unit>()?,
                Some(other) => return Err(parse_error(name, format!("invalid unit {:?}", other))),
                None => Unit::Dimensionless,
            };
            numeric_value(name, val, unit)
        }
        Value::String(text) => Ok(ParamValue::Text(text.clone())),
        Value::Sequence(items) if items.iter().all(Value::is_string) && !items.is_empty() => Ok(
            ParamValue::TextList(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()),
        ),
        // unquoted population names such as `23E` may parse as numbers
        Value::Sequence(items) if items.iter().any(Value::is_string) => Ok(ParamValue::TextList(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(parse_error(name, format!("invalid list entry {:?}", other))),
                })
                .collect::<Result<Vec<String>>>()?,
        )),
        other => numeric_value(name, other, Unit::Dimensionless),
    }
}

/// Parse the YAML parameter format into a [`ParameterMap`]
pub fn parse_parameters(text: &str) -> Result<ParameterMap> {
    let document: Value = serde_yaml::from_str(text).map_err(|e| MeanFieldError::ParseError(e.to_string()))?;
    let mapping = match document {
        Value::Mapping(m) => m,
        Value::Null => return Ok(ParameterMap::new()),
        _ => return Err(MeanFieldError::ParseError("parameter file must be a map".into())),
    };

    let mut params = ParameterMap::new();
    for (key, value) in &mapping {
        let name = key
            .as_str()
            .ok_or_else(|| MeanFieldError::ParseError(format!("non-text parameter name {:?}", key)))?;
        params.insert(name.to_string(), parse_value(name, value)?);
    }
    Ok(params)
}

/// Parse a `name=value[unit]` override such as `g=5`, `tau_m=10ms` or `delay_dist=gaussian`
pub fn parse_override(assignment: &str) -> Result<(String, ParamValue)> {
    let (name, raw) = assignment
        .split_once('=')
        .ok_or_else(|| MeanFieldError::ParseError(format!("expected name=value, got '{}'", assignment)))?;
    let name = name.trim();
    let raw = raw.trim();
    if name.is_empty() {
        return Err(MeanFieldError::ParseError(format!("missing name in '{}'", assignment)));
    }

    let split = raw
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value = match number.trim().parse::<f64>() {
        Ok(v) => ParamValue::scalar(v, unit.trim().parse::<Unit>()?),
        Err(_) => ParamValue::text(raw),
    };
    Ok((name.to_string(), value))
}

// ============================================================================
// RESULT ARCHIVES
// ============================================================================

/// Which network parameters enter the archive digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl KeySelection {
    fn select(&self, params: &ParameterMap) -> ParameterMap {
        match self {
            KeySelection::All => params.clone(),
            KeySelection::Only(names) => params
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

/// On-disk content of an archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchivedResults {
    pub network_params: ParameterMap,
    pub analysis_params: ParameterMap,
    pub index_lists: IndexLists,
    pub results: ResultStore,
}

pub trait ResultArchive {
    /// Results stored earlier for exactly these network parameters
    fn load_existing(&self, network: &NetworkParameters) -> Result<Option<ArchivedResults>>;

    /// Store results; returns the location written, if any
    fn save(
        &self,
        results: &ResultStore,
        network: &NetworkParameters,
        analysis: &AnalysisParameters,
        keys: &KeySelection,
        output_name: Option<&str>,
    ) -> Result<Option<PathBuf>>;
}

/// Keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArchive;

impl ResultArchive for NoArchive {
    fn load_existing(&self, _network: &NetworkParameters) -> Result<Option<ArchivedResults>> {
        Ok(None)
    }

    fn save(
        &self,
        _results: &ResultStore,
        _network: &NetworkParameters,
        _analysis: &AnalysisParameters,
        _keys: &KeySelection,
        _output_name: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        tracing::debug!("results not archived");
        Ok(None)
    }
}

/// JSON files in one directory
#[derive(Debug, Clone)]
pub struct JsonArchive {
    dir: PathBuf,
}

impl JsonArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory from `MEANFIELD_RESULTS_DIR`, else the working directory
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(RESULTS_DIR_ENV).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 of the selected network parameters
    pub fn digest(network: &NetworkParameters, keys: &KeySelection) -> Result<String> {
        let selected = keys.select(network.as_map());
        let bytes = serde_json::to_vec(&selected).map_err(|e| MeanFieldError::ParseError(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn path_for(&self, network: &NetworkParameters, keys: &KeySelection) -> Result<PathBuf> {
        let label = network.label().unwrap_or("network");
        Ok(self.dir.join(format!("{}_{}.json", label, Self::digest(network, keys)?)))
    }
}

impl ResultArchive for JsonArchive {
    fn load_existing(&self, network: &NetworkParameters) -> Result<Option<ArchivedResults>> {
        let path = self.path_for(network, &KeySelection::All)?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no archived results");
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let archived: ArchivedResults =
            serde_json::from_str(&text).map_err(|e| MeanFieldError::ParseError(e.to_string()))?;
        tracing::info!(path = %path.display(), results = archived.results.len(), "loaded archived results");
        Ok(Some(archived))
    }

    fn save(
        &self,
        results: &ResultStore,
        network: &NetworkParameters,
        analysis: &AnalysisParameters,
        keys: &KeySelection,
        output_name: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let path = match output_name {
            Some(name) if !name.is_empty() => self.dir.join(format!("{}.json", name)),
            _ => self.path_for(network, keys)?,
        };
        let archived = ArchivedResults {
            network_params: network.as_map().clone(),
            analysis_params: analysis.as_map().clone(),
            index_lists: analysis.index_lists().clone(),
            results: results.clone(),
        };
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(&archived).map_err(|e| MeanFieldError::ParseError(e.to_string()))?;
        fs::write(&path, json)?;
        tracing::info!(path = %path.display(), results = results.len(), "saved results");
        Ok(Some(path))
    }
}

//! # Meanfield Core
//!
//! Shared types for mean-field analysis of spiking population networks.
//!
//! ## Contents
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Unit`], [`Quantity`] | Unit-tagged scalars with SI conversion |
//! | [`Magnitude`], [`ParamValue`] | Scalar/vector/matrix parameter values |
//! | [`ParameterMap`] | Named parameter collection |
//! | [`MeanFieldError`], [`KernelError`] | Error kinds shared by all crates |
//!
//! ## Conventions
//!
//! 1. Parameters keep the unit they were declared with
//! 2. Kernels only ever see SI magnitudes (s, V, A, F, Hz)
//! 3. Angular frequencies are tagged with `Hz`, like ordinary ones

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Complex scalar used for all frequency-domain quantities
pub type Complex = num_complex::Complex64;

/// Failures inside a numerical kernel
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("Singular matrix while computing {0}")]
    SingularMatrix(String),

    #[error("Fixpoint iteration did not converge after {iterations} steps (residual {residual:e})")]
    NonConvergence { iterations: usize, residual: f64 },

    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid kernel input: {0}")]
    InvalidInput(String),
}

/// Common errors
#[derive(Debug, Error)]
pub enum MeanFieldError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Frequency step must be positive, got {0}")]
    NonTerminatingRange(f64),

    #[error("Unknown matrix selector: {0} (expected MH, prop or prop_inv)")]
    UnknownMatrixSelector(String),

    #[error("Unit mismatch: expected {expected}, got {got}")]
    UnitMismatch { expected: String, got: String },

    #[error("Cached result {slot} does not hold a {expected}")]
    CacheTypeMismatch { slot: String, expected: &'static str },

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeanFieldError>;

// ============================================================================
// UNITS
// ============================================================================

/// Physical dimension of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Time,
    Voltage,
    Current,
    Capacitance,
    Frequency,
    Dimensionless,
}

/// Units appearing in network and analysis parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    // Time
    Second,
    Millisecond,

    // Voltage
    Volt,
    Millivolt,

    // Current
    Ampere,
    Nanoampere,
    Picoampere,

    // Capacitance
    Farad,
    Picofarad,

    // Frequency
    Hertz,
    Kilohertz,

    Dimensionless,
}

impl Unit {
    /// Convert to SI base units
    pub fn to_si_factor(&self) -> f64 {
        match self {
            Unit::Second => 1.0,
            Unit::Millisecond => 1e-3,
            Unit::Volt => 1.0,
            Unit::Millivolt => 1e-3,
            Unit::Ampere => 1.0,
            Unit::Nanoampere => 1e-9,
            Unit::Picoampere => 1e-12,
            Unit::Farad => 1.0,
            Unit::Picofarad => 1e-12,
            Unit::Hertz => 1.0,
            Unit::Kilohertz => 1e3,
            Unit::Dimensionless => 1.0,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Second | Unit::Millisecond => Dimension::Time,
            Unit::Volt | Unit::Millivolt => Dimension::Voltage,
            Unit::Ampere | Unit::Nanoampere | Unit::Picoampere => Dimension::Current,
            Unit::Farad | Unit::Picofarad => Dimension::Capacitance,
            Unit::Hertz | Unit::Kilohertz => Dimension::Frequency,
            Unit::Dimensionless => Dimension::Dimensionless,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Volt => "V",
            Unit::Millivolt => "mV",
            Unit::Ampere => "A",
            Unit::Nanoampere => "nA",
            Unit::Picoampere => "pA",
            Unit::Farad => "F",
            Unit::Picofarad => "pF",
            Unit::Hertz => "Hz",
            Unit::Kilohertz => "kHz",
            Unit::Dimensionless => "dimensionless",
        }
    }

    /// Factor converting a magnitude in `self` into `target`
    pub fn conversion_factor(&self, target: Unit) -> Result<f64> {
        if self.dimension() != target.dimension() {
            return Err(MeanFieldError::UnitMismatch {
                expected: target.symbol().into(),
                got: self.symbol().into(),
            });
        }
        Ok(self.to_si_factor() / target.to_si_factor())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = MeanFieldError;

    fn from_str(s: &str) -> Result<Self> {
        let unit = match s.trim() {
            "s" | "second" | "seconds" => Unit::Second,
            "ms" | "millisecond" | "milliseconds" => Unit::Millisecond,
            "V" | "volt" => Unit::Volt,
            "mV" | "millivolt" => Unit::Millivolt,
            "A" | "ampere" => Unit::Ampere,
            "nA" | "nanoampere" => Unit::Nanoampere,
            "pA" | "picoampere" => Unit::Picoampere,
            "F" | "farad" => Unit::Farad,
            "pF" | "picofarad" => Unit::Picofarad,
            "Hz" | "hertz" => Unit::Hertz,
            "kHz" | "kilohertz" => Unit::Kilohertz,
            "" | "1" | "dimensionless" => Unit::Dimensionless,
            other => return Err(MeanFieldError::ParseError(format!("unknown unit '{}'", other))),
        };
        Ok(unit)
    }
}

/// Scalar with unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn hz(value: f64) -> Self {
        Self::new(value, Unit::Hertz)
    }

    pub fn ms(value: f64) -> Self {
        Self::new(value, Unit::Millisecond)
    }

    pub fn mv(value: f64) -> Self {
        Self::new(value, Unit::Millivolt)
    }

    /// Convert to SI base units
    pub fn to_si(&self) -> f64 {
        self.value * self.unit.to_si_factor()
    }

    /// Same quantity expressed in `unit`
    pub fn to(&self, unit: Unit) -> Result<Self> {
        Ok(Self::new(self.value * self.unit.conversion_factor(unit)?, unit))
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.value * factor, self.unit)
    }
}

/// Exact equality after conversion to SI; quantities of different
/// dimension never compare equal. No tolerance is applied.
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.unit.dimension() == other.unit.dimension() && self.to_si() == other.to_si()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit == Unit::Dimensionless {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

// ============================================================================
// PARAMETER VALUES
// ============================================================================

/// Numeric payload of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Magnitude {
    Scalar(f64),
    Vector(Array1<f64>),
    Matrix(Array2<f64>),
}

impl Magnitude {
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Magnitude::Scalar(v) => Magnitude::Scalar(f(*v)),
            Magnitude::Vector(v) => Magnitude::Vector(v.mapv(&f)),
            Magnitude::Matrix(m) => Magnitude::Matrix(m.mapv(&f)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Magnitude::Scalar(_) => "scalar",
            Magnitude::Vector(_) => "vector",
            Magnitude::Matrix(_) => "matrix",
        }
    }
}

/// A network or analysis parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Quantity { magnitude: Magnitude, unit: Unit },
    Text(String),
    TextList(Vec<String>),
}

/// Named parameters, iterated in name order
pub type ParameterMap = BTreeMap<String, ParamValue>;

impl ParamValue {
    pub fn scalar(value: f64, unit: Unit) -> Self {
        ParamValue::Quantity { magnitude: Magnitude::Scalar(value), unit }
    }

    pub fn vector(values: Array1<f64>, unit: Unit) -> Self {
        ParamValue::Quantity { magnitude: Magnitude::Vector(values), unit }
    }

    pub fn matrix(values: Array2<f64>, unit: Unit) -> Self {
        ParamValue::Quantity { magnitude: Magnitude::Matrix(values), unit }
    }

    pub fn text(value: impl Into<String>) -> Self {
        ParamValue::Text(value.into())
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            ParamValue::Quantity { unit, .. } => Some(*unit),
            _ => None,
        }
    }

    /// Scalar quantity, if this is one
    pub fn as_quantity(&self) -> Option<Quantity> {
        match self {
            ParamValue::Quantity { magnitude: Magnitude::Scalar(v), unit } => {
                Some(Quantity::new(*v, *unit))
            }
            _ => None,
        }
    }

    /// Same value expressed in `target`
    pub fn to_unit(&self, name: &str, target: Unit) -> Result<Self> {
        match self {
            ParamValue::Quantity { magnitude, unit } => {
                let factor = unit.conversion_factor(target)?;
                Ok(ParamValue::Quantity { magnitude: magnitude.map(|v| v * factor), unit: target })
            }
            _ => Err(invalid(name, "expected a numeric quantity")),
        }
    }

    pub fn scalar_si(&self, name: &str) -> Result<f64> {
        match self {
            ParamValue::Quantity { magnitude: Magnitude::Scalar(v), unit } => {
                Ok(v * unit.to_si_factor())
            }
            _ => Err(invalid(name, "expected a scalar quantity")),
        }
    }

    /// Vector in SI; a scalar is broadcast to `len` entries
    pub fn vector_si(&self, name: &str, len: usize) -> Result<Array1<f64>> {
        match self {
            ParamValue::Quantity { magnitude: Magnitude::Vector(v), unit } => {
                if v.len() != len {
                    return Err(invalid(name, &format!("expected {} entries, got {}", len, v.len())));
                }
                Ok(v * unit.to_si_factor())
            }
            ParamValue::Quantity { magnitude: Magnitude::Scalar(v), unit } => {
                Ok(Array1::from_elem(len, v * unit.to_si_factor()))
            }
            _ => Err(invalid(name, "expected a vector quantity")),
        }
    }

    /// Unsized vector in SI
    pub fn sequence_si(&self, name: &str) -> Result<Array1<f64>> {
        match self {
            ParamValue::Quantity { magnitude: Magnitude::Vector(v), unit } => Ok(v * unit.to_si_factor()),
            ParamValue::Quantity { magnitude: Magnitude::Scalar(v), unit } => {
                Ok(Array1::from_elem(1, v * unit.to_si_factor()))
            }
            _ => Err(invalid(name, "expected a vector quantity")),
        }
    }

    pub fn matrix_si(&self, name: &str, dimension: usize) -> Result<Array2<f64>> {
        match self {
            ParamValue::Quantity { magnitude: Magnitude::Matrix(m), unit } => {
                if m.dim() != (dimension, dimension) {
                    return Err(invalid(
                        name,
                        &format!("expected {0}x{0} matrix, got {1}x{2}", dimension, m.nrows(), m.ncols()),
                    ));
                }
                Ok(m * unit.to_si_factor())
            }
            _ => Err(invalid(name, "expected a matrix quantity")),
        }
    }

    pub fn as_text(&self, name: &str) -> Result<&str> {
        match self {
            ParamValue::Text(s) => Ok(s),
            _ => Err(invalid(name, "expected text")),
        }
    }

    pub fn as_text_list(&self, name: &str) -> Result<&[String]> {
        match self {
            ParamValue::TextList(items) => Ok(items),
            _ => Err(invalid(name, "expected a list of names")),
        }
    }
}

impl From<Quantity> for ParamValue {
    fn from(q: Quantity) -> Self {
        ParamValue::scalar(q.value, q.unit)
    }
}

fn invalid(name: &str, reason: &str) -> MeanFieldError {
    MeanFieldError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Look up `name`, reporting a missing entry as [`MeanFieldError::MissingParameter`]
pub fn require<'a>(params: &'a ParameterMap, name: &str) -> Result<&'a ParamValue> {
    params
        .get(name)
        .ok_or_else(|| MeanFieldError::MissingParameter(name.to_string()))
}

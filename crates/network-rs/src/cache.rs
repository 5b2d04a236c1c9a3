//! Memoized results.
//!
//! Every analysis result lives in a named *slot*. A slot holds either one
//! value or, for frequency- or selector-dependent analyses, a sequence of
//! values positionally aligned with an *index list* of the arguments they
//! were computed for.
//!
//! A miss runs the computation first and only then appends to the index list
//! and the slot, so a failed computation leaves both untouched.

use meanfield_core::{Complex, MeanFieldError, Quantity, Result};
use meanfield_lif::{MatrixSelector, SensitivityMeasure};
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

// ============================================================================
// SLOTS
// ============================================================================

/// Name of a result slot, typed by the value it stores
pub struct Slot<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.name)
    }
}

/// Slots used by the network controller
pub mod slots {
    use super::Slot;
    use meanfield_core::Complex;
    use meanfield_lif::SensitivityMeasure;
    use ndarray::{Array1, Array2, Array3};

    pub const FIRING_RATES: Slot<Array1<f64>> = Slot::new("firing_rates");
    pub const MEAN: Slot<Array1<f64>> = Slot::new("mu");
    pub const STANDARD_DEVIATION: Slot<Array1<f64>> = Slot::new("sigma");
    pub const DELAY_DIST: Slot<Array3<Complex>> = Slot::new("delay_dist");
    pub const DELAY_DIST_SINGLE: Slot<Array2<Complex>> = Slot::new("delay_dist_single");
    pub const TRANSFER_FUNCTION: Slot<Array2<Complex>> = Slot::new("transfer_function");
    pub const TRANSFER_FUNCTION_SINGLE: Slot<Array1<Complex>> = Slot::new("transfer_function_single");
    pub const SENSITIVITY_MEASURE: Slot<SensitivityMeasure> = Slot::new("sensitivity_measure");
    pub const POWER_SPECTRA: Slot<Array2<f64>> = Slot::new("power_spectra");
    pub const EIGENVALUE_SPECTRA: Slot<Array2<Complex>> = Slot::new("eigenvalue_spectra");
    pub const R_EIGENVEC_SPECTRA: Slot<Array3<Complex>> = Slot::new("r_eigenvec_spectra");
    pub const L_EIGENVEC_SPECTRA: Slot<Array3<Complex>> = Slot::new("l_eigenvec_spectra");

    pub const DELAY_DIST_FREQS: &str = "delay_dist_freqs";
    pub const TRANSFER_FREQS: &str = "transfer_freqs";
    pub const SENSITIVITY_FREQS: &str = "sensitivity_freqs";
    pub const EIGENVALUE_MATRIX: &str = "eigenvalue_matrix";
    pub const R_EIGENVEC_MATRIX: &str = "r_eigenvec_matrix";
    pub const L_EIGENVEC_MATRIX: &str = "l_eigenvec_matrix";
}

// ============================================================================
// STORED VALUES
// ============================================================================

/// Type-erased cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResultValue {
    RealVector(Array1<f64>),
    RealMatrix(Array2<f64>),
    ComplexVector(Array1<Complex>),
    ComplexMatrix(Array2<Complex>),
    ComplexTensor(Array3<Complex>),
    Sensitivity(Box<SensitivityMeasure>),
}

/// Conversion between a concrete result type and [`ResultValue`]
pub trait CachedResult: Sized {
    const KIND: &'static str;

    fn into_value(self) -> ResultValue;

    fn from_value(value: &ResultValue) -> Option<Self>;
}

macro_rules! cached_array {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl CachedResult for $ty {
            const KIND: &'static str = $kind;

            fn into_value(self) -> ResultValue {
                ResultValue::$variant(self)
            }

            fn from_value(value: &ResultValue) -> Option<Self> {
                match value {
                    ResultValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

cached_array!(Array1<f64>, RealVector, "real vector");
cached_array!(Array2<f64>, RealMatrix, "real matrix");
cached_array!(Array1<Complex>, ComplexVector, "complex vector");
cached_array!(Array2<Complex>, ComplexMatrix, "complex matrix");
cached_array!(Array3<Complex>, ComplexTensor, "complex tensor");

impl CachedResult for SensitivityMeasure {
    const KIND: &'static str = "sensitivity measure";

    fn into_value(self) -> ResultValue {
        ResultValue::Sensitivity(Box::new(self))
    }

    fn from_value(value: &ResultValue) -> Option<Self> {
        match value {
            ResultValue::Sensitivity(s) => Some(s.as_ref().clone()),
            _ => None,
        }
    }
}

/// Content of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEntry {
    Single(ResultValue),
    Indexed(Vec<ResultValue>),
}

impl ResultEntry {
    /// Value at `position` of an indexed entry; a single value counts as position 0
    pub fn at(&self, position: usize) -> Option<&ResultValue> {
        match self {
            ResultEntry::Single(v) if position == 0 => Some(v),
            ResultEntry::Single(_) => None,
            ResultEntry::Indexed(values) => values.get(position),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResultEntry::Single(_) => 1,
            ResultEntry::Indexed(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Slot name -> cached entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStore {
    entries: BTreeMap<String, ResultEntry>,
}

impl ResultStore {
    pub fn get(&self, slot: &str) -> Option<&ResultEntry> {
        self.entries.get(slot)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.entries.contains_key(slot)
    }

    pub fn insert_single(&mut self, slot: &str, value: ResultValue) {
        self.entries.insert(slot.to_string(), ResultEntry::Single(value));
    }

    /// Append to an indexed slot; a single entry becomes the first element
    pub fn push_indexed(&mut self, slot: &str, value: ResultValue) {
        let entry = self
            .entries
            .remove(slot)
            .map(|entry| match entry {
                ResultEntry::Single(first) => vec![first],
                ResultEntry::Indexed(values) => values,
            })
            .unwrap_or_default();
        let mut values = entry;
        values.push(value);
        self.entries.insert(slot.to_string(), ResultEntry::Indexed(values));
    }

    /// Slot names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the store restricted to `slots`
    pub fn select<'a>(&self, slots: impl IntoIterator<Item = &'a str>) -> ResultStore {
        let entries = slots
            .into_iter()
            .filter_map(|slot| self.entries.get(slot).map(|e| (slot.to_string(), e.clone())))
            .collect();
        ResultStore { entries }
    }
}

// ============================================================================
// INDEX LISTS
// ============================================================================

/// Argument a cached sequence entry was computed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexValue {
    Quantity(Quantity),
    Selector(MatrixSelector),
}

impl From<Quantity> for IndexValue {
    fn from(q: Quantity) -> Self {
        IndexValue::Quantity(q)
    }
}

impl From<MatrixSelector> for IndexValue {
    fn from(s: MatrixSelector) -> Self {
        IndexValue::Selector(s)
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Quantity(q) => write!(f, "{}", q),
            IndexValue::Selector(s) => write!(f, "{}", s),
        }
    }
}

/// Index key -> arguments, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexLists {
    lists: BTreeMap<String, Vec<IndexValue>>,
}

impl IndexLists {
    pub fn get(&self, key: &str) -> &[IndexValue] {
        self.lists.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First position of `value`; matching is exact (see [`Quantity`]'s `PartialEq`)
    pub fn position(&self, key: &str, value: &IndexValue) -> Option<usize> {
        self.get(key).iter().position(|v| v == value)
    }

    pub fn push(&mut self, key: &str, value: IndexValue) {
        self.lists.entry(key.to_string()).or_default().push(value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.lists.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

// ============================================================================
// MEMOIZATION
// ============================================================================

/// Owner of a result store and its index lists
pub trait CacheHost {
    fn results(&self) -> &ResultStore;

    fn results_mut(&mut self) -> &mut ResultStore;

    fn index_lists(&self) -> &IndexLists;

    fn index_lists_mut(&mut self) -> &mut IndexLists;
}

fn decode<T: CachedResult>(slot: &Slot<T>, value: &ResultValue) -> Result<T> {
    T::from_value(value).ok_or_else(|| MeanFieldError::CacheTypeMismatch {
        slot: slot.name().to_string(),
        expected: T::KIND,
    })
}

/// Return the value in `slot`, computing and storing it on first use
pub fn check_and_store<H, T, F>(host: &mut H, slot: Slot<T>, compute: F) -> Result<T>
where
    H: CacheHost + ?Sized,
    T: CachedResult + Clone,
    F: FnOnce(&mut H) -> Result<T>,
{
    if let Some(entry) = host.results().get(slot.name()) {
        tracing::debug!(slot = slot.name(), "cache hit");
        return match entry {
            ResultEntry::Single(value) => decode(&slot, value),
            ResultEntry::Indexed(_) => Err(MeanFieldError::CacheTypeMismatch {
                slot: slot.name().to_string(),
                expected: T::KIND,
            }),
        };
    }

    tracing::debug!(slot = slot.name(), "cache miss");
    let value = compute(host)?;
    host.results_mut().insert_single(slot.name(), value.clone().into_value());
    Ok(value)
}

/// Return the value computed for `argument`, computing and appending it on first use
pub fn check_and_store_indexed<H, T, F>(
    host: &mut H,
    slot: Slot<T>,
    index_key: &str,
    argument: IndexValue,
    compute: F,
) -> Result<T>
where
    H: CacheHost + ?Sized,
    T: CachedResult + Clone,
    F: FnOnce(&mut H) -> Result<T>,
{
    if let Some(position) = host.index_lists().position(index_key, &argument) {
        tracing::debug!(slot = slot.name(), %argument, position, "cache hit");
        let value = host
            .results()
            .get(slot.name())
            .and_then(|entry| entry.at(position))
            .ok_or_else(|| MeanFieldError::CacheTypeMismatch {
                slot: slot.name().to_string(),
                expected: T::KIND,
            })?;
        return decode(&slot, value);
    }

    tracing::debug!(slot = slot.name(), %argument, "cache miss");
    let value = compute(host)?;
    host.index_lists_mut().push(index_key, argument);
    host.results_mut().push_indexed(slot.name(), value.clone().into_value());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[derive(Default)]
    struct Host {
        results: ResultStore,
        indices: IndexLists,
        calls: usize,
    }

    impl CacheHost for Host {
        fn results(&self) -> &ResultStore {
            &self.results
        }
        fn results_mut(&mut self) -> &mut ResultStore {
            &mut self.results
        }
        fn index_lists(&self) -> &IndexLists {
            &self.indices
        }
        fn index_lists_mut(&mut self) -> &mut IndexLists {
            &mut self.indices
        }
    }

    const RATES: Slot<Array1<f64>> = Slot::new("firing_rates");
    const SPECTRUM: Slot<Array1<Complex>> = Slot::new("spectrum");

    fn spectrum_at(host: &mut Host, f: f64) -> Result<Array1<Complex>> {
        check_and_store_indexed(host, SPECTRUM, "spectrum_freqs", Quantity::hz(f).into(), |h| {
            h.calls += 1;
            Ok(array![Complex::new(f, -f)])
        })
    }

    #[test]
    fn test_single_slot_computes_once() {
        let mut host = Host::default();
        let compute = |h: &mut Host| {
            h.calls += 1;
            Ok(array![1.0, 2.0])
        };
        let first = check_and_store(&mut host, RATES, compute).unwrap();
        let second = check_and_store(&mut host, RATES, compute).unwrap();
        assert_eq!(first, second);
        assert_eq!(host.calls, 1);
        assert_eq!(host.results.names(), vec!["firing_rates".to_string()]);
    }

    #[test]
    fn test_indexed_slot_reuses_positions() {
        let mut host = Host::default();
        let a = spectrum_at(&mut host, 10.0).unwrap();
        spectrum_at(&mut host, 20.0).unwrap();
        let again = spectrum_at(&mut host, 10.0).unwrap();

        assert_eq!(host.calls, 2);
        assert_eq!(a, again);
        assert_eq!(host.indices.get("spectrum_freqs").len(), 2);
        assert_eq!(host.results.get("spectrum").map(ResultEntry::len), Some(2));
    }

    #[test]
    fn test_index_lookup_is_unit_aware() {
        let mut host = Host::default();
        check_and_store_indexed(&mut host, SPECTRUM, "spectrum_freqs", Quantity::hz(1000.0).into(), |_| {
            Ok(array![Complex::new(1.0, 0.0)])
        })
        .unwrap();
        let hit = check_and_store_indexed(
            &mut host,
            SPECTRUM,
            "spectrum_freqs",
            Quantity::new(1.0, meanfield_core::Unit::Kilohertz).into(),
            |_| Ok(array![Complex::new(9.0, 9.0)]),
        )
        .unwrap();
        assert_eq!(hit[0], Complex::new(1.0, 0.0));
    }

    #[test]
    fn test_failure_leaves_cache_untouched() {
        let mut host = Host::default();
        let err = check_and_store_indexed(&mut host, SPECTRUM, "spectrum_freqs", Quantity::hz(5.0).into(), |_| {
            Err(MeanFieldError::MissingParameter("tau_m".into()))
        });
        assert!(err.is_err());
        assert!(host.results.is_empty());
        assert!(host.indices.is_empty());
    }

    #[test]
    fn test_single_entry_becomes_sequence() {
        let mut store = ResultStore::default();
        store.insert_single("spectrum", ResultValue::RealVector(array![1.0]));
        store.push_indexed("spectrum", ResultValue::RealVector(array![2.0]));
        match store.get("spectrum") {
            Some(ResultEntry::Indexed(values)) => assert_eq!(values.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let mut host = Host::default();
        host.results.insert_single("firing_rates", ResultValue::RealMatrix(array![[1.0]]));
        let result = check_and_store(&mut host, RATES, |_| Ok(array![0.0]));
        assert!(matches!(
            result,
            Err(MeanFieldError::CacheTypeMismatch { expected: "real vector", .. })
        ));
    }
}

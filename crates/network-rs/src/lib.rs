//! # Network-RS: Mean-field network controller
//!
//! Ties parameters, kernels and results together:
//! - [`params`]: network/analysis parameter records and topology-dependent derivation
//! - [`cache`]: typed result slots and frequency-indexed memoization
//! - [`network`]: the [`Network`] controller exposing every analysis
//! - [`io`]: YAML parameter files and JSON result archives
//!
//! ```no_run
//! use meanfield_core::Quantity;
//! use meanfield_network::Network;
//!
//! # fn main() -> meanfield_core::Result<()> {
//! let mut network = Network::builder("network_params.yaml", "analysis_params.yaml").build()?;
//! let rates = network.firing_rates()?;
//! let tf = network.transfer_function(Some(Quantity::hz(80.0)))?;
//! println!("{} {}", rates, tf);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod io;
pub mod network;
pub mod params;

pub use cache::{IndexLists, IndexValue, ResultEntry, ResultStore, ResultValue, Slot};
pub use io::{
    ArchivedResults, JsonArchive, KeySelection, NoArchive, ParameterSource, ResultArchive, SourceId,
    YamlParameterFile,
};
pub use network::{Network, NetworkBuilder, WorkingPoint};
pub use params::{AnalysisParameters, DerivedParameters, NetworkParameters, Topology};

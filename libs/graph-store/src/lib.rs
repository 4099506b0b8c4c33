//! Backend-agnostic property-graph repository for the Geflecht FHIR server.
//!
//! The resource layer only ever talks to the [`GraphStore`] trait. Backends
//! must never leak native edge identifiers across this boundary: edges are
//! identified by `(label, out-vertex, in-vertex)` and existence is answered
//! by counting, so engines with composite edge ids remain swappable.

pub mod config;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use memory::MemoryGraphStore;
pub use store::{labels, props, GraphStore, VersionedWrite};
pub use types::{Direction, EdgeRecord, PropertyMap, Vertex, VertexId};

use std::sync::Arc;

/// Open the graph backend selected by `config.backend`.
///
/// Only the embedded engine is compiled into this build; wire backends plug
/// in behind the same trait.
pub fn connect(config: &GraphConfig) -> Result<Arc<dyn GraphStore>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!(backend = "memory", "opening embedded graph engine");
            Ok(Arc::new(MemoryGraphStore::new()))
        }
        other => Err(GraphError::UnsupportedBackend(other.to_string())),
    }
}

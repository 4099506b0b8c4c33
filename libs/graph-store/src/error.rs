use crate::types::VertexId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("vertex {0} not found")]
    VertexNotFound(VertexId),

    /// The current version is the living resource vertex; only archived
    /// versions can be deleted individually.
    #[error("cannot delete current version {version_id} of {label}/{fhir_id}")]
    CurrentVersion {
        label: String,
        fhir_id: String,
        version_id: String,
    },

    #[error("graph backend failure: {0}")]
    Backend(String),

    #[error("unsupported graph backend '{0}'")]
    UnsupportedBackend(String),
}

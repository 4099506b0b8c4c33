//! Error type shared by every layer, and its HTTP/OperationOutcome mapping.
//!
//! Internal layers return `Result<_, Error>`; only the API layer turns an
//! error into an HTTP shape, via [`Error::status`] and `IntoResponse`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resource {resource_type}/{id} not found")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("Version {version_id} of {resource_type}/{id} not found")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },

    #[error("Resource {resource_type}/{id} is deleted")]
    ResourceDeleted {
        resource_type: String,
        id: String,
        version_id: Option<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Conditional create matched more than one existing resource.
    #[error("Multiple matches: {0}")]
    Duplicate(String),

    /// Conditional update/patch/delete matched more than one resource.
    #[error("Multiple matches: {0}")]
    MultipleMatches(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A transaction bundle aborted before any entry was applied. Carries
    /// the failing entry's issue code; always reported as 400.
    #[error("{message}")]
    TransactionAborted {
        message: String,
        code: &'static str,
    },

    #[error("Graph backend error: {0}")]
    Graph(#[from] geflecht_graph::GraphError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } | Error::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::ResourceDeleted { .. } => StatusCode::GONE,
            Error::InvalidResource(_) | Error::Validation(_) | Error::TransactionAborted { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::VersionConflict { .. }
            | Error::PreconditionFailed(_)
            | Error::Duplicate(_)
            | Error::MultipleMatches(_) => StatusCode::PRECONDITION_FAILED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Graph(geflecht_graph::GraphError::CurrentVersion { .. }) => StatusCode::CONFLICT,
            Error::Graph(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OperationOutcome issue code for this error.
    pub fn issue_code(&self) -> &'static str {
        match self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } | Error::NotFound(_) => {
                "not-found"
            }
            Error::ResourceDeleted { .. } => "deleted",
            Error::InvalidResource(_)
            | Error::Validation(_)
            | Error::UnprocessableEntity(_)
            | Error::MethodNotAllowed(_) => "invalid",
            Error::Duplicate(_) => "duplicate",
            Error::MultipleMatches(_) => "multiple-matches",
            Error::VersionConflict { .. }
            | Error::PreconditionFailed(_)
            | Error::Conflict(_)
            | Error::Graph(geflecht_graph::GraphError::CurrentVersion { .. }) => "conflict",
            Error::TransactionAborted { code, .. } => code,
            Error::NotImplemented(_) | Error::Graph(_) | Error::Internal(_) => "exception",
        }
    }

    pub fn to_operation_outcome(&self) -> JsonValue {
        let severity = if self.status().is_server_error() {
            "fatal"
        } else {
            "error"
        };
        operation_outcome(severity, self.issue_code(), &self.to_string())
    }
}

/// Assemble an OperationOutcome document.
pub fn operation_outcome(severity: &str, code: &str, diagnostics: &str) -> JsonValue {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics
        }]
    })
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (self.status(), Json(self.to_operation_outcome())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_errors_map_to_412_with_distinct_codes() {
        let duplicate = Error::Duplicate("2 matches".into());
        assert_eq!(duplicate.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(duplicate.issue_code(), "duplicate");

        let multiple = Error::MultipleMatches("2 matches".into());
        assert_eq!(multiple.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(multiple.issue_code(), "multiple-matches");
    }

    #[test]
    fn deleting_current_version_is_a_conflict() {
        let err = Error::Graph(geflecht_graph::GraphError::CurrentVersion {
            label: "Patient".into(),
            fhir_id: "p1".into(),
            version_id: "3".into(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.issue_code(), "conflict");
    }
}

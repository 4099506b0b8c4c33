//! Resource-layer models shared across services and handlers.

pub mod bundle;

pub use bundle::{Bundle, BundleEntry, BundleEntryResponse, BundleLink, BundleRequest, BundleType};

use chrono::{DateTime, Utc};
use geflecht_graph::{props, Vertex, VertexId};
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// One version of a stored resource, materialized from its graph vertex.
#[derive(Debug, Clone)]
pub struct Resource {
    pub graph_id: VertexId,
    pub id: String,
    pub resource_type: String,
    /// String-encoded version number, unique within `(resourceType, id)`.
    pub version_id: String,
    pub resource: JsonValue,
    /// RFC 3339 instant, as stamped by the graph store.
    pub last_updated: String,
    pub deleted: bool,
}

impl Resource {
    /// Materialize from a resource vertex. Tombstones carry no body; a
    /// minimal `{resourceType, id}` document is synthesized for them.
    pub fn from_vertex(vertex: &Vertex) -> Result<Self> {
        let id = vertex
            .property_str(props::ID)
            .ok_or_else(|| Error::Internal(format!("vertex {} has no id", vertex.id)))?;
        let version_id = vertex
            .property_str(props::VERSION_ID)
            .ok_or_else(|| Error::Internal(format!("vertex {} has no versionId", vertex.id)))?;
        let deleted = vertex.property_bool(props::IS_DELETED);

        let resource = match vertex.property_str(props::JSON) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Internal(format!(
                    "stored JSON for vertex {} is corrupt: {e}",
                    vertex.id
                ))
            })?,
            None => serde_json::json!({
                "resourceType": vertex.label,
                "id": id,
            }),
        };

        Ok(Self {
            graph_id: vertex.id,
            id,
            resource_type: vertex.label.clone(),
            version_id,
            resource,
            last_updated: vertex.property_str(props::LAST_UPDATED).unwrap_or_default(),
            deleted,
        })
    }

    pub fn version_number(&self) -> i64 {
        self.version_id.parse().unwrap_or(0)
    }

    pub fn last_updated_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_updated)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// HTTP method a history entry is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMethod {
    Post,
    Put,
    Delete,
}

impl HistoryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryMethod::Post => "POST",
            HistoryMethod::Put => "PUT",
            HistoryMethod::Delete => "DELETE",
        }
    }

    /// Deletions report DELETE, first versions POST, everything else PUT.
    pub fn for_resource(resource: &Resource) -> Self {
        if resource.deleted {
            HistoryMethod::Delete
        } else if resource.version_number() == 1 {
            HistoryMethod::Post
        } else {
            HistoryMethod::Put
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub resource: Resource,
    pub method: HistoryMethod,
}

#[derive(Debug, Clone)]
pub struct HistoryResult {
    pub entries: Vec<HistoryEntry>,
    pub total: Option<u64>,
}

/// One row of a label-scoped search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub graph_id: VertexId,
    pub fhir_id: Option<String>,
    pub resource_type: String,
    pub json: Option<JsonValue>,
    pub is_placeholder: bool,
}

impl SearchResult {
    pub fn from_vertex(vertex: &Vertex) -> Self {
        let json = vertex
            .property_str(props::JSON)
            .and_then(|raw| serde_json::from_str(&raw).ok());
        Self {
            graph_id: vertex.id,
            fhir_id: vertex.property_str(props::ID),
            resource_type: vertex.label.clone(),
            json,
            is_placeholder: vertex.property_bool(props::IS_PLACEHOLDER),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total: u64,
}

/// Write-path switches surfaced as query parameters.
#[derive(Debug, Clone, Copy)]
pub struct PersistOptions {
    pub materialize_references: bool,
    pub allow_placeholders: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            materialize_references: true,
            allow_placeholders: true,
        }
    }
}

/// Outcome of a persist call, including how many reference edges were
/// materialized for it.
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub resource: Resource,
    pub created: bool,
    pub materialized_references: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
    /// Expected current version from `If-Match`.
    pub if_match: Option<String>,
}

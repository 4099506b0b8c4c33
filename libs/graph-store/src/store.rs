//! The graph repository contract consumed by the resource layer.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EdgeRecord, PropertyMap, Vertex, VertexId};

/// Vertex and edge property names persisted in the graph.
pub mod props {
    pub const ID: &str = "id";
    pub const RESOURCE_TYPE: &str = "resourceType";
    pub const JSON: &str = "json";
    pub const VERSION_ID: &str = "versionId";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const IS_CURRENT: &str = "isCurrent";
    pub const IS_DELETED: &str = "isDeleted";
    pub const IS_PLACEHOLDER: &str = "isPlaceholder";

    pub const PATH: &str = "path";
    pub const TARGET_RESOURCE_TYPE: &str = "targetResourceType";
    pub const TARGET_FHIR_ID: &str = "targetFhirId";
}

/// Edge labels persisted in the graph.
pub mod labels {
    /// Audit edge from a newer version vertex to its immediate predecessor.
    /// Never traversed in read paths.
    pub const SUPERSEDES: &str = "supersedes";
    /// Prefix of materialized reference edges; the dotted JSON path of the
    /// reference is appended (`fhir:ref:subject.reference`).
    pub const REF_PREFIX: &str = "fhir:ref:";
}

/// Outcome of a versioned write.
#[derive(Debug, Clone)]
pub struct VersionedWrite {
    /// Graph id of the current-version vertex. Stable across writes for the
    /// same `(label, fhirId)`.
    pub graph_id: VertexId,
    pub version_id: i64,
    /// RFC 3339 instant stamped as `lastUpdated`.
    pub last_updated: String,
}

/// Abstract graph operations with versioning primitives.
///
/// Every operation fails with [`crate::GraphError::Backend`] on I/O failure.
/// Cancellation is structural: callers drop the future and the in-flight
/// backend query is abandoned.
///
/// Versioned state is laid out as one *current* vertex per `(label, fhirId)`
/// that is updated in place, plus append-only *archive* vertices
/// (`isCurrent=false`) for superseded versions, chained newer→older through
/// `supersedes` edges. Reference edges therefore always hang off a stable
/// vertex, and a placeholder vertex is upgraded in place by the first real
/// write for its key.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ------------------------------------------------------------------
    // Vertices
    // ------------------------------------------------------------------

    async fn add_vertex(&self, label: &str, properties: PropertyMap) -> Result<Vertex>;

    async fn add_vertex_and_return_id(
        &self,
        label: &str,
        properties: PropertyMap,
    ) -> Result<VertexId>;

    /// Materialized property map, detached from the backend. Values arriving
    /// as singleton lists are unwrapped to scalars; multi-valued lists are
    /// preserved.
    async fn get_vertex(&self, id: VertexId) -> Result<Option<Vertex>>;

    /// Set/overwrite properties. Returns `false` if the vertex is missing.
    async fn update_vertex_properties(&self, id: VertexId, properties: PropertyMap)
        -> Result<bool>;

    /// Drops the vertex and all incident edges. Returns `false` if missing.
    async fn delete_vertex(&self, id: VertexId) -> Result<bool>;

    async fn count_vertices(&self) -> Result<u64>;

    /// Remove every vertex and edge; returns the number of vertices dropped.
    async fn drop_all(&self) -> Result<u64>;

    /// Find-or-create by `(label, key=value)`, then apply `properties`.
    /// Lookup keys are compared as strings.
    async fn upsert_vertex_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
        properties: PropertyMap,
    ) -> Result<VertexId>;

    /// First match in deterministic backend order.
    async fn get_vertex_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Vertex>>;

    async fn get_vertex_id_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<VertexId>>;

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// At most one edge exists per `(label, out, in)`; re-adding overwrites
    /// the edge properties.
    async fn add_edge(
        &self,
        label: &str,
        out_vertex: VertexId,
        in_vertex: VertexId,
        properties: PropertyMap,
    ) -> Result<()>;

    /// Add an edge between vertices located by `(label, key=value)` lookups.
    /// Returns `false` when either endpoint cannot be found.
    #[allow(clippy::too_many_arguments)]
    async fn add_edge_by_property(
        &self,
        label: &str,
        out_label: &str,
        out_key: &str,
        out_value: &str,
        in_label: &str,
        in_key: &str,
        in_value: &str,
        properties: PropertyMap,
    ) -> Result<bool>;

    /// Edge-existence test by count (`outE(label).inV.hasId(in).count() > 0`
    /// in Gremlin terms). Never touches backend edge ids.
    async fn edge_exists(
        &self,
        label: &str,
        out_vertex: VertexId,
        in_vertex: VertexId,
    ) -> Result<bool>;

    /// All incident edges, both directions, with the other endpoint.
    async fn get_edges_for_vertex(&self, id: VertexId) -> Result<Vec<EdgeRecord>>;

    // ------------------------------------------------------------------
    // Label-scoped search
    // ------------------------------------------------------------------

    /// Equality filters on string-coerced property values.
    async fn get_vertices_by_label(
        &self,
        label: &str,
        filters: &[(String, String)],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vertex>>;

    async fn count_vertices_by_label(
        &self,
        label: &str,
        filters: &[(String, String)],
    ) -> Result<u64>;

    // ------------------------------------------------------------------
    // Neighbors / traversal
    // ------------------------------------------------------------------

    async fn get_out_neighbors(
        &self,
        id: VertexId,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>>;

    async fn get_in_neighbors(
        &self,
        id: VertexId,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>>;

    /// Breadth-first walk over both edge directions, deduplicated, returning
    /// every vertex reachable within `max_hops` (the start vertex excluded).
    /// With `edge_label = None` all labels are followed except `supersedes`,
    /// which is audit-only.
    async fn traverse(
        &self,
        start: VertexId,
        max_hops: usize,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>>;

    // ------------------------------------------------------------------
    // Versioning primitives
    // ------------------------------------------------------------------

    async fn get_current_version(&self, label: &str, fhir_id: &str) -> Result<Option<Vertex>>;

    async fn get_version(
        &self,
        label: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<Option<Vertex>>;

    /// All versions of `(label, fhirId)`, newest first (`lastUpdated` desc,
    /// ties broken by `versionId` desc), clipped to `limit`.
    async fn get_version_history(
        &self,
        label: &str,
        fhir_id: &str,
        limit: usize,
    ) -> Result<Vec<Vertex>>;

    /// All versions of every resource of a type, newest first.
    async fn get_type_history(&self, label: &str, limit: usize) -> Result<Vec<Vertex>>;

    /// Like [`Self::get_type_history`], restricted to versions with
    /// `lastUpdated >= since` (RFC 3339).
    async fn get_type_history_since(
        &self,
        label: &str,
        since: &str,
        limit: usize,
    ) -> Result<Vec<Vertex>>;

    /// Max existing version number plus one; `1` when none exist.
    async fn get_next_version_number(&self, label: &str, fhir_id: &str) -> Result<i64>;

    /// Flip `isCurrent` off on the current vertex. Returns `false` when no
    /// current version exists.
    async fn mark_version_non_current(&self, label: &str, fhir_id: &str) -> Result<bool>;

    async fn create_supersedes_edge(&self, newer: VertexId, older: VertexId) -> Result<()>;

    /// Versioned write: archive the previous state (if any), maintain the
    /// `supersedes` chain, then write `properties` onto the stable current
    /// vertex together with `id`, `versionId`, `lastUpdated`,
    /// `isCurrent=true`, `isDeleted=false`. A placeholder vertex for the same
    /// key is upgraded in place (its `isPlaceholder` flag cleared).
    async fn create_versioned_vertex(
        &self,
        label: &str,
        fhir_id: &str,
        properties: PropertyMap,
    ) -> Result<VersionedWrite>;

    /// Same flow as [`Self::create_versioned_vertex`] but the new current
    /// state carries `isDeleted=true` and no `json`. Returns `None` when the
    /// resource does not exist.
    async fn create_tombstone(&self, label: &str, fhir_id: &str) -> Result<Option<VersionedWrite>>;

    /// Drop every vertex of `(label, fhirId)`: current, archives, and
    /// placeholder alike. Returns the number of vertices dropped.
    async fn delete_all_versions(&self, label: &str, fhir_id: &str) -> Result<u64>;

    /// Drop one archived version. Returns `false` when the version does not
    /// exist; deleting the current version fails with
    /// [`crate::GraphError::CurrentVersion`].
    async fn delete_version(&self, label: &str, fhir_id: &str, version_id: &str) -> Result<bool>;
}

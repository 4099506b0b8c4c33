//! Reference parsing and edge materialization.
//!
//! `parse_references` walks a resource's JSON tree and yields a record for
//! every relative reference (`Type/id`). `ReferenceService::materialize`
//! turns those records into `fhir:ref:<path>` edges, idempotently; a
//! reference that cannot be materialized is logged and dropped, never
//! failing the enclosing write.

use std::sync::Arc;

use geflecht_graph::{labels, props, GraphStore, PropertyMap, VertexId};
use serde_json::{json, Value as JsonValue};

use crate::Result;

/// A relative reference found inside a resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    /// Dotted/bracketed JSON path of the `reference` field, e.g.
    /// `subject.reference` or `entry[0].item.reference`.
    pub path: String,
    pub target_type: String,
    pub target_id: String,
}

/// Collect every relative reference in document order. Absolute URLs,
/// fragments, urns, and non-string `reference` values are ignored.
pub fn parse_references(resource: &JsonValue) -> Vec<ParsedReference> {
    let mut found = Vec::new();
    walk(resource, "", &mut found);
    found
}

fn walk(value: &JsonValue, path: &str, found: &mut Vec<ParsedReference>) {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(reference)) = map.get("reference") {
                if let Some((target_type, target_id)) = split_relative_reference(reference) {
                    found.push(ParsedReference {
                        path: join_path(path, "reference"),
                        target_type,
                        target_id,
                    });
                }
            }
            for (key, child) in map {
                walk(child, &join_path(path, key), found);
            }
        }
        JsonValue::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk(item, &format!("{path}[{index}]"), found);
            }
        }
        _ => {}
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// The relative reference grammar: exactly two non-empty slash-separated
/// segments, no scheme, no fragment.
fn split_relative_reference(reference: &str) -> Option<(String, String)> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.contains("://") {
        return None;
    }
    let mut segments = trimmed.split('/');
    let target_type = segments.next()?;
    let target_id = segments.next()?;
    if segments.next().is_some() || target_type.is_empty() || target_id.is_empty() {
        return None;
    }
    Some((target_type.to_string(), target_id.to_string()))
}

/// One materialized reference edge, as reported by the graph surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReferenceEdge {
    pub path: String,
    #[serde(rename = "targetResourceType")]
    pub target_resource_type: String,
    #[serde(rename = "targetFhirId")]
    pub target_fhir_id: String,
}

#[derive(Clone)]
pub struct ReferenceService {
    store: Arc<dyn GraphStore>,
}

impl ReferenceService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Create one edge per relative reference in `resource`, from
    /// `source` to the resolved target vertex. Existing edges are left
    /// alone; the return value counts newly created edges only.
    pub async fn materialize(
        &self,
        source: VertexId,
        resource: &JsonValue,
        allow_placeholders: bool,
    ) -> u64 {
        let mut created = 0;
        for reference in parse_references(resource) {
            match self.materialize_one(source, &reference, allow_placeholders).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        path = %reference.path,
                        target = %format!("{}/{}", reference.target_type, reference.target_id),
                        %error,
                        "failed to materialize reference; edge dropped"
                    );
                }
            }
        }
        created
    }

    async fn materialize_one(
        &self,
        source: VertexId,
        reference: &ParsedReference,
        allow_placeholders: bool,
    ) -> Result<bool> {
        let Some(target) = self.resolve_target(reference, allow_placeholders).await? else {
            return Ok(false);
        };

        let edge_label = format!("{}{}", labels::REF_PREFIX, reference.path);
        if self.store.edge_exists(&edge_label, source, target).await? {
            return Ok(false);
        }

        let mut edge_props = PropertyMap::new();
        edge_props.insert(props::PATH.to_string(), json!(reference.path));
        edge_props.insert(
            props::TARGET_RESOURCE_TYPE.to_string(),
            json!(reference.target_type),
        );
        edge_props.insert(props::TARGET_FHIR_ID.to_string(), json!(reference.target_id));
        self.store.add_edge(&edge_label, source, target, edge_props).await?;
        Ok(true)
    }

    /// Resolve the target vertex: the current version when the resource
    /// exists, otherwise a placeholder (created on demand when allowed).
    async fn resolve_target(
        &self,
        reference: &ParsedReference,
        allow_placeholders: bool,
    ) -> Result<Option<VertexId>> {
        if let Some(current) = self
            .store
            .get_current_version(&reference.target_type, &reference.target_id)
            .await?
        {
            return Ok(Some(current.id));
        }

        if !allow_placeholders {
            return Ok(self
                .store
                .get_vertex_id_by_label_and_property(
                    &reference.target_type,
                    props::ID,
                    &reference.target_id,
                )
                .await?);
        }

        let mut placeholder = PropertyMap::new();
        placeholder.insert(props::RESOURCE_TYPE.to_string(), json!(reference.target_type));
        placeholder.insert(props::ID.to_string(), json!(reference.target_id));
        placeholder.insert(props::IS_PLACEHOLDER.to_string(), json!(true));
        let id = self
            .store
            .upsert_vertex_by_property(
                &reference.target_type,
                props::ID,
                &reference.target_id,
                placeholder,
            )
            .await?;
        Ok(Some(id))
    }

    /// Outgoing reference edges of a resource's current vertex.
    pub async fn references_of(&self, source: VertexId) -> Result<Vec<ReferenceEdge>> {
        let edges = self.store.get_edges_for_vertex(source).await?;
        Ok(edges
            .into_iter()
            .filter(|e| {
                e.direction == geflecht_graph::Direction::Out
                    && e.label.starts_with(labels::REF_PREFIX)
            })
            .map(|e| edge_info(&e))
            .collect())
    }

    /// Resources whose current version references the given vertex,
    /// deduplicated. Edges from archived versions are skipped.
    pub async fn referrers_of(&self, target: VertexId) -> Result<Vec<JsonValue>> {
        let edges = self.store.get_edges_for_vertex(target).await?;
        let mut seen = std::collections::HashSet::new();
        let mut referrers = Vec::new();
        for edge in edges {
            if edge.direction != geflecht_graph::Direction::In
                || !edge.label.starts_with(labels::REF_PREFIX)
            {
                continue;
            }
            let Some(source) = self.store.get_vertex(edge.target).await? else {
                continue;
            };
            if !source.property_bool(props::IS_CURRENT) || source.property_bool(props::IS_DELETED) {
                continue;
            }
            let Some(source_id) = source.property_str(props::ID) else {
                continue;
            };
            let path = edge
                .properties
                .get(props::PATH)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if seen.insert((source.label.clone(), source_id.clone(), path.clone())) {
                referrers.push(json!({
                    "resourceType": source.label,
                    "id": source_id,
                    "path": path,
                }));
            }
        }
        Ok(referrers)
    }
}

fn edge_info(edge: &geflecht_graph::EdgeRecord) -> ReferenceEdge {
    let get = |key: &str| {
        edge.properties
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    ReferenceEdge {
        path: get(props::PATH),
        target_resource_type: get(props::TARGET_RESOURCE_TYPE),
        target_fhir_id: get(props::TARGET_FHIR_ID),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relative_references_are_parsed_with_paths() {
        let resource = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"},
            "performer": [
                {"reference": "Practitioner/dr-a"},
                {"reference": "Organization/org-1"}
            ]
        });
        let refs = parse_references(&resource);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].path, "subject.reference");
        assert_eq!(refs[0].target_type, "Patient");
        assert_eq!(refs[0].target_id, "p1");
        assert_eq!(refs[1].path, "performer[0].reference");
        assert_eq!(refs[2].path, "performer[1].reference");
    }

    #[test]
    fn non_relative_references_are_ignored() {
        let resource = json!({
            "a": {"reference": "http://x/Patient/1"},
            "b": {"reference": "#p1"},
            "c": {"reference": "Patient/"},
            "d": {"reference": ""},
            "e": {"reference": 42},
            "f": {"reference": "urn:uuid:0000"},
            "g": {"reference": "Patient/p1/extra"}
        });
        assert!(parse_references(&resource).is_empty());
    }

    #[test]
    fn parsing_is_pure() {
        let resource = json!({"subject": {"reference": "Patient/p1"}});
        assert_eq!(parse_references(&resource), parse_references(&resource));
    }
}

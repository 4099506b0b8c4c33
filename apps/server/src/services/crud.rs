//! Resource persistence: validate → persist → materialize, plus reads and
//! label-scoped search.

use std::sync::Arc;

use geflecht_graph::{props, GraphStore, PropertyMap};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::{
    models::{PersistOptions, PersistOutcome, Resource, SearchOutcome, SearchResult, UpdateParams},
    services::{locks::ResourceLocks, patch, references::ReferenceService},
    validation::SchemaValidator,
    Error, Result,
};

/// Search inputs after query parsing.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Raw `name=value` pairs; only `_id` and `identifier` are interpreted.
    pub filters: Vec<(String, String)>,
    pub limit: usize,
    pub offset: usize,
}

pub struct CrudService {
    store: Arc<dyn GraphStore>,
    validator: Arc<SchemaValidator>,
    references: ReferenceService,
    locks: Arc<ResourceLocks>,
}

impl CrudService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        validator: Arc<SchemaValidator>,
        references: ReferenceService,
        locks: Arc<ResourceLocks>,
    ) -> Self {
        Self {
            store,
            validator,
            references,
            locks,
        }
    }

    /// Create a resource (POST /{resourceType}).
    ///
    /// A body without an `id` gets a server-assigned UUID. A body with an
    /// `id` upserts that identity, so re-posting the same resource reuses
    /// its vertex.
    pub async fn create(
        &self,
        resource_type: &str,
        resource: JsonValue,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        self.check_body_type(&resource, resource_type)?;
        self.validate_and_persist(resource, options).await
    }

    /// Update a resource (PUT /{resourceType}/{id}).
    ///
    /// The body id, when present, must match the URL id. Update-as-create is
    /// allowed; `If-Match` against a missing resource proceeds as if no
    /// precondition was given.
    pub async fn update(
        &self,
        resource_type: &str,
        fhir_id: &str,
        mut resource: JsonValue,
        params: UpdateParams,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        self.check_body_type(&resource, resource_type)?;
        match resource.get("id").cloned() {
            None | Some(JsonValue::Null) => {
                let obj = resource
                    .as_object_mut()
                    .ok_or_else(|| Error::InvalidResource("Resource must be a JSON object".into()))?;
                obj.insert("id".to_string(), json!(fhir_id));
            }
            Some(JsonValue::String(body_id)) if body_id == fhir_id => {}
            Some(JsonValue::String(body_id)) => {
                return Err(Error::InvalidResource(format!(
                    "Resource id '{body_id}' does not match URL id '{fhir_id}'"
                )));
            }
            Some(_) => {
                return Err(Error::Validation("Invalid id: must be string".into()));
            }
        }

        let _guard = self.locks.acquire(resource_type, fhir_id).await;

        if let Some(expected) = params.if_match {
            if let Some(current) = self.store.get_current_version(resource_type, fhir_id).await? {
                let actual = current.property_str(props::VERSION_ID).unwrap_or_default();
                if actual != expected {
                    return Err(Error::VersionConflict { expected, actual });
                }
            }
        }

        self.persist_locked(resource, options).await
    }

    /// Patch a resource with JSON Patch, then process the result as an
    /// update: re-validate and write a new version.
    pub async fn patch(
        &self,
        resource_type: &str,
        fhir_id: &str,
        patch_document: &JsonValue,
        params: UpdateParams,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        let current = self.read(resource_type, fhir_id).await?;

        if let Some(expected) = &params.if_match {
            if &current.version_id != expected {
                return Err(Error::VersionConflict {
                    expected: expected.clone(),
                    actual: current.version_id,
                });
            }
        }

        let parsed = patch::parse_patch(patch_document)?;
        let mut patched = patch::apply_patch(&current.resource, &parsed)?;

        // A patch must not move the resource to another identity.
        let obj = patched
            .as_object_mut()
            .ok_or_else(|| Error::UnprocessableEntity("Patched resource must be a JSON object".into()))?;
        obj.insert("resourceType".to_string(), json!(resource_type));
        obj.insert("id".to_string(), json!(fhir_id));

        self.validate_and_persist(patched, options).await
    }

    /// Validate and persist any resource (the graph surface and bundle
    /// entries come through here). Returns the persisted resource, whether
    /// it was created, and the count of newly materialized reference edges.
    pub async fn validate_and_persist(
        &self,
        mut resource: JsonValue,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        let (resource_type, fhir_id) = self.validator.extract_resource_info(&resource)?;

        let fhir_id = match fhir_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let obj = resource
                    .as_object_mut()
                    .ok_or_else(|| Error::InvalidResource("Resource must be a JSON object".into()))?;
                obj.insert("id".to_string(), json!(id));
                id
            }
        };

        let _guard = self.locks.acquire(&resource_type, &fhir_id).await;
        self.persist_locked(resource, options).await
    }

    /// Write path with the per-resource lock already held. The body has a
    /// valid `resourceType` and a string `id` at this point.
    async fn persist_locked(
        &self,
        resource: JsonValue,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        let (resource_type, fhir_id) = self.validator.extract_resource_info(&resource)?;
        self.validator.check_resource_type(&resource_type)?;
        self.validator.validate(&resource)?;
        let fhir_id =
            fhir_id.ok_or_else(|| Error::Internal("persist_locked requires an id".into()))?;

        let existing = self.store.get_current_version(&resource_type, &fhir_id).await?;
        let created = match &existing {
            Some(current) => current.property_bool(props::IS_DELETED),
            None => true,
        };

        let raw = serde_json::to_string(&resource)
            .map_err(|e| Error::Internal(format!("cannot serialize resource: {e}")))?;
        let mut vertex_props = PropertyMap::new();
        vertex_props.insert(props::RESOURCE_TYPE.to_string(), json!(resource_type));
        vertex_props.insert(props::JSON.to_string(), json!(raw));

        let write = self
            .store
            .create_versioned_vertex(&resource_type, &fhir_id, vertex_props)
            .await?;

        let materialized = if options.materialize_references {
            self.references
                .materialize(write.graph_id, &resource, options.allow_placeholders)
                .await
        } else {
            0
        };

        tracing::debug!(
            resource = %format!("{resource_type}/{fhir_id}"),
            version = write.version_id,
            materialized,
            "resource persisted"
        );

        Ok(PersistOutcome {
            resource: Resource {
                graph_id: write.graph_id,
                id: fhir_id,
                resource_type,
                version_id: write.version_id.to_string(),
                resource,
                last_updated: write.last_updated,
                deleted: false,
            },
            created,
            materialized_references: materialized,
        })
    }

    /// Read the current version (GET /{resourceType}/{id}). Tombstoned
    /// resources are 410, placeholders and unknown ids 404.
    pub async fn read(&self, resource_type: &str, fhir_id: &str) -> Result<Resource> {
        self.validator.check_resource_type(resource_type)?;
        let vertex = self
            .store
            .get_current_version(resource_type, fhir_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            })?;
        let resource = Resource::from_vertex(&vertex)?;
        if resource.deleted {
            return Err(Error::ResourceDeleted {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: Some(resource.version_id),
            });
        }
        Ok(resource)
    }

    /// Hard delete: drop the resource and its whole version chain from the
    /// graph (the graph surface's DELETE; the FHIR surface tombstones).
    pub async fn hard_delete(&self, resource_type: &str, fhir_id: &str) -> Result<u64> {
        let _guard = self.locks.acquire(resource_type, fhir_id).await;
        let dropped = self.store.delete_all_versions(resource_type, fhir_id).await?;
        if dropped == 0 {
            return Err(Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            });
        }
        Ok(dropped)
    }

    /// Label-scoped search. Only `_id` and `identifier` filters are
    /// interpreted; everything else is ignored. Archives, tombstones, and
    /// placeholders never match.
    pub async fn search(&self, resource_type: &str, params: &SearchParams) -> Result<SearchOutcome> {
        self.validator.check_resource_type(resource_type)?;

        let mut graph_filters: Vec<(String, String)> = vec![
            (props::IS_CURRENT.to_string(), "true".to_string()),
            (props::IS_DELETED.to_string(), "false".to_string()),
        ];
        let mut identifier_tokens: Vec<String> = Vec::new();
        for (name, value) in &params.filters {
            match name.as_str() {
                "_id" => graph_filters.push((props::ID.to_string(), value.clone())),
                "identifier" => identifier_tokens.push(value.clone()),
                _ => {}
            }
        }

        if identifier_tokens.is_empty() {
            let vertices = self
                .store
                .get_vertices_by_label(resource_type, &graph_filters, params.limit, params.offset)
                .await?;
            let total = self
                .store
                .count_vertices_by_label(resource_type, &graph_filters)
                .await?;
            return Ok(SearchOutcome {
                results: vertices.iter().map(SearchResult::from_vertex).collect(),
                total,
            });
        }

        // Identifier tokens live inside the stored JSON, not on the vertex,
        // so fetch the label scope and filter here.
        let vertices = self
            .store
            .get_vertices_by_label(resource_type, &graph_filters, usize::MAX, 0)
            .await?;
        let matching: Vec<SearchResult> = vertices
            .iter()
            .map(SearchResult::from_vertex)
            .filter(|result| {
                result
                    .json
                    .as_ref()
                    .map(|json| {
                        identifier_tokens
                            .iter()
                            .all(|token| identifier_matches(json, token))
                    })
                    .unwrap_or(false)
            })
            .collect();
        let total = matching.len() as u64;
        let results = matching
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .collect();
        Ok(SearchOutcome { results, total })
    }

    /// Cross-type search: the given types, or every supported type.
    /// `totalCount` is the sum of the per-type totals; results are clipped
    /// to the page at the end.
    pub async fn search_all_types(
        &self,
        resource_types: Option<Vec<String>>,
        params: &SearchParams,
    ) -> Result<SearchOutcome> {
        let types = match resource_types {
            Some(types) if !types.is_empty() => types,
            _ => self.validator.list_supported_types(),
        };

        let per_type = SearchParams {
            filters: params.filters.clone(),
            limit: params.offset + params.limit,
            offset: 0,
        };

        let mut results = Vec::new();
        let mut total = 0;
        for resource_type in types {
            let outcome = self.search(&resource_type, &per_type).await?;
            total += outcome.total;
            results.extend(outcome.results);
        }

        let results = results
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .collect();
        Ok(SearchOutcome { results, total })
    }

    fn check_body_type(&self, resource: &JsonValue, expected: &str) -> Result<()> {
        let actual = resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidResource("Missing resourceType field".into()))?;
        if actual != expected {
            return Err(Error::InvalidResource(format!(
                "Resource type mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }
}

/// Token search over `identifier[]`: `value` matches any identifier value,
/// `system|value` matches both parts.
fn identifier_matches(resource: &JsonValue, token: &str) -> bool {
    let Some(identifiers) = resource.get("identifier").and_then(|v| v.as_array()) else {
        return false;
    };
    identifiers.iter().any(|identifier| {
        let value = identifier.get("value").and_then(|v| v.as_str());
        let system = identifier.get("system").and_then(|v| v.as_str());
        match token.split_once('|') {
            Some((wanted_system, wanted_value)) => {
                system == Some(wanted_system) && value == Some(wanted_value)
            }
            None => value == Some(token),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_tokens_match_value_and_system_value() {
        let resource = json!({
            "identifier": [
                {"system": "urn:mrn", "value": "abc"},
                {"value": "xyz"}
            ]
        });
        assert!(identifier_matches(&resource, "abc"));
        assert!(identifier_matches(&resource, "urn:mrn|abc"));
        assert!(identifier_matches(&resource, "xyz"));
        assert!(!identifier_matches(&resource, "urn:other|abc"));
        assert!(!identifier_matches(&resource, "nope"));
        assert!(!identifier_matches(&json!({}), "abc"));
    }
}

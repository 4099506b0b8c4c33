//! Patient/$everything: compartment traversal over reference edges.

use std::sync::Arc;

use geflecht_graph::{props, GraphStore};
use serde_json::{json, Value as JsonValue};

use crate::{models::Resource, Error, Result};

/// Compartment traversal depth. Three hops covers patient → clinical
/// resource → supporting resource chains.
const MAX_HOPS: usize = 3;

pub struct EverythingService {
    store: Arc<dyn GraphStore>,
}

impl EverythingService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Build the `$everything` searchset for one resource: the resource
    /// itself first, then every current, non-placeholder resource reachable
    /// over reference edges within three hops, each once.
    pub async fn everything(
        &self,
        resource_type: &str,
        fhir_id: &str,
        limit: usize,
        self_link: &str,
    ) -> Result<JsonValue> {
        let root = self
            .store
            .get_current_version(resource_type, fhir_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            })?;
        let root_resource = Resource::from_vertex(&root)?;
        if root_resource.deleted {
            return Err(Error::ResourceDeleted {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: Some(root_resource.version_id),
            });
        }

        let mut resources = vec![root_resource];
        let reached = self.store.traverse(root.id, MAX_HOPS, None, limit).await?;
        for vertex in reached {
            if vertex.property_bool(props::IS_PLACEHOLDER)
                || vertex.property_bool(props::IS_DELETED)
                || !vertex.property_bool(props::IS_CURRENT)
            {
                continue;
            }
            resources.push(Resource::from_vertex(&vertex)?);
        }

        let entries: Vec<JsonValue> = resources
            .iter()
            .map(|r| {
                json!({
                    "fullUrl": format!("{}/{}", r.resource_type, r.id),
                    "resource": r.resource,
                })
            })
            .collect();

        Ok(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": entries.len(),
            "link": [{"relation": "self", "url": self_link}],
            "entry": entries,
        }))
    }
}

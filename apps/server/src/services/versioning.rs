//! Version-aware reads and deletes: vread, histories, tombstones, purges.
//!
//! All history orderings are newest-first (`lastUpdated` desc, ties broken
//! by `versionId` desc) and clipped to the caller's limit.

use std::sync::Arc;

use geflecht_graph::{props, GraphStore, Vertex};

use crate::{
    models::{HistoryEntry, HistoryMethod, HistoryResult, Resource},
    services::locks::ResourceLocks,
    validation::SchemaValidator,
    Error, Result,
};

pub struct VersionService {
    store: Arc<dyn GraphStore>,
    validator: Arc<SchemaValidator>,
    locks: Arc<ResourceLocks>,
}

impl VersionService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        validator: Arc<SchemaValidator>,
        locks: Arc<ResourceLocks>,
    ) -> Self {
        Self {
            store,
            validator,
            locks,
        }
    }

    /// Read one version (GET /{type}/{id}/_history/{vid}).
    ///
    /// 410 when that version is a deletion, 404 when it does not exist.
    pub async fn vread(
        &self,
        resource_type: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<Resource> {
        self.validator.check_resource_type(resource_type)?;
        let vertex = self
            .store
            .get_version(resource_type, fhir_id, version_id)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: version_id.to_string(),
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

    /// Instance history (GET /{type}/{id}/_history), 404 for a resource
    /// that never existed.
    pub async fn instance_history(
        &self,
        resource_type: &str,
        fhir_id: &str,
        count: usize,
    ) -> Result<HistoryResult> {
        self.validator.check_resource_type(resource_type)?;
        let all = self
            .store
            .get_version_history(resource_type, fhir_id, usize::MAX)
            .await?;
        if all.is_empty() {
            return Err(Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            });
        }
        let total = all.len() as u64;
        Ok(HistoryResult {
            entries: to_entries(all.into_iter().take(count))?,
            total: Some(total),
        })
    }

    /// Type history (GET /{type}/_history).
    pub async fn type_history(
        &self,
        resource_type: &str,
        count: usize,
        since: Option<&str>,
    ) -> Result<HistoryResult> {
        self.validator.check_resource_type(resource_type)?;
        let vertices = match since {
            Some(since) => {
                self.store
                    .get_type_history_since(resource_type, since, count)
                    .await?
            }
            None => self.store.get_type_history(resource_type, count).await?,
        };
        Ok(HistoryResult {
            entries: to_entries(vertices.into_iter())?,
            total: None,
        })
    }

    /// System history (GET /_history): every supported type's history,
    /// merged newest-first and clipped.
    pub async fn system_history(&self, count: usize, since: Option<&str>) -> Result<HistoryResult> {
        let mut merged: Vec<Vertex> = Vec::new();
        for resource_type in self.validator.list_supported_types() {
            let vertices = match since {
                Some(since) => {
                    self.store
                        .get_type_history_since(&resource_type, since, count)
                        .await?
                }
                None => self.store.get_type_history(&resource_type, count).await?,
            };
            merged.extend(vertices);
        }

        merged.sort_by(|a, b| {
            let key = |v: &Vertex| {
                (
                    v.property_str(props::LAST_UPDATED).unwrap_or_default(),
                    v.property_str(props::VERSION_ID)
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(0),
                )
            };
            key(b).cmp(&key(a))
        });
        merged.truncate(count);

        Ok(HistoryResult {
            entries: to_entries(merged.into_iter())?,
            total: None,
        })
    }

    /// Soft delete (DELETE /{type}/{id}): write a tombstone version.
    ///
    /// Fails 404 when no current version exists and 409 when the resource is
    /// already tombstoned.
    pub async fn tombstone(&self, resource_type: &str, fhir_id: &str) -> Result<Resource> {
        self.validator.check_resource_type(resource_type)?;
        let _guard = self.locks.acquire(resource_type, fhir_id).await;

        let current = self
            .store
            .get_current_version(resource_type, fhir_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            })?;
        if current.property_bool(props::IS_DELETED) {
            return Err(Error::Conflict(format!(
                "{resource_type}/{fhir_id} is already deleted"
            )));
        }

        let write = self
            .store
            .create_tombstone(resource_type, fhir_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
            })?;

        Ok(Resource {
            graph_id: write.graph_id,
            id: fhir_id.to_string(),
            resource_type: resource_type.to_string(),
            version_id: write.version_id.to_string(),
            resource: serde_json::json!({"resourceType": resource_type, "id": fhir_id}),
            last_updated: write.last_updated,
            deleted: true,
        })
    }

    /// Purge (DELETE /{type}/{id}/_history): drop the resource and every
    /// version. Returns the number of vertices dropped.
    pub async fn delete_all_versions(&self, resource_type: &str, fhir_id: &str) -> Result<u64> {
        self.validator.check_resource_type(resource_type)?;
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

    /// Drop one archived version (DELETE /{type}/{id}/_history/{vid}).
    /// Refuses the current version with 409.
    pub async fn delete_version(
        &self,
        resource_type: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<()> {
        self.validator.check_resource_type(resource_type)?;
        let _guard = self.locks.acquire(resource_type, fhir_id).await;
        let deleted = self
            .store
            .delete_version(resource_type, fhir_id, version_id)
            .await?;
        if !deleted {
            return Err(Error::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: version_id.to_string(),
            });
        }
        Ok(())
    }
}

fn to_entries(vertices: impl Iterator<Item = Vertex>) -> Result<Vec<HistoryEntry>> {
    vertices
        .map(|vertex| {
            let resource = Resource::from_vertex(&vertex)?;
            let method = HistoryMethod::for_resource(&resource);
            Ok(HistoryEntry { resource, method })
        })
        .collect()
}

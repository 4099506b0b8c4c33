//! Bundle processing: batch and transaction semantics.
//!
//! Entries are dispatched per `request.{method, url}`. Both modes process in
//! the canonical DELETE → POST → PUT/PATCH → GET order; a batch reports each
//! entry's outcome independently, a transaction aborts on the first failure.
//! The graph backend offers no multi-write transaction, so a transaction
//! that fails after its first successful write surfaces as 500 with no
//! rollback.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use geflecht_graph::VertexId;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    api::headers::parse_etag,
    models::{
        Bundle, BundleEntry, BundleEntryResponse, BundleType, PersistOptions, Resource,
        UpdateParams,
    },
    services::{
        conditional::{ConditionalCreateOutcome, ConditionalService},
        crud::CrudService,
        versioning::VersionService,
    },
    Error, Result,
};

pub struct BundleService {
    crud: Arc<CrudService>,
    versions: Arc<VersionService>,
    conditional: Arc<ConditionalService>,
    persist_options: PersistOptions,
    conditional_delete_multiple: bool,
}

impl BundleService {
    pub fn new(
        crud: Arc<CrudService>,
        versions: Arc<VersionService>,
        conditional: Arc<ConditionalService>,
        persist_options: PersistOptions,
        conditional_delete_multiple: bool,
    ) -> Self {
        Self {
            crud,
            versions,
            conditional,
            persist_options,
            conditional_delete_multiple,
        }
    }

    /// Process a batch or transaction bundle into its response bundle.
    pub async fn process(&self, bundle_json: JsonValue) -> Result<JsonValue> {
        let bundle: Bundle = serde_json::from_value(bundle_json)
            .map_err(|e| Error::InvalidResource(format!("Invalid Bundle: {e}")))?;
        if bundle.resource_type != "Bundle" {
            return Err(Error::InvalidResource(format!(
                "Expected a Bundle, got {}",
                bundle.resource_type
            )));
        }

        let (is_transaction, response_type) = match bundle.bundle_type {
            BundleType::Batch => (false, BundleType::BatchResponse),
            BundleType::Transaction => (true, BundleType::TransactionResponse),
            other => {
                return Err(Error::InvalidResource(format!(
                    "Unsupported Bundle type: {other:?}. Expected 'batch' or 'transaction'"
                )))
            }
        };

        let entries = bundle.entry.unwrap_or_default();
        let ordered = processing_order(&entries)?;
        let mut response_entries = vec![BundleEntry::default(); entries.len()];

        // Bundle-local urns → assigned identities; recorded for every
        // successful write so intra-bundle references can be resolved by a
        // follow-on pass.
        let mut full_url_table: HashMap<String, (VertexId, String)> = HashMap::new();
        let mut mutations = 0u32;

        for index in ordered {
            let entry = &entries[index];
            match self.process_entry(entry, index).await {
                Ok(processed) => {
                    if processed.mutated {
                        mutations += 1;
                    }
                    if let (Some(full_url), Some(identity)) =
                        (entry.full_url.as_deref(), processed.identity.as_ref())
                    {
                        full_url_table.insert(full_url.to_string(), identity.clone());
                    }
                    response_entries[index] = processed.entry;
                }
                Err(error) if is_transaction => {
                    if mutations > 0 {
                        return Err(Error::Internal(format!(
                            "Transaction failed at entry {index} after {mutations} entries were \
                             applied; the graph backend cannot roll back: {error}"
                        )));
                    }
                    return Err(Error::TransactionAborted {
                        code: error.issue_code(),
                        message: format!("Transaction failed at entry {index}: {error}"),
                    });
                }
                Err(error) => {
                    response_entries[index] = error_entry(entry.full_url.as_deref(), &error);
                }
            }
        }

        if !full_url_table.is_empty() {
            tracing::debug!(?full_url_table, "bundle fullUrl assignments recorded");
        }

        let response = Bundle {
            resource_type: "Bundle".to_string(),
            id: Some(Uuid::new_v4().to_string()),
            bundle_type: response_type,
            timestamp: None,
            total: None,
            link: None,
            entry: Some(response_entries),
            extensions: HashMap::new(),
        };
        serde_json::to_value(response)
            .map_err(|e| Error::Internal(format!("Failed to serialize response bundle: {e}")))
    }

    async fn process_entry(&self, entry: &BundleEntry, index: usize) -> Result<ProcessedEntry> {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Bundle entry {index} missing request"))
        })?;

        let method = request.method.to_uppercase();
        let parsed = ParsedUrl::parse(&request.url);

        match method.as_str() {
            "GET" | "HEAD" => {
                let resource_type = parsed.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} GET missing resource type in request.url"
                    ))
                })?;
                let Some(resource_id) = parsed.resource_id else {
                    return Err(Error::NotImplemented(
                        "Search within bundles is not implemented".to_string(),
                    ));
                };

                let resource = self.crud.read(&resource_type, &resource_id).await?;
                Ok(ProcessedEntry {
                    entry: success_entry(
                        StatusCode::OK,
                        Some(format!("{resource_type}/{resource_id}")),
                        None,
                        &resource,
                        method != "HEAD",
                    ),
                    identity: Some((resource.graph_id, resource.id)),
                    mutated: false,
                })
            }
            "POST" => {
                let resource_type = parsed.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} POST missing resource type in request.url"
                    ))
                })?;
                let resource = entry.resource.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Bundle entry {index} POST missing resource"))
                })?;

                let (resource, status) = match request.if_none_exist.as_deref() {
                    Some(criteria) => {
                        match self
                            .conditional
                            .create(&resource_type, resource, criteria, self.persist_options)
                            .await?
                        {
                            ConditionalCreateOutcome::Created(outcome) => {
                                (outcome.resource, StatusCode::CREATED)
                            }
                            ConditionalCreateOutcome::Existing(existing) => {
                                (existing, StatusCode::OK)
                            }
                        }
                    }
                    None => {
                        let outcome = self
                            .crud
                            .create(&resource_type, resource, self.persist_options)
                            .await?;
                        let status = if outcome.created {
                            StatusCode::CREATED
                        } else {
                            StatusCode::OK
                        };
                        (outcome.resource, status)
                    }
                };

                let location = format!("{}/{}", resource.resource_type, resource.id);
                Ok(ProcessedEntry {
                    identity: Some((resource.graph_id, resource.id.clone())),
                    mutated: status == StatusCode::CREATED,
                    entry: success_entry(
                        status,
                        entry.full_url.clone(),
                        Some(location),
                        &resource,
                        true,
                    ),
                })
            }
            "PUT" => {
                let resource_type = parsed.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} PUT missing resource type in request.url"
                    ))
                })?;
                let resource = entry.resource.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Bundle entry {index} PUT missing resource"))
                })?;

                let outcome = match parsed.resource_id {
                    Some(resource_id) => {
                        let params = UpdateParams {
                            if_match: request.if_match.as_deref().and_then(parse_etag),
                        };
                        self.crud
                            .update(
                                &resource_type,
                                &resource_id,
                                resource,
                                params,
                                self.persist_options,
                            )
                            .await?
                    }
                    None => {
                        let criteria = parsed.query.as_deref().ok_or_else(|| {
                            Error::InvalidResource(format!(
                                "Bundle entry {index} PUT missing resource id and conditional \
                                 criteria in request.url"
                            ))
                        })?;
                        self.conditional
                            .update(&resource_type, criteria, resource, self.persist_options)
                            .await?
                    }
                };

                let status = if outcome.created {
                    StatusCode::CREATED
                } else {
                    StatusCode::OK
                };
                let location = format!("{}/{}", outcome.resource.resource_type, outcome.resource.id);
                Ok(ProcessedEntry {
                    identity: Some((outcome.resource.graph_id, outcome.resource.id.clone())),
                    mutated: true,
                    entry: success_entry(
                        status,
                        entry.full_url.clone(),
                        Some(location),
                        &outcome.resource,
                        true,
                    ),
                })
            }
            "PATCH" => {
                let resource_type = parsed.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} PATCH missing resource type in request.url"
                    ))
                })?;
                let payload = entry.resource.as_ref().ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} PATCH missing patch payload"
                    ))
                })?;
                let patch_document = patch_document_from_entry(payload)?;

                let outcome = match parsed.resource_id {
                    Some(resource_id) => {
                        let params = UpdateParams {
                            if_match: request.if_match.as_deref().and_then(parse_etag),
                        };
                        self.crud
                            .patch(
                                &resource_type,
                                &resource_id,
                                &patch_document,
                                params,
                                self.persist_options,
                            )
                            .await?
                    }
                    None => {
                        let criteria = parsed.query.as_deref().ok_or_else(|| {
                            Error::InvalidResource(format!(
                                "Bundle entry {index} PATCH missing resource id and conditional \
                                 criteria in request.url"
                            ))
                        })?;
                        self.conditional
                            .patch(
                                &resource_type,
                                criteria,
                                &patch_document,
                                self.persist_options,
                            )
                            .await?
                    }
                };

                let location = format!("{}/{}", outcome.resource.resource_type, outcome.resource.id);
                Ok(ProcessedEntry {
                    identity: Some((outcome.resource.graph_id, outcome.resource.id.clone())),
                    mutated: true,
                    entry: success_entry(
                        StatusCode::OK,
                        entry.full_url.clone(),
                        Some(location),
                        &outcome.resource,
                        true,
                    ),
                })
            }
            "DELETE" => {
                let resource_type = parsed.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Bundle entry {index} DELETE missing resource type in request.url"
                    ))
                })?;

                let etag = match parsed.resource_id {
                    Some(resource_id) => {
                        let tombstone = self.versions.tombstone(&resource_type, &resource_id).await?;
                        Some(format!("W/\"{}\"", tombstone.version_id))
                    }
                    None => {
                        let criteria = parsed.query.as_deref().ok_or_else(|| {
                            Error::InvalidResource(format!(
                                "Bundle entry {index} DELETE missing resource id and conditional \
                                 criteria in request.url"
                            ))
                        })?;
                        self.conditional
                            .delete(&resource_type, criteria, self.conditional_delete_multiple)
                            .await?;
                        None
                    }
                };

                Ok(ProcessedEntry {
                    identity: None,
                    mutated: true,
                    entry: BundleEntry {
                        full_url: entry.full_url.clone(),
                        response: Some(BundleEntryResponse {
                            status: status_line(StatusCode::NO_CONTENT),
                            location: None,
                            etag,
                            last_modified: None,
                            outcome: None,
                        }),
                        ..BundleEntry::default()
                    },
                })
            }
            other => Err(Error::MethodNotAllowed(format!(
                "Bundle entry {index} has unsupported method {other}"
            ))),
        }
    }
}

struct ProcessedEntry {
    entry: BundleEntry,
    identity: Option<(VertexId, String)>,
    mutated: bool,
}

/// Canonical processing order: DELETE, then POST, then PUT/PATCH, then GET.
fn processing_order(entries: &[BundleEntry]) -> Result<Vec<usize>> {
    let mut deletes = Vec::new();
    let mut posts = Vec::new();
    let mut puts = Vec::new();
    let mut gets = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Bundle entry {index} missing request"))
        })?;
        match request.method.to_uppercase().as_str() {
            "DELETE" => deletes.push(index),
            "POST" => posts.push(index),
            "PUT" | "PATCH" => puts.push(index),
            // Unsupported methods surface a per-entry error during
            // processing.
            _ => gets.push(index),
        }
    }

    deletes.extend(posts);
    deletes.extend(puts);
    deletes.extend(gets);
    Ok(deletes)
}

fn success_entry(
    status: StatusCode,
    full_url: Option<String>,
    location: Option<String>,
    resource: &Resource,
    include_body: bool,
) -> BundleEntry {
    BundleEntry {
        full_url,
        request: None,
        resource: include_body.then(|| resource.resource.clone()),
        response: Some(BundleEntryResponse {
            status: status_line(status),
            location,
            etag: Some(format!("W/\"{}\"", resource.version_id)),
            last_modified: Some(resource.last_updated.clone()),
            outcome: None,
        }),
        extensions: HashMap::new(),
    }
}

fn error_entry(full_url: Option<&str>, error: &Error) -> BundleEntry {
    BundleEntry {
        full_url: full_url.map(str::to_string),
        response: Some(BundleEntryResponse {
            status: status_line(error.status()),
            location: None,
            etag: None,
            last_modified: None,
            outcome: Some(error.to_operation_outcome()),
        }),
        ..BundleEntry::default()
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// The PATCH payload inside a bundle entry: either a raw JSON Patch array or
/// a FHIR Binary resource wrapping one.
fn patch_document_from_entry(payload: &JsonValue) -> Result<JsonValue> {
    if payload.is_array() {
        return Ok(payload.clone());
    }

    let resource_type = payload
        .get("resourceType")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if resource_type != "Binary" {
        return Err(Error::InvalidResource(
            "Bundle PATCH requires a JSON Patch array or a Binary resource payload".to_string(),
        ));
    }

    let content_type = payload
        .get("contentType")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if content_type != "application/json-patch+json" {
        return Err(Error::InvalidResource(format!(
            "Unsupported PATCH Binary.contentType '{content_type}'. \
             Supported: application/json-patch+json"
        )));
    }

    let data = payload
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidResource("Binary.data missing".to_string()))?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| Error::InvalidResource(format!("Invalid base64 in Binary.data: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::UnprocessableEntity(format!("Invalid JSON Patch document: {e}")))
}

/// `request.url` of a bundle entry: `Type`, `Type/Id`, optionally absolute,
/// optionally with a query. `_history` suffixes are not addressable inside
/// bundles and are truncated.
#[derive(Debug, Clone)]
struct ParsedUrl {
    resource_type: Option<String>,
    resource_id: Option<String>,
    query: Option<String>,
}

impl ParsedUrl {
    fn parse(raw: &str) -> Self {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (raw, None),
        };

        // An absolute URL contributes only its path after the authority.
        let path = match path.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
            None => path,
        };

        // Only the trailing `Type/Id` pair identifies the target; anything
        // from `_history` on is not addressable inside a bundle. A two-slot
        // window over the segments keeps exactly that tail.
        let mut tail: [Option<&str>; 2] = [None, None];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "_history" {
                break;
            }
            tail = [tail[1], Some(segment)];
        }

        let (resource_type, resource_id) = match tail {
            [Some(resource_type), Some(resource_id)] => (
                Some(resource_type.to_string()),
                Some(resource_id.to_string()),
            ),
            [None, Some(resource_type)] => (Some(resource_type.to_string()), None),
            _ => (None, None),
        };

        Self {
            resource_type,
            resource_id,
            query,
        }
    }
}

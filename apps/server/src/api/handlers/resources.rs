//! Instance- and type-level FHIR interactions.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value as JsonValue};

use crate::{
    api::headers::{header_str, parse_etag, parse_query, query_flag, query_param},
    api::response::FhirResponse,
    models::{HistoryResult, PersistOptions, PersistOutcome, SearchOutcome, UpdateParams},
    services::{ConditionalCreateOutcome, SearchParams},
    state::AppState,
    Result,
};

// ---------------------------------------------------------------------------
// Create / read / update / patch / delete
// ---------------------------------------------------------------------------

/// POST /{type}: create, or conditional create with `If-None-Exist`.
pub async fn create(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let options = persist_options(&state, &pairs);

    if let Some(criteria) = header_str(&headers, "if-none-exist") {
        return match state
            .conditional
            .create(&resource_type, body, criteria, options)
            .await?
        {
            ConditionalCreateOutcome::Created(outcome) => Ok(persist_response(&state, outcome)),
            ConditionalCreateOutcome::Existing(resource) => {
                Ok(FhirResponse::new(StatusCode::OK).with_resource(&resource))
            }
        };
    }

    let outcome = state.crud.create(&resource_type, body, options).await?;
    Ok(persist_response(&state, outcome))
}

/// GET /{type}/{id}: current version; `If-None-Match` turns a match into
/// 304. The token may be the version id or the graph id.
pub async fn read(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<FhirResponse> {
    let resource = state.crud.read(&resource_type, &fhir_id).await?;

    if let Some(token) = header_str(&headers, "if-none-match").and_then(parse_etag) {
        if token == resource.version_id || token == resource.graph_id.to_string() {
            return Ok(FhirResponse::new(StatusCode::NOT_MODIFIED).with_version_headers(&resource));
        }
    }

    Ok(FhirResponse::new(StatusCode::OK).with_resource(&resource))
}

/// PUT /{type}/{id}: update or create-as-update; honors `If-Match`.
pub async fn update(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let params = UpdateParams {
        if_match: header_str(&headers, "if-match").and_then(parse_etag),
    };
    let outcome = state
        .crud
        .update(
            &resource_type,
            &fhir_id,
            body,
            params,
            persist_options(&state, &pairs),
        )
        .await?;
    Ok(persist_response(&state, outcome))
}

/// PUT /{type}?criteria: conditional update.
pub async fn conditional_update(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    Json(body): Json<JsonValue>,
) -> Result<FhirResponse> {
    let criteria = query.unwrap_or_default();
    let options = state.persist_defaults();
    let outcome = state
        .conditional
        .update(&resource_type, &criteria, body, options)
        .await?;
    Ok(persist_response(&state, outcome))
}

/// PATCH /{type}/{id}: JSON Patch against the current version.
pub async fn patch(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch_document): Json<JsonValue>,
) -> Result<FhirResponse> {
    let params = UpdateParams {
        if_match: header_str(&headers, "if-match").and_then(parse_etag),
    };
    let outcome = state
        .crud
        .patch(
            &resource_type,
            &fhir_id,
            &patch_document,
            params,
            state.persist_defaults(),
        )
        .await?;
    Ok(FhirResponse::new(StatusCode::OK)
        .with_resource(&outcome.resource)
        .with_location(instance_location(&state, &outcome)))
}

/// PATCH /{type}?criteria: conditional patch.
pub async fn conditional_patch(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    Json(patch_document): Json<JsonValue>,
) -> Result<FhirResponse> {
    let criteria = query.unwrap_or_default();
    let outcome = state
        .conditional
        .patch(
            &resource_type,
            &criteria,
            &patch_document,
            state.persist_defaults(),
        )
        .await?;
    Ok(FhirResponse::new(StatusCode::OK).with_resource(&outcome.resource))
}

/// DELETE /{type}/{id}: tombstone the current version.
pub async fn delete(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<FhirResponse> {
    let tombstone = state.versions.tombstone(&resource_type, &fhir_id).await?;
    Ok(FhirResponse::new(StatusCode::NO_CONTENT).with_etag_token(&tombstone.version_id))
}

/// DELETE /{type}?criteria: conditional delete.
pub async fn conditional_delete(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let criteria = query.unwrap_or_default();
    state
        .conditional
        .delete(
            &resource_type,
            &criteria,
            state.config.fhir.conditional_delete_multiple,
        )
        .await?;
    Ok(FhirResponse::new(StatusCode::NO_CONTENT))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// GET /{type} and GET|POST /{type}/_search.
pub async fn search_type(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let params = search_params(&state, &pairs);
    let outcome = state.crud.search(&resource_type, &params).await?;
    let self_link = format!(
        "{}/{}{}",
        state.config.fhir_base_url(),
        resource_type,
        query.map(|q| format!("?{q}")).unwrap_or_default()
    );
    Ok(FhirResponse::new(StatusCode::OK).with_body(searchset_bundle(&state, outcome, &self_link)))
}

// ---------------------------------------------------------------------------
// Versions and history
// ---------------------------------------------------------------------------

/// GET /{type}/{id}/_history/{vid}: vread.
pub async fn vread(
    State(state): State<AppState>,
    Path((resource_type, fhir_id, version_id)): Path<(String, String, String)>,
) -> Result<FhirResponse> {
    let resource = state
        .versions
        .vread(&resource_type, &fhir_id, &version_id)
        .await?;
    Ok(FhirResponse::new(StatusCode::OK).with_resource(&resource))
}

/// GET /{type}/{id}/_history.
pub async fn instance_history(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let count = count_param(&state, &pairs);
    let history = state
        .versions
        .instance_history(&resource_type, &fhir_id, count)
        .await?;
    let self_link = format!(
        "{}/{}/{}/_history",
        state.config.fhir_base_url(),
        resource_type,
        fhir_id
    );
    Ok(FhirResponse::new(StatusCode::OK).with_body(history_bundle(&state, history, &self_link)))
}

/// GET /{type}/_history.
pub async fn type_history(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let count = count_param(&state, &pairs);
    let since = query_param(&pairs, "_since");
    let history = state
        .versions
        .type_history(&resource_type, count, since)
        .await?;
    let self_link = format!("{}/{}/_history", state.config.fhir_base_url(), resource_type);
    Ok(FhirResponse::new(StatusCode::OK).with_body(history_bundle(&state, history, &self_link)))
}

/// DELETE /{type}/{id}/_history: purge the resource and all versions.
pub async fn delete_history(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<FhirResponse> {
    state
        .versions
        .delete_all_versions(&resource_type, &fhir_id)
        .await?;
    Ok(FhirResponse::new(StatusCode::NO_CONTENT))
}

/// DELETE /{type}/{id}/_history/{vid}: drop one archived version.
pub async fn delete_history_version(
    State(state): State<AppState>,
    Path((resource_type, fhir_id, version_id)): Path<(String, String, String)>,
) -> Result<FhirResponse> {
    state
        .versions
        .delete_version(&resource_type, &fhir_id, &version_id)
        .await?;
    Ok(FhirResponse::new(StatusCode::NO_CONTENT))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// POST /{type}/$validate: validation without persistence. The outcome is
/// always 200; the result lives in the OperationOutcome severity.
pub async fn validate(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<FhirResponse> {
    let result = validate_against_type(&state, &resource_type, &body);
    let outcome = match result {
        Ok(()) => crate::error::operation_outcome(
            "information",
            "informational",
            "Validation successful",
        ),
        Err(error) => error.to_operation_outcome(),
    };
    Ok(FhirResponse::new(StatusCode::OK).with_body(outcome))
}

fn validate_against_type(
    state: &AppState,
    resource_type: &str,
    body: &JsonValue,
) -> Result<()> {
    let (body_type, _) = state.validator.extract_resource_info(body)?;
    if body_type != resource_type {
        return Err(crate::Error::Validation(format!(
            "Resource type mismatch: expected {resource_type}, got {body_type}"
        )));
    }
    state.validator.check_resource_type(&body_type)?;
    state.validator.validate(body)
}

/// GET /{type}/{id}/$everything: compartment traversal.
pub async fn everything(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let limit = query_param(&pairs, "_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.fhir.everything_limit)
        .min(state.config.fhir.max_page_size);
    let self_link = format!(
        "{}/{}/{}/$everything",
        state.config.fhir_base_url(),
        resource_type,
        fhir_id
    );
    let bundle = state
        .everything
        .everything(&resource_type, &fhir_id, limit, &self_link)
        .await?;
    Ok(FhirResponse::new(StatusCode::OK).with_body(bundle))
}

// ---------------------------------------------------------------------------
// Shared handler helpers
// ---------------------------------------------------------------------------

pub(crate) fn persist_options(state: &AppState, pairs: &[(String, String)]) -> PersistOptions {
    let defaults = state.persist_defaults();
    PersistOptions {
        materialize_references: query_flag(
            pairs,
            "materializeReferences",
            defaults.materialize_references,
        ),
        allow_placeholders: query_flag(pairs, "allowPlaceholders", defaults.allow_placeholders),
    }
}

pub(crate) fn search_params(state: &AppState, pairs: &[(String, String)]) -> SearchParams {
    let limit = query_param(pairs, "_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.fhir.search_page_size)
        .min(state.config.fhir.max_page_size);
    let offset = query_param(pairs, "_offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let filters = pairs
        .iter()
        .filter(|(name, _)| !name.starts_with('_') || name == "_id")
        .cloned()
        .collect();
    SearchParams {
        filters,
        limit,
        offset,
    }
}

pub(crate) fn count_param(state: &AppState, pairs: &[(String, String)]) -> usize {
    query_param(pairs, "_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.fhir.search_page_size)
        .min(state.config.fhir.max_page_size)
}

pub(crate) fn instance_location(state: &AppState, outcome: &PersistOutcome) -> String {
    format!(
        "{}/{}/{}",
        state.config.fhir_base_url(),
        outcome.resource.resource_type,
        outcome.resource.id
    )
}

/// 201 with `Location` for creations, 200 for updates; both carry the
/// resource body and version headers.
pub(crate) fn persist_response(state: &AppState, outcome: PersistOutcome) -> FhirResponse {
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let location = instance_location(state, &outcome);
    FhirResponse::new(status)
        .with_resource(&outcome.resource)
        .with_location(location)
}

pub(crate) fn searchset_bundle(
    state: &AppState,
    outcome: SearchOutcome,
    self_link: &str,
) -> JsonValue {
    let base = state.config.fhir_base_url();
    let entries: Vec<JsonValue> = outcome
        .results
        .iter()
        .filter_map(|result| {
            let json = result.json.as_ref()?;
            let full_url = result
                .fhir_id
                .as_ref()
                .map(|id| format!("{base}/{}/{id}", result.resource_type));
            Some(json!({
                "fullUrl": full_url,
                "resource": json,
                "search": {"mode": "match"}
            }))
        })
        .collect();

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": outcome.total,
        "link": [{"relation": "self", "url": self_link}],
        "entry": entries,
    })
}

pub(crate) fn history_bundle(
    state: &AppState,
    history: HistoryResult,
    self_link: &str,
) -> JsonValue {
    let base = state.config.fhir_base_url();
    let entries: Vec<JsonValue> = history
        .entries
        .iter()
        .map(|entry| {
            let resource = &entry.resource;
            let method = entry.method;
            let mut value = json!({
                "fullUrl": format!("{base}/{}/{}", resource.resource_type, resource.id),
                "request": {
                    "method": method.as_str(),
                    "url": match method {
                        crate::models::HistoryMethod::Post => resource.resource_type.clone(),
                        _ => format!("{}/{}", resource.resource_type, resource.id),
                    }
                },
                "response": {
                    "status": match method {
                        crate::models::HistoryMethod::Post => "201 Created",
                        crate::models::HistoryMethod::Put => "200 OK",
                        crate::models::HistoryMethod::Delete => "204 No Content",
                    },
                    "etag": format!("W/\"{}\"", resource.version_id),
                    "lastModified": resource.last_updated,
                }
            });
            // Deletion entries carry no resource body.
            if method != crate::models::HistoryMethod::Delete {
                value["resource"] = resource.resource.clone();
            }
            value
        })
        .collect();

    json!({
        "resourceType": "Bundle",
        "type": "history",
        "total": history.total,
        "link": [{"relation": "self", "url": self_link}],
        "entry": entries,
    })
}

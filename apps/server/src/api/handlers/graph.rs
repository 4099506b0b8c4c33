//! Graph-native endpoints: raw persistence, edge introspection, traversal,
//! and maintenance.

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    Json,
};
use geflecht_graph::{props, Vertex};
use serde_json::{json, Value as JsonValue};

use crate::{
    api::handlers::resources::persist_options,
    api::headers::{parse_query, query_param},
    api::response::OperationResult,
    state::AppState,
    Error, Result,
};

/// GET /stats.
pub async fn stats(State(state): State<AppState>) -> Result<OperationResult> {
    let vertex_count = state.store.count_vertices().await?;
    Ok(OperationResult::ok(json!({"vertexCount": vertex_count})))
}

/// POST /wipe: drop the whole graph. Destructive; meant for test rigs and
/// local resets.
pub async fn wipe(State(state): State<AppState>) -> Result<OperationResult> {
    let dropped = state.store.drop_all().await?;
    tracing::warn!(dropped, "graph wiped");
    Ok(OperationResult::ok(json!({"dropped": dropped})))
}

/// POST /resources: validate-and-persist any resource. Query switches:
/// `materializeReferences`, `allowPlaceholders`.
pub async fn persist_resource(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    Json(body): Json<JsonValue>,
) -> Result<OperationResult> {
    let pairs = parse_query(query.as_deref());
    let options = persist_options(&state, &pairs);
    let outcome = state.crud.validate_and_persist(body, options).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(OperationResult::with_status(
        status,
        json!({
            "graphId": outcome.resource.graph_id,
            "resourceType": outcome.resource.resource_type,
            "fhirId": outcome.resource.id,
            "versionId": outcome.resource.version_id,
            "created": outcome.created,
            "materializedReferences": outcome.materialized_references,
        }),
    ))
}

/// GET /{type}/{id}: the stored JSON of the current version.
pub async fn get_resource(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<OperationResult> {
    let resource = state.crud.read(&resource_type, &fhir_id).await?;
    Ok(OperationResult::ok(resource.resource))
}

/// DELETE /{type}/{id}: hard delete of the resource and all its versions.
pub async fn delete_resource(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<OperationResult> {
    let dropped = state.crud.hard_delete(&resource_type, &fhir_id).await?;
    Ok(OperationResult::ok(json!({"dropped": dropped})))
}

/// GET /{type}/{id}/references: outgoing materialized reference edges.
pub async fn references(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<OperationResult> {
    let vertex = resolve_vertex(&state, &resource_type, &fhir_id).await?;
    let edges = state.references.references_of(vertex.id).await?;
    Ok(OperationResult::ok(serde_json::to_value(edges).map_err(
        |e| Error::Internal(format!("cannot serialize references: {e}")),
    )?))
}

/// GET /{type}/{id}/referrers: current resources referencing this one.
pub async fn referrers(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
) -> Result<OperationResult> {
    let vertex = resolve_vertex(&state, &resource_type, &fhir_id).await?;
    let referrers = state.references.referrers_of(vertex.id).await?;
    Ok(OperationResult::ok(JsonValue::Array(referrers)))
}

/// GET /{type}/{id}/neighbors?direction=out|in&edgeLabel=&limit=.
pub async fn neighbors(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<OperationResult> {
    let vertex = resolve_vertex(&state, &resource_type, &fhir_id).await?;
    let pairs = parse_query(query.as_deref());
    let edge_label = query_param(&pairs, "edgeLabel");
    let limit = query_param(&pairs, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.fhir.search_page_size);

    let vertices = match query_param(&pairs, "direction").unwrap_or("out") {
        "in" => state.store.get_in_neighbors(vertex.id, edge_label, limit).await?,
        "out" => state.store.get_out_neighbors(vertex.id, edge_label, limit).await?,
        other => {
            return Err(Error::Validation(format!(
                "direction must be 'in' or 'out', got '{other}'"
            )))
        }
    };
    Ok(OperationResult::ok(vertices_json(&vertices)))
}

/// GET /{type}/{id}/traverse?maxHops=&limit=: bounded BFS from the
/// resource's vertex.
pub async fn traverse(
    State(state): State<AppState>,
    Path((resource_type, fhir_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<OperationResult> {
    let vertex = resolve_vertex(&state, &resource_type, &fhir_id).await?;
    let pairs = parse_query(query.as_deref());
    let max_hops = query_param(&pairs, "maxHops")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    let limit = query_param(&pairs, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.fhir.everything_limit);
    let edge_label = query_param(&pairs, "edgeLabel");

    let vertices = state
        .store
        .traverse(vertex.id, max_hops, edge_label, limit)
        .await?;
    Ok(OperationResult::ok(vertices_json(&vertices)))
}

/// The vertex backing a `(type, id)`: the current version, or the
/// placeholder when nothing real was written yet.
async fn resolve_vertex(state: &AppState, resource_type: &str, fhir_id: &str) -> Result<Vertex> {
    if let Some(current) = state
        .store
        .get_current_version(resource_type, fhir_id)
        .await?
    {
        return Ok(current);
    }
    state
        .store
        .get_vertex_by_label_and_property(resource_type, props::ID, fhir_id)
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: fhir_id.to_string(),
        })
}

fn vertices_json(vertices: &[Vertex]) -> JsonValue {
    JsonValue::Array(
        vertices
            .iter()
            .map(|v| {
                json!({
                    "graphId": v.id,
                    "label": v.label,
                    "fhirId": v.property_str(props::ID),
                    "isPlaceholder": v.property_bool(props::IS_PLACEHOLDER),
                    "isCurrent": v.property_bool(props::IS_CURRENT),
                })
            })
            .collect(),
    )
}

//! System-level endpoints: bundle processing, system history and search.

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    Json,
};
use serde_json::Value as JsonValue;

use crate::{
    api::handlers::resources::{count_param, history_bundle, search_params, searchset_bundle},
    api::headers::{parse_query, query_param},
    api::response::FhirResponse,
    state::AppState,
    Result,
};

/// POST /: batch or transaction bundle.
pub async fn process_bundle(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> Result<FhirResponse> {
    let response = state.bundles.process(body).await?;
    Ok(FhirResponse::new(StatusCode::OK).with_body(response))
}

/// GET /_history: merged history across every supported type.
pub async fn system_history(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let count = count_param(&state, &pairs);
    let since = query_param(&pairs, "_since");
    let history = state.versions.system_history(count, since).await?;
    let self_link = format!("{}/_history", state.config.fhir_base_url());
    Ok(FhirResponse::new(StatusCode::OK).with_body(history_bundle(&state, history, &self_link)))
}

/// GET|POST /_search: cross-type search. `_type` restricts the type set.
pub async fn system_search(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<FhirResponse> {
    let pairs = parse_query(query.as_deref());
    let types = query_param(&pairs, "_type").map(|raw| {
        raw.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
    });
    let params = search_params(&state, &pairs);
    let outcome = state.crud.search_all_types(types, &params).await?;
    let self_link = format!(
        "{}/_search{}",
        state.config.fhir_base_url(),
        query.map(|q| format!("?{q}")).unwrap_or_default()
    );
    Ok(FhirResponse::new(StatusCode::OK).with_body(searchset_bundle(&state, outcome, &self_link)))
}

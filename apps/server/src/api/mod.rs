//! HTTP surface: routes, headers, and response shapes.

pub mod handlers;
pub mod headers;
pub mod response;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use handlers::{graph, metadata, resources, system};

/// Build the full application router from configuration.
pub fn create_router(state: AppState) -> Router {
    let api_base = state.config.server.api_base.clone();
    let graph_base = state.config.server.graph_base.clone();

    Router::new()
        .route("/health", get(health))
        .nest(&api_base, fhir_routes())
        .nest(&graph_base, graph_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn fhir_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(system::process_bundle))
        .route("/metadata", get(metadata::capability_statement))
        .route("/_history", get(system::system_history))
        .route(
            "/_search",
            get(system::system_search).post(system::system_search),
        )
        .route(
            "/:resource_type",
            get(resources::search_type)
                .post(resources::create)
                .put(resources::conditional_update)
                .patch(resources::conditional_patch)
                .delete(resources::conditional_delete),
        )
        .route(
            "/:resource_type/_search",
            get(resources::search_type).post(resources::search_type),
        )
        .route("/:resource_type/_history", get(resources::type_history))
        .route("/:resource_type/$validate", post(resources::validate))
        .route(
            "/:resource_type/:id",
            get(resources::read)
                .put(resources::update)
                .patch(resources::patch)
                .delete(resources::delete),
        )
        .route(
            "/:resource_type/:id/_history",
            get(resources::instance_history).delete(resources::delete_history),
        )
        .route(
            "/:resource_type/:id/_history/:version_id",
            get(resources::vread).delete(resources::delete_history_version),
        )
        .route("/:resource_type/:id/$everything", get(resources::everything))
}

fn graph_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(graph::stats))
        .route("/wipe", post(graph::wipe))
        .route("/resources", post(graph::persist_resource))
        .route(
            "/:resource_type/:id",
            get(graph::get_resource).delete(graph::delete_resource),
        )
        .route("/:resource_type/:id/references", get(graph::references))
        .route("/:resource_type/:id/referrers", get(graph::referrers))
        .route("/:resource_type/:id/neighbors", get(graph::neighbors))
        .route("/:resource_type/:id/traverse", get(graph::traverse))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

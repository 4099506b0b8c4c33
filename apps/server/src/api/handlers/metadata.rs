//! CapabilityStatement assembly (GET /metadata).

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};

use crate::state::AppState;

const INSTANCE_INTERACTIONS: &[&str] = &[
    "read",
    "vread",
    "update",
    "patch",
    "delete",
    "history-instance",
    "history-type",
    "create",
    "search-type",
];

const SYSTEM_INTERACTIONS: &[&str] = &["transaction", "batch", "search-system", "history-system"];

/// Statically assembled at call time from the supported type list.
pub async fn capability_statement(State(state): State<AppState>) -> Json<JsonValue> {
    let resources: Vec<JsonValue> = state
        .validator
        .list_supported_types()
        .into_iter()
        .map(|resource_type| {
            json!({
                "type": resource_type,
                "interaction": INSTANCE_INTERACTIONS
                    .iter()
                    .map(|code| json!({"code": code}))
                    .collect::<Vec<_>>(),
                "versioning": "versioned",
                "readHistory": true,
                "conditionalCreate": true,
                "conditionalUpdate": true,
                "conditionalPatch": true,
                "conditionalDelete": "single",
                "searchParam": [
                    {"name": "_id", "type": "token"},
                    {"name": "identifier", "type": "token"}
                ],
                "operation": [
                    {"name": "validate", "definition": "http://hl7.org/fhir/OperationDefinition/Resource-validate"}
                ]
            })
        })
        .collect();

    Json(json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "date": Utc::now().to_rfc3339(),
        "kind": "instance",
        "software": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "implementation": {
            "description": "FHIR resource server over a property graph",
            "url": state.config.fhir_base_url()
        },
        "fhirVersion": state.config.fhir.version,
        "format": ["application/fhir+json", "application/json"],
        "patchFormat": ["application/json-patch+json"],
        "rest": [{
            "mode": "server",
            "resource": resources,
            "interaction": SYSTEM_INTERACTIONS
                .iter()
                .map(|code| json!({"code": code}))
                .collect::<Vec<_>>()
        }]
    }))
}

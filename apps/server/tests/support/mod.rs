//! In-process test application: embedded graph engine plus a small FHIR
//! schema written to a temp file.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use geflecht::{api::create_router, config::Config, state::AppState};
use geflecht_graph::MemoryGraphStore;

pub const FHIR_BASE: &str = "/api/fhir/r6";
pub const GRAPH_BASE: &str = "/api/graph";

pub struct TestApp {
    router: axum::Router,
    _schema_file: tempfile::NamedTempFile,
}

/// A permissive schema whose `discriminator.mapping` declares the resource
/// types the tests use.
fn test_schema() -> Value {
    let types = [
        "Binary",
        "Bundle",
        "Encounter",
        "Observation",
        "OperationOutcome",
        "Organization",
        "Patient",
        "Practitioner",
    ];
    let mapping: serde_json::Map<String, Value> = types
        .iter()
        .map(|t| (t.to_string(), json!(format!("#/definitions/{t}"))))
        .collect();
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "discriminator": {
            "propertyName": "resourceType",
            "mapping": mapping
        },
        "type": "object",
        "required": ["resourceType"],
        "properties": {
            "resourceType": {"type": "string"}
        }
    })
}

pub fn test_app() -> TestApp {
    let mut schema_file = tempfile::NamedTempFile::new().expect("create schema temp file");
    schema_file
        .write_all(serde_json::to_string(&test_schema()).unwrap().as_bytes())
        .expect("write schema");

    let mut config = Config::default();
    config.fhir.schema_path = schema_file.path().to_string_lossy().into_owned();

    let state = AppState::with_store(config, Arc::new(MemoryGraphStore::new()));
    TestApp {
        router: create_router(state),
        _schema_file: schema_file,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        self.request_with_headers(method, path, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if body.is_some() && !has_content_type {
            builder = builder.header(CONTENT_TYPE, "application/fhir+json");
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(match &body {
                Some(value) => Body::from(serde_json::to_vec(value).unwrap()),
                None => Body::empty(),
            })
            .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }
}

pub fn fhir(path: &str) -> String {
    format!("{FHIR_BASE}{path}")
}

pub fn graph(path: &str) -> String {
    format!("{GRAPH_BASE}{path}")
}

pub fn minimal_patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "gender": "male"
    })
}

pub fn patient_with_identifier(id: &str, system: &str, value: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "identifier": [{"system": system, "value": value}]
    })
}

pub fn observation_for(id: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "subject": {"reference": format!("Patient/{patient_id}")}
    })
}

pub fn entries(bundle: &Value) -> Vec<Value> {
    bundle
        .get("entry")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

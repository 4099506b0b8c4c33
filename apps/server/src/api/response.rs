//! HTTP-shaped results assembled by the handlers.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value as JsonValue;

use crate::api::headers::{http_date, weak_etag};
use crate::models::Resource;

pub const FHIR_JSON: &str = "application/fhir+json";

/// Result shape of the FHIR endpoints: status, optional body, and the
/// `Location` / `ETag` / `Last-Modified` headers.
#[derive(Debug, Default)]
pub struct FhirResponse {
    pub status: StatusCode,
    pub body: Option<JsonValue>,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FhirResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a resource: body plus version headers.
    pub fn with_resource(mut self, resource: &Resource) -> Self {
        self.body = Some(resource.resource.clone());
        self.with_version_headers(resource)
    }

    /// Attach `ETag` and `Last-Modified` only.
    pub fn with_version_headers(mut self, resource: &Resource) -> Self {
        self.etag = Some(weak_etag(&resource.version_id));
        self.last_modified = http_date(&resource.last_updated);
        self
    }

    pub fn with_location(mut self, location: String) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_etag_token(mut self, token: &str) -> Self {
        self.etag = Some(weak_etag(token));
        self
    }
}

impl IntoResponse for FhirResponse {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };

        if response.headers().contains_key(header::CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        }
        if let Some(location) = self.location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        if let Some(etag) = self.etag.and_then(|e| HeaderValue::from_str(&e).ok()) {
            response.headers_mut().insert(header::ETAG, etag);
        }
        if let Some(last_modified) = self
            .last_modified
            .and_then(|d| HeaderValue::from_str(&d).ok())
        {
            response
                .headers_mut()
                .insert(header::LAST_MODIFIED, last_modified);
        }
        response
    }
}

/// Result shape of the graph-native endpoints: plain JSON, no FHIR headers.
#[derive(Debug)]
pub struct OperationResult {
    pub success: bool,
    pub status: StatusCode,
    pub body: Option<JsonValue>,
}

impl OperationResult {
    pub fn ok(body: JsonValue) -> Self {
        Self {
            success: true,
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    pub fn with_status(status: StatusCode, body: JsonValue) -> Self {
        Self {
            success: status.is_success(),
            status,
            body: Some(body),
        }
    }
}

impl IntoResponse for OperationResult {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

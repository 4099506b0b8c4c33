//! JSON Patch (RFC 6902) application.
//!
//! Unknown operations are dropped before the patch is parsed; every parse or
//! apply failure, including a failed `test`, surfaces as 422 upstream.

use serde_json::Value as JsonValue;

use crate::{Error, Result};

const KNOWN_OPS: &[&str] = &["add", "remove", "replace", "test", "copy", "move"];

/// Parse a JSON Patch document, skipping operations with an unknown `op`.
pub fn parse_patch(document: &JsonValue) -> Result<json_patch::Patch> {
    let operations = document.as_array().ok_or_else(|| {
        Error::UnprocessableEntity("JSON Patch document must be an array".to_string())
    })?;

    let known: Vec<JsonValue> = operations
        .iter()
        .filter(|op| {
            op.get("op")
                .and_then(|v| v.as_str())
                .map(|name| KNOWN_OPS.contains(&name))
                .unwrap_or(true) // let the parser report a missing/invalid op
        })
        .cloned()
        .collect();

    serde_json::from_value(JsonValue::Array(known))
        .map_err(|e| Error::UnprocessableEntity(format!("Invalid JSON Patch document: {e}")))
}

/// Apply a patch to a copy of `resource`.
pub fn apply_patch(resource: &JsonValue, patch: &json_patch::Patch) -> Result<JsonValue> {
    let mut patched = resource.clone();
    json_patch::patch(&mut patched, &patch.0)
        .map_err(|e| Error::UnprocessableEntity(e.to_string()))?;
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_add_remove_apply() {
        let doc = json!({"gender": "male", "name": [{"family": "A"}]});
        let patch = parse_patch(&json!([
            {"op": "replace", "path": "/gender", "value": "female"},
            {"op": "add", "path": "/active", "value": true},
            {"op": "remove", "path": "/name/0/family"}
        ]))
        .unwrap();
        let patched = apply_patch(&doc, &patch).unwrap();
        assert_eq!(patched["gender"], "female");
        assert_eq!(patched["active"], true);
        assert!(patched["name"][0].get("family").is_none());
    }

    #[test]
    fn dash_appends_to_arrays() {
        let doc = json!({"name": ["a"]});
        let patch = parse_patch(&json!([
            {"op": "add", "path": "/name/-", "value": "b"}
        ]))
        .unwrap();
        let patched = apply_patch(&doc, &patch).unwrap();
        assert_eq!(patched["name"], json!(["a", "b"]));
    }

    #[test]
    fn failed_test_fails_the_whole_patch() {
        let doc = json!({"gender": "female"});
        let patch = parse_patch(&json!([
            {"op": "test", "path": "/gender", "value": "unknown"},
            {"op": "replace", "path": "/gender", "value": "other"}
        ]))
        .unwrap();
        let err = apply_patch(&doc, &patch).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn unknown_operations_are_skipped() {
        let doc = json!({"gender": "male"});
        let patch = parse_patch(&json!([
            {"op": "sparkle", "path": "/gender"},
            {"op": "replace", "path": "/gender", "value": "female"}
        ]))
        .unwrap();
        assert_eq!(patch.0.len(), 1);
        let patched = apply_patch(&doc, &patch).unwrap();
        assert_eq!(patched["gender"], "female");
    }

    #[test]
    fn add_remove_round_trip_restores_the_document() {
        let doc = json!({"a": 1});
        let forward = parse_patch(&json!([{"op": "add", "path": "/b", "value": 2}])).unwrap();
        let inverse = parse_patch(&json!([{"op": "remove", "path": "/b"}])).unwrap();
        let there = apply_patch(&doc, &forward).unwrap();
        let back = apply_patch(&there, &inverse).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn bad_pointer_is_unprocessable() {
        let doc = json!({"a": 1});
        let patch = parse_patch(&json!([{"op": "replace", "path": "/missing", "value": 1}])).unwrap();
        assert!(apply_patch(&doc, &patch).is_err());
    }
}

//! Materialized graph values returned across the repository boundary.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Backend-assigned vertex identifier.
pub type VertexId = u64;

/// Property map of a materialized vertex or edge.
pub type PropertyMap = serde_json::Map<String, JsonValue>;

/// A vertex materialized as a plain property map, detached from the backend.
#[derive(Debug, Clone, Serialize)]
pub struct Vertex {
    pub id: VertexId,
    pub label: String,
    pub properties: PropertyMap,
}

impl Vertex {
    /// String view of a property, coercing scalars the way lookups do.
    pub fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(coerce_to_string)
    }

    pub fn property_bool(&self, key: &str) -> bool {
        matches!(self.properties.get(key), Some(JsonValue::Bool(true)))
    }
}

/// Direction of an edge relative to the vertex it was fetched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// An edge incident to a vertex. Carries the *other* endpoint only; backend
/// edge ids never appear here.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRecord {
    pub direction: Direction,
    pub label: String,
    pub target: VertexId,
    pub properties: PropertyMap,
}

/// Coerce a scalar property to its string form. Lists and objects have no
/// scalar string form.
pub fn coerce_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Lookup keys are compared as strings. Multi-valued properties match if any
/// element matches.
pub fn property_matches(value: &JsonValue, wanted: &str) -> bool {
    match value {
        JsonValue::Array(items) => items.iter().any(|v| property_matches(v, wanted)),
        other => coerce_to_string(other).as_deref() == Some(wanted),
    }
}

/// Unwrap singleton lists to scalars; preserve genuine multi-valued lists.
/// Some backends hand every property back as a list of cardinality one.
pub fn unwrap_singleton(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_matching_is_string_coerced() {
        assert!(property_matches(&json!("abc"), "abc"));
        assert!(property_matches(&json!(42), "42"));
        assert!(property_matches(&json!(true), "true"));
        assert!(!property_matches(&json!("abc"), "abd"));
        assert!(!property_matches(&json!({"a": 1}), "a"));
    }

    #[test]
    fn multi_valued_properties_match_any_element() {
        assert!(property_matches(&json!(["x", "y"]), "y"));
        assert!(!property_matches(&json!(["x", "y"]), "z"));
    }

    #[test]
    fn singleton_lists_unwrap_to_scalars() {
        assert_eq!(unwrap_singleton(json!(["only"])), json!("only"));
        assert_eq!(unwrap_singleton(json!(["a", "b"])), json!(["a", "b"]));
        assert_eq!(unwrap_singleton(json!("plain")), json!("plain"));
    }
}

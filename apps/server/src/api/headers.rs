//! Header parsing and formatting for the FHIR surface.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};

/// Extract the opaque token from a (weak) ETag value: `W/"3"` → `3`.
pub fn parse_etag(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    let token = trimmed.trim_matches('"').trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn weak_etag(token: &str) -> String {
    format!("W/\"{token}\"")
}

/// RFC 1123 `Last-Modified` value from a stored RFC 3339 instant.
pub fn http_date(rfc3339: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Query string → decoded `name=value` pairs.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(raw) => url::form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .filter(|(name, _)| !name.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// First value of a query parameter.
pub fn query_param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

pub fn query_flag(pairs: &[(String, String)], name: &str, default: bool) -> bool {
    match query_param(pairs, name) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_tokens_round_trip() {
        assert_eq!(parse_etag("W/\"3\"").as_deref(), Some("3"));
        assert_eq!(parse_etag("\"3\"").as_deref(), Some("3"));
        assert_eq!(parse_etag("3").as_deref(), Some("3"));
        assert_eq!(parse_etag("W/\"\""), None);
        assert_eq!(weak_etag("3"), "W/\"3\"");
    }

    #[test]
    fn http_dates_are_rfc1123() {
        let formatted = http_date("2026-03-01T12:30:45.123456+00:00").unwrap();
        assert!(formatted.ends_with("GMT"));
        assert!(formatted.contains("Mar 2026"));
    }

    #[test]
    fn query_parsing_decodes_pairs() {
        let pairs = parse_query(Some("identifier=urn%3Amrn%7Cabc&materializeReferences=true"));
        assert_eq!(query_param(&pairs, "identifier"), Some("urn:mrn|abc"));
        assert!(query_flag(&pairs, "materializeReferences", false));
        assert!(!query_flag(&pairs, "allowPlaceholders", false));
        assert!(query_flag(&pairs, "allowPlaceholders", true));
    }
}

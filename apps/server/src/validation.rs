//! FHIR JSON Schema validation.
//!
//! The schema document (`fhir.schema.json`) is loaded from disk once and
//! owned process-wide. Its top-level `discriminator.mapping` keys enumerate
//! the supported resource types. Validator-engine errors about circular or
//! unresolvable `$ref`s are coerced to success: the FHIR schema is
//! self-referential and a strict engine may refuse parts of it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

use crate::{Error, Result};

enum CompileState {
    Compiled(JSONSchema),
    /// The engine rejected the schema for a coercible reason; every document
    /// passes engine validation.
    Lenient,
    /// The engine rejected the schema outright; every validation fails with
    /// this message.
    Broken(String),
}

struct LoadedSchema {
    compiled: CompileState,
    types: Vec<String>,
}

pub struct SchemaValidator {
    schema_path: PathBuf,
    state: OnceLock<Option<LoadedSchema>>,
}

impl SchemaValidator {
    pub fn new(schema_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: schema_path.into(),
            state: OnceLock::new(),
        }
    }

    fn loaded(&self) -> Option<&LoadedSchema> {
        self.state
            .get_or_init(|| match load_schema(&self.schema_path) {
                Ok(loaded) => Some(loaded),
                Err(message) => {
                    tracing::warn!(
                        path = %self.schema_path.display(),
                        error = %message,
                        "FHIR schema not loaded; create/update/patch will be rejected"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Validate a document against the FHIR schema.
    pub fn validate(&self, document: &JsonValue) -> Result<()> {
        let Some(loaded) = self.loaded() else {
            return Err(Error::Validation("FHIR schema not loaded".to_string()));
        };

        match &loaded.compiled {
            CompileState::Lenient => Ok(()),
            CompileState::Broken(message) => Err(Error::Validation(message.clone())),
            CompileState::Compiled(schema) => {
                let messages: Vec<String> = match schema.validate(document) {
                    Ok(()) => return Ok(()),
                    Err(errors) => errors
                        .map(|e| e.to_string())
                        .filter(|m| !is_resolution_error(m))
                        .take(5)
                        .collect(),
                };
                if messages.is_empty() {
                    // Only circular/unresolvable-$ref noise: non-fatal.
                    Ok(())
                } else {
                    Err(Error::Validation(messages.join("; ")))
                }
            }
        }
    }

    /// Pull `(resourceType, id?)` out of a document. `resourceType` must be
    /// a non-empty string and `id`, when present, must be a string.
    pub fn extract_resource_info(&self, document: &JsonValue) -> Result<(String, Option<String>)> {
        let resource_type = document
            .get("resourceType")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Validation("resourceType must be a non-empty string".to_string())
            })?;

        let fhir_id = match document.get("id") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(id)) => Some(id.clone()),
            Some(_) => return Err(Error::Validation("Invalid id: must be string".to_string())),
        };

        Ok((resource_type.to_string(), fhir_id))
    }

    /// Resource types declared by the schema's `discriminator.mapping`,
    /// ascending. Empty when the schema is not loaded.
    pub fn list_supported_types(&self) -> Vec<String> {
        self.loaded().map(|l| l.types.clone()).unwrap_or_default()
    }

    /// Reject unknown resource-type names when the schema declares the
    /// supported set. Read paths still work without a loaded schema.
    pub fn check_resource_type(&self, resource_type: &str) -> Result<()> {
        if let Some(loaded) = self.loaded() {
            if !loaded.types.is_empty() && !loaded.types.iter().any(|t| t == resource_type) {
                return Err(Error::Validation(format!(
                    "Invalid resource type: {resource_type}"
                )));
            }
        }
        Ok(())
    }
}

fn load_schema(path: &Path) -> std::result::Result<LoadedSchema, String> {
    let resolved = resolve_schema_path(path);
    let raw = std::fs::read_to_string(&resolved)
        .map_err(|e| format!("cannot read {}: {e}", resolved.display()))?;
    let document: JsonValue =
        serde_json::from_str(&raw).map_err(|e| format!("schema is not valid JSON: {e}"))?;

    let mut types: Vec<String> = document
        .get("discriminator")
        .and_then(|d| d.get("mapping"))
        .and_then(|m| m.as_object())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    types.sort();

    let compiled = match JSONSchema::compile(&document) {
        Ok(schema) => CompileState::Compiled(schema),
        Err(error) => {
            let message = error.to_string();
            if is_resolution_error(&message) {
                tracing::warn!(error = %message, "schema engine rejected self-referential schema; validating leniently");
                CompileState::Lenient
            } else {
                CompileState::Broken(format!("schema failed to compile: {message}"))
            }
        }
    };

    tracing::info!(
        path = %resolved.display(),
        resource_types = types.len(),
        "FHIR schema loaded"
    );

    Ok(LoadedSchema { compiled, types })
}

/// Relative paths are tried against the working directory first, then the
/// compile-time crate directory.
fn resolve_schema_path(path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
}

fn is_resolution_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("circular") || lower.contains("cannot resolve") || lower.contains("unresolvable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn validator_for(schema: &JsonValue) -> (tempfile::NamedTempFile, SchemaValidator) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(schema).unwrap().as_bytes())
            .unwrap();
        let validator = SchemaValidator::new(file.path().to_path_buf());
        (file, validator)
    }

    fn sample_schema() -> JsonValue {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "discriminator": {
                "propertyName": "resourceType",
                "mapping": {
                    "Patient": "#/definitions/Patient",
                    "Observation": "#/definitions/Observation",
                    "Bundle": "#/definitions/Bundle"
                }
            },
            "type": "object",
            "required": ["resourceType"],
            "properties": {
                "resourceType": {"type": "string"}
            }
        })
    }

    #[test]
    fn supported_types_come_from_discriminator_mapping_sorted() {
        let (_file, validator) = validator_for(&sample_schema());
        assert_eq!(
            validator.list_supported_types(),
            vec!["Bundle", "Observation", "Patient"]
        );
        assert!(validator.check_resource_type("Patient").is_ok());
        assert!(validator.check_resource_type("Starship").is_err());
    }

    #[test]
    fn validate_enforces_the_schema() {
        let (_file, validator) = validator_for(&sample_schema());
        assert!(validator
            .validate(&json!({"resourceType": "Patient", "id": "p1"}))
            .is_ok());
        assert!(validator.validate(&json!({"id": "p1"})).is_err());
    }

    #[test]
    fn missing_schema_fails_every_validation() {
        let validator = SchemaValidator::new("/nonexistent/fhir.schema.json");
        let err = validator
            .validate(&json!({"resourceType": "Patient"}))
            .unwrap_err();
        assert!(err.to_string().contains("schema not loaded"));
        assert!(validator.list_supported_types().is_empty());
        // Reads do not require a schema, so unknown types pass the name check.
        assert!(validator.check_resource_type("Patient").is_ok());
    }

    #[test]
    fn extract_resource_info_checks_shapes() {
        let (_file, validator) = validator_for(&sample_schema());
        let (resource_type, id) = validator
            .extract_resource_info(&json!({"resourceType": "Patient", "id": "p1"}))
            .unwrap();
        assert_eq!(resource_type, "Patient");
        assert_eq!(id.as_deref(), Some("p1"));

        assert!(validator
            .extract_resource_info(&json!({"resourceType": ""}))
            .is_err());
        let err = validator
            .extract_resource_info(&json!({"resourceType": "Patient", "id": 7}))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid id: must be string"));
    }
}

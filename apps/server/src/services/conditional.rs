//! Conditional operations: search-by-criteria, then act by match count.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::{
    models::{PersistOptions, PersistOutcome, Resource, UpdateParams},
    services::{
        crud::{CrudService, SearchParams},
        versioning::VersionService,
    },
    Error, Result,
};

/// Match probes never need more than two results: zero, one, and "more than
/// one" are the only interesting counts.
const PROBE_LIMIT: usize = 2;

pub enum ConditionalCreateOutcome {
    /// No match: created normally.
    Created(PersistOutcome),
    /// Exactly one match: nothing written, the existing resource returned.
    Existing(Resource),
}

pub struct ConditionalService {
    crud: Arc<CrudService>,
    versions: Arc<VersionService>,
}

impl ConditionalService {
    pub fn new(crud: Arc<CrudService>, versions: Arc<VersionService>) -> Self {
        Self { crud, versions }
    }

    /// Create with `If-None-Exist`.
    pub async fn create(
        &self,
        resource_type: &str,
        resource: JsonValue,
        criteria: &str,
        options: PersistOptions,
    ) -> Result<ConditionalCreateOutcome> {
        let filters = parse_criteria(criteria)?;
        let matches = self.probe(resource_type, filters).await?;

        match matches.as_slice() {
            [] => Ok(ConditionalCreateOutcome::Created(
                self.crud.create(resource_type, resource, options).await?,
            )),
            [only] => Ok(ConditionalCreateOutcome::Existing(
                self.crud.read(resource_type, &only.id).await?,
            )),
            _ => Err(Error::Duplicate(format!(
                "If-None-Exist criteria '{criteria}' matched multiple resources"
            ))),
        }
    }

    /// Conditional update (PUT /{type}?criteria).
    pub async fn update(
        &self,
        resource_type: &str,
        criteria: &str,
        resource: JsonValue,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        let filters = parse_criteria(criteria)?;
        let matches = self.probe(resource_type, filters).await?;
        let body_id = resource.get("id").and_then(|v| v.as_str()).map(str::to_string);

        match matches.as_slice() {
            [] => match body_id {
                Some(id) => {
                    self.crud
                        .update(resource_type, &id, resource, UpdateParams::default(), options)
                        .await
                }
                None => Err(Error::Validation(
                    "Conditional update matched nothing and the resource has no id".to_string(),
                )),
            },
            [only] => {
                if let Some(body_id) = &body_id {
                    if body_id != &only.id {
                        return Err(Error::InvalidResource(format!(
                            "Resource id '{body_id}' does not match the resource selected by the criteria ('{}')",
                            only.id
                        )));
                    }
                }
                self.crud
                    .update(resource_type, &only.id, resource, UpdateParams::default(), options)
                    .await
            }
            _ => Err(Error::MultipleMatches(format!(
                "Conditional update criteria '{criteria}' matched multiple resources"
            ))),
        }
    }

    /// Conditional delete (DELETE /{type}?criteria). Returns the number of
    /// resources tombstoned; zero matches in single mode is 404.
    pub async fn delete(
        &self,
        resource_type: &str,
        criteria: &str,
        allow_multiple: bool,
    ) -> Result<u64> {
        let filters = parse_criteria(criteria)?;

        if allow_multiple {
            let matches = self
                .search_matches(resource_type, filters, usize::MAX)
                .await?;
            let mut deleted = 0;
            for resource in matches {
                self.versions.tombstone(resource_type, &resource.id).await?;
                deleted += 1;
            }
            return Ok(deleted);
        }

        let matches = self.probe(resource_type, filters).await?;
        match matches.as_slice() {
            [] => Err(Error::NotFound(format!(
                "No resources match conditional delete criteria '{criteria}'"
            ))),
            [only] => {
                self.versions.tombstone(resource_type, &only.id).await?;
                Ok(1)
            }
            _ => Err(Error::MultipleMatches(format!(
                "Conditional delete criteria '{criteria}' matched multiple resources"
            ))),
        }
    }

    /// Conditional patch (PATCH /{type}?criteria).
    pub async fn patch(
        &self,
        resource_type: &str,
        criteria: &str,
        patch_document: &JsonValue,
        options: PersistOptions,
    ) -> Result<PersistOutcome> {
        let filters = parse_criteria(criteria)?;
        let matches = self.probe(resource_type, filters).await?;

        match matches.as_slice() {
            [] => Err(Error::NotFound(format!(
                "No resources match conditional patch criteria '{criteria}'"
            ))),
            [only] => {
                self.crud
                    .patch(
                        resource_type,
                        &only.id,
                        patch_document,
                        UpdateParams::default(),
                        options,
                    )
                    .await
            }
            _ => Err(Error::MultipleMatches(format!(
                "Conditional patch criteria '{criteria}' matched multiple resources"
            ))),
        }
    }

    async fn probe(
        &self,
        resource_type: &str,
        filters: Vec<(String, String)>,
    ) -> Result<Vec<MatchedResource>> {
        self.search_matches(resource_type, filters, PROBE_LIMIT).await
    }

    async fn search_matches(
        &self,
        resource_type: &str,
        filters: Vec<(String, String)>,
        limit: usize,
    ) -> Result<Vec<MatchedResource>> {
        let outcome = self
            .crud
            .search(
                resource_type,
                &SearchParams {
                    filters,
                    limit,
                    offset: 0,
                },
            )
            .await?;
        Ok(outcome
            .results
            .into_iter()
            .filter_map(|result| result.fhir_id.map(|id| MatchedResource { id }))
            .collect())
    }
}

struct MatchedResource {
    id: String,
}

/// Parse a search-parameter query string into filters. Empty criteria are a
/// client error: an unconstrained conditional operation is never intended.
pub fn parse_criteria(criteria: &str) -> Result<Vec<(String, String)>> {
    let trimmed = criteria.trim().trim_start_matches('?');
    let filters: Vec<(String, String)> = url::form_urlencoded::parse(trimmed.as_bytes())
        .into_owned()
        .filter(|(name, _)| !name.is_empty())
        .collect();
    if filters.is_empty() {
        return Err(Error::Validation(
            "Conditional operation requires search criteria".to_string(),
        ));
    }
    Ok(filters)
}

//! Shared application state.

use std::sync::Arc;

use geflecht_graph::GraphStore;

use crate::{
    config::Config,
    models::PersistOptions,
    services::{
        BundleService, ConditionalService, CrudService, EverythingService, ReferenceService,
        ResourceLocks, VersionService,
    },
    validation::SchemaValidator,
    Result,
};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn GraphStore>,
    pub validator: Arc<SchemaValidator>,
    pub crud: Arc<CrudService>,
    pub versions: Arc<VersionService>,
    pub conditional: Arc<ConditionalService>,
    pub bundles: Arc<BundleService>,
    pub everything: Arc<EverythingService>,
    pub references: Arc<ReferenceService>,
}

impl AppState {
    /// Open the configured graph backend and wire the services.
    pub fn new(config: Config) -> Result<Self> {
        let store = geflecht_graph::connect(&config.graph)?;
        Ok(Self::with_store(config, store))
    }

    /// Wire the services onto an existing store (tests inject the embedded
    /// engine directly).
    pub fn with_store(config: Config, store: Arc<dyn GraphStore>) -> Self {
        tracing::info!(backend = %config.graph.backend, "initializing application state");

        let config = Arc::new(config);
        let validator = Arc::new(SchemaValidator::new(config.fhir.schema_path.clone()));
        let locks = Arc::new(ResourceLocks::new());
        let references = Arc::new(ReferenceService::new(store.clone()));

        let crud = Arc::new(CrudService::new(
            store.clone(),
            validator.clone(),
            references.as_ref().clone(),
            locks.clone(),
        ));
        let versions = Arc::new(VersionService::new(
            store.clone(),
            validator.clone(),
            locks.clone(),
        ));
        let conditional = Arc::new(ConditionalService::new(crud.clone(), versions.clone()));
        let bundles = Arc::new(BundleService::new(
            crud.clone(),
            versions.clone(),
            conditional.clone(),
            persist_defaults(&config),
            config.fhir.conditional_delete_multiple,
        ));
        let everything = Arc::new(EverythingService::new(store.clone()));

        Self {
            config,
            store,
            validator,
            crud,
            versions,
            conditional,
            bundles,
            everything,
            references,
        }
    }

    pub fn persist_defaults(&self) -> PersistOptions {
        persist_defaults(&self.config)
    }
}

fn persist_defaults(config: &Config) -> PersistOptions {
    PersistOptions {
        materialize_references: config.fhir.materialize_references,
        allow_placeholders: config.fhir.allow_placeholders,
    }
}

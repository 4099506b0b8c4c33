//! Geflecht: a FHIR R6 resource server whose persistence layer is a
//! property graph.
//!
//! Resources are stored as vertices keyed by `(resourceType, id)`,
//! `reference` fields are materialized as typed edges, and version history
//! is an append-only chain of archive vertices, so cross-resource
//! navigation and compartment traversal are served from the graph instead
//! of reparsing JSON.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod validation;

pub use error::{Error, Result};

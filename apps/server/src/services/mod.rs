//! Business logic for the resource layer.

pub mod bundle;
pub mod conditional;
pub mod crud;
pub mod everything;
pub mod locks;
pub mod patch;
pub mod references;
pub mod versioning;

pub use bundle::BundleService;
pub use conditional::{ConditionalCreateOutcome, ConditionalService};
pub use crud::{CrudService, SearchParams};
pub use everything::EverythingService;
pub use locks::ResourceLocks;
pub use references::{parse_references, ParsedReference, ReferenceService};
pub use versioning::VersionService;

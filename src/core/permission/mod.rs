//! Feature permission catalog
//!
//! Provides the reference data the evaluator decides against:
//! - Permission rows with tier, role, capability and credit-cost rules
//! - Versioned catalog documents (JSON or TOML)
//! - Immutable active snapshots with generation numbers
//! - Pluggable sources with on-demand refetch and admin edits

mod catalog;
mod feature;
mod source;

pub use catalog::{CatalogDocument, PermissionCatalog, PermissionSet};
pub use feature::FeaturePermission;
pub use source::{FileSource, PermissionSource, StaticSource};

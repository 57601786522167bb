//! Error types for tiergate operations
//!
//! Access decisions never produce errors: a denied evaluation is an
//! [`AccessResult`](crate::AccessResult) carrying a [`DenyReason`]. The variants
//! below cover everything around the evaluator (catalog loading, ledger
//! movements, configuration, admin edits).

use crate::core::evaluator::DenyReason;
use thiserror::Error;

/// Operational errors
#[derive(Error, Debug)]
pub enum GateError {
    /// I/O error while reading a catalog or config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Feature key does not follow the snake_case rules
    #[error("Invalid feature key: {0} (must be snake_case: lowercase letters, digits, single underscores)")]
    InvalidFeatureKey(String),

    /// Permission row failed validation
    #[error("Invalid permission '{key}': {reason}")]
    InvalidPermission { key: String, reason: String },

    /// No stored row carries this feature key
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Two rows in one catalog share a feature key
    #[error("Duplicate feature key in catalog: {0}")]
    DuplicateFeature(String),

    /// Catalog document carries a version this build cannot read
    #[error("Unsupported catalog version: {0} (expected 1.x)")]
    UnsupportedCatalogVersion(String),

    /// Caller is not allowed to perform the operation
    #[error("Access denied: {0}")]
    AccessDenied(DenyReason),

    /// Every rule passed but the row grants neither view nor edit
    #[error("Feature is not viewable: {0}")]
    FeatureNotViewable(String),

    /// Debit would take the balance below zero
    #[error("Insufficient credit: required {required}, available {available}")]
    InsufficientCredit { required: i64, available: i64 },

    /// Ledger has no account for the user or company
    #[error("Unknown ledger account: {0}")]
    UnknownAccount(String),

    /// Credit amounts must be strictly positive
    #[error("Invalid credit amount: {0}")]
    InvalidAmount(i64),

    /// Configuration is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GateError>;

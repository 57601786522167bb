//! Validation for feature keys
//!
//! Feature keys are the stable identifiers UI components pass to the gate
//! (`strategic_radar_report`, `compass_decision_edit`, ...). They must be
//! lowercase snake_case so the same key works in URLs, JSON and TOML.

use crate::error::{GateError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;

static FEATURE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(FeatureKey::PATTERN).expect("feature key pattern is valid"));

/// Validated feature identifier
///
/// # Rules
/// - Lowercase letters (a-z), digits (0-9) and underscores only
/// - Must start with a letter and must not end with an underscore
/// - No consecutive underscores
/// - Length: 1-128 characters
///
/// # Examples
///
/// ```
/// use tiergate::FeatureKey;
///
/// let key = FeatureKey::new("strategic_radar_report").unwrap();
/// assert_eq!(key.as_str(), "strategic_radar_report");
///
/// assert!(FeatureKey::new("Strategic-Radar").is_err());
/// assert!(FeatureKey::new("radar__report").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FeatureKey(String);

impl FeatureKey {
    const PATTERN: &'static str = r"^[a-z]([a-z0-9_]*[a-z0-9])?$";

    const MAX_LENGTH: usize = 128;

    /// Create a new validated key
    ///
    /// # Errors
    ///
    /// Returns `InvalidFeatureKey` if the key doesn't meet the rules above.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(FeatureKey(key))
    }

    fn validate(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(GateError::InvalidFeatureKey(
                "feature key cannot be empty".to_string(),
            ));
        }

        if key.len() > Self::MAX_LENGTH {
            return Err(GateError::InvalidFeatureKey(format!(
                "feature key too long (max {} characters)",
                Self::MAX_LENGTH
            )));
        }

        if !FEATURE_KEY_RE.is_match(key) {
            return Err(GateError::InvalidFeatureKey(key.to_string()));
        }

        if key.contains("__") {
            return Err(GateError::InvalidFeatureKey(format!(
                "feature key '{}' contains consecutive underscores",
                key
            )));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for FeatureKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets maps keyed by FeatureKey be queried with a plain &str.
impl Borrow<str> for FeatureKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FeatureKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        FeatureKey::new(raw).map_err(serde::de::Error::custom)
    }
}

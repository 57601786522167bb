//! Gate configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! cache_capacity = 2048
//! audit_capacity = 4096
//! audit_flush_interval_ms = 500
//! catalog_path = "permissions.toml"
//!
//! [monthly_allotments]
//! free = 10
//! expert = 100
//! pro = 300
//! plus = 1000
//! ```

use crate::core::tier::IndividualTier;
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Monthly personal credits per individual plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyAllotments {
    pub free: i64,
    pub expert: i64,
    pub pro: i64,
    pub plus: i64,
}

impl MonthlyAllotments {
    pub fn for_tier(&self, tier: IndividualTier) -> i64 {
        match tier {
            IndividualTier::IndividualFree => self.free,
            IndividualTier::IndividualExpert => self.expert,
            IndividualTier::IndividualPro => self.pro,
            IndividualTier::IndividualPlus => self.plus,
        }
    }
}

impl Default for MonthlyAllotments {
    fn default() -> Self {
        MonthlyAllotments {
            free: 10,
            expert: 100,
            pro: 300,
            plus: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Cached decisions; 0 disables the cache
    pub cache_capacity: usize,

    /// Audit ring buffer size (rounded up to a power of two)
    pub audit_capacity: usize,

    pub audit_flush_interval_ms: u64,

    /// Catalog document to load permissions from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    pub monthly_allotments: MonthlyAllotments,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            cache_capacity: 1024,
            audit_capacity: 4096,
            audit_flush_interval_ms: 1000,
            catalog_path: None,
            monthly_allotments: MonthlyAllotments::default(),
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file
    ///
    /// A relative `catalog_path` is resolved against the config file's
    /// directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;

        let resolved = match (config.catalog_path.as_ref(), path.parent()) {
            (Some(catalog), Some(dir)) if catalog.is_relative() => Some(dir.join(catalog)),
            _ => None,
        };
        if resolved.is_some() {
            config.catalog_path = resolved;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audit_capacity == 0 {
            return Err(GateError::Config(
                "audit_capacity must be greater than 0".to_string(),
            ));
        }

        if self.audit_flush_interval_ms == 0 {
            return Err(GateError::Config(
                "audit_flush_interval_ms must be greater than 0".to_string(),
            ));
        }

        for tier in IndividualTier::ALL {
            if self.monthly_allotments.for_tier(tier) < 0 {
                return Err(GateError::Config(format!(
                    "monthly allotment for {:?} cannot be negative",
                    tier
                )));
            }
        }

        Ok(())
    }

    pub fn audit_flush_interval(&self) -> Duration {
        Duration::from_millis(self.audit_flush_interval_ms)
    }
}

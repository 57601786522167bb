//! Active permission snapshot and the catalog that refreshes it
//!
//! The evaluator reads from a [`PermissionSet`]: an immutable, validated map of
//! active rows tagged with a generation number. [`PermissionCatalog`] owns the
//! current snapshot, re-reads it from its [`PermissionSource`] on demand and
//! applies admin edits. Every change produces a new snapshot with a higher
//! generation, which is what keeps cached decisions honest.

use super::source::PermissionSource;
use super::FeaturePermission;
use crate::core::validation::FeatureKey;
use crate::error::{GateError, Result};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

/// Serialized catalog: a version header plus every row
///
/// ```toml
/// version = "1.0.0"
///
/// [[features]]
/// feature_key = "radar_report"
/// feature_category = "radar"
/// feature_name = "Competitor report"
/// allowed_tiers = ["individual_pro", "corporate_expert"]
/// credit_cost = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: Version,

    #[serde(default)]
    pub features: Vec<FeaturePermission>,
}

impl CatalogDocument {
    /// Major version this build reads and writes
    pub const MAJOR: u64 = 1;

    pub fn new(features: Vec<FeaturePermission>) -> Self {
        CatalogDocument {
            version: Version::new(Self::MAJOR, 0, 0),
            features,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        document.check_version()?;
        Ok(document)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let document: CatalogDocument = toml::from_str(text)?;
        document.check_version()?;
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GateError::Config(e.to_string()))
    }

    fn check_version(&self) -> Result<()> {
        if self.version.major != Self::MAJOR {
            return Err(GateError::UnsupportedCatalogVersion(self.version.to_string()));
        }
        Ok(())
    }
}

/// Immutable snapshot of the active permission rows
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    rows: AHashMap<FeatureKey, FeaturePermission>,
    inactive: usize,
    generation: u64,
    /// xxh3-128 over the active rows in key order
    digest: u128,
}

impl PermissionSet {
    /// Build a snapshot from raw rows
    ///
    /// Every row is validated, duplicate keys are rejected (inactive rows
    /// included) and inactive rows are dropped.
    pub fn from_rows(rows: Vec<FeaturePermission>, generation: u64) -> Result<Self> {
        let mut seen = AHashSet::with_capacity(rows.len());
        let mut active = AHashMap::with_capacity(rows.len());
        let mut inactive = 0;

        for row in rows {
            row.check()?;

            if !seen.insert(row.feature_key.clone()) {
                return Err(GateError::DuplicateFeature(row.key().to_string()));
            }

            if row.is_active {
                active.insert(row.feature_key.clone(), row);
            } else {
                inactive += 1;
            }
        }

        let digest = Self::digest_rows(&active)?;

        Ok(PermissionSet {
            rows: active,
            inactive,
            generation,
            digest,
        })
    }

    /// Active row for `feature_key`
    pub fn get(&self, feature_key: &str) -> Option<&FeaturePermission> {
        self.rows.get(feature_key)
    }

    pub fn contains(&self, feature_key: &str) -> bool {
        self.rows.contains_key(feature_key)
    }

    /// Number of active rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows dropped for being inactive
    pub fn inactive_count(&self) -> usize {
        self.inactive
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content hash of the active rows
    ///
    /// Two sets with the same digest give the same decision for every input,
    /// whatever their generation.
    pub fn digest(&self) -> u128 {
        self.digest
    }

    /// Active rows ordered by feature key
    pub fn rows(&self) -> Vec<&FeaturePermission> {
        let mut rows: Vec<_> = self.rows.values().collect();
        rows.sort_by(|a, b| a.feature_key.cmp(&b.feature_key));
        rows
    }

    // JSON rather than bincode: the untagged `Tier` would encode
    // `individual_free` and `corporate_expert` as the same variant index.
    fn digest_rows(rows: &AHashMap<FeatureKey, FeaturePermission>) -> Result<u128> {
        let mut sorted: Vec<_> = rows.values().collect();
        sorted.sort_by(|a, b| a.feature_key.cmp(&b.feature_key));

        let mut hasher = Xxh3::new();
        for row in sorted {
            let encoded = serde_json::to_vec(row)?;
            hasher.update(&(encoded.len() as u64).to_le_bytes());
            hasher.update(&encoded);
        }
        Ok(hasher.digest128())
    }
}

/// Owner of the current permission snapshot
pub struct PermissionCatalog {
    source: Box<dyn PermissionSource>,
    current: RwLock<Arc<PermissionSet>>,
    generation: AtomicU64,
    /// Held from reading the source until the new snapshot is installed
    edits: Mutex<()>,
}

impl PermissionCatalog {
    /// Load the initial snapshot from `source`
    pub fn load(source: Box<dyn PermissionSource>) -> Result<Self> {
        let set = PermissionSet::from_rows(source.fetch_rows()?, 1)?;
        info!(
            "Loaded {} active permissions ({} inactive) from {}",
            set.len(),
            set.inactive_count(),
            source.describe()
        );

        Ok(PermissionCatalog {
            source,
            current: RwLock::new(Arc::new(set)),
            generation: AtomicU64::new(1),
            edits: Mutex::new(()),
        })
    }

    /// Current snapshot; cheap to clone and safe to hold across a refetch
    pub fn snapshot(&self) -> Arc<PermissionSet> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Re-read the source and swap in a new snapshot
    ///
    /// On error the previous snapshot stays in place.
    pub fn refetch(&self) -> Result<Arc<PermissionSet>> {
        let _edit = self.edits.lock();
        let rows = self.source.fetch_rows()?;
        let set = self.install(rows)?;
        info!(
            "Refetched permissions from {}: {} active, generation {}",
            self.source.describe(),
            set.len(),
            set.generation()
        );
        Ok(set)
    }

    /// Insert or replace a row and persist it to the source
    pub fn upsert(&self, row: FeaturePermission) -> Result<Arc<PermissionSet>> {
        row.check()?;

        let _edit = self.edits.lock();
        let mut rows = self.source.fetch_rows()?;
        let position = rows.iter().position(|r| r.feature_key == row.feature_key);
        match position {
            Some(index) => rows[index] = row,
            None => rows.push(row),
        }

        // Validate before persisting so a bad edit never reaches the source.
        PermissionSet::from_rows(rows.clone(), 0)?;
        self.source.store_rows(&rows)?;
        self.install(rows)
    }

    /// Mark a row inactive; it disappears from the active set but stays stored
    pub fn deactivate(&self, feature_key: &str) -> Result<Arc<PermissionSet>> {
        let _edit = self.edits.lock();
        let mut rows = self.source.fetch_rows()?;
        let row = rows
            .iter_mut()
            .find(|r| r.key() == feature_key)
            .ok_or_else(|| GateError::UnknownFeature(feature_key.to_string()))?;
        row.is_active = false;

        self.source.store_rows(&rows)?;
        self.install(rows)
    }

    fn install(&self, rows: Vec<FeaturePermission>) -> Result<Arc<PermissionSet>> {
        let mut current = self.current.write();
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        let set = Arc::new(PermissionSet::from_rows(rows, generation)?);
        self.generation.store(generation, Ordering::SeqCst);
        *current = Arc::clone(&set);
        debug!("Installed permission snapshot generation {}", generation);
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::permission::StaticSource;
    use crate::core::tier::{CorporateTier, IndividualTier, Tier};

    fn row(key: &str) -> FeaturePermission {
        FeaturePermission::new(
            FeatureKey::new(key).unwrap(),
            "test",
            key,
            [Tier::Individual(IndividualTier::IndividualExpert)],
        )
    }

    #[test]
    fn test_inactive_rows_excluded() {
        let set = PermissionSet::from_rows(vec![row("alpha"), row("beta").inactive()], 1).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.inactive_count(), 1);
        assert!(set.contains("alpha"));
        assert!(!set.contains("beta"));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let err = PermissionSet::from_rows(vec![row("alpha"), row("alpha").inactive()], 1)
            .unwrap_err();
        assert!(matches!(err, GateError::DuplicateFeature(key) if key == "alpha"));
    }

    #[test]
    fn test_rows_sorted() {
        let set = PermissionSet::from_rows(vec![row("gamma"), row("alpha"), row("beta")], 1)
            .unwrap();
        let keys: Vec<_> = set.rows().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_digest_follows_content() {
        let a = PermissionSet::from_rows(vec![row("alpha"), row("beta")], 1).unwrap();
        let b = PermissionSet::from_rows(vec![row("beta"), row("alpha")], 9).unwrap();
        assert_eq!(a.digest(), b.digest());

        // Tiers with the same variant index within their enum must still differ.
        let free = FeaturePermission::new(
            FeatureKey::new("alpha").unwrap(),
            "test",
            "alpha",
            [Tier::Individual(IndividualTier::IndividualFree)],
        );
        let corporate = FeaturePermission::new(
            FeatureKey::new("alpha").unwrap(),
            "test",
            "alpha",
            [Tier::Corporate(CorporateTier::CorporateExpert)],
        );
        let free = PermissionSet::from_rows(vec![free], 1).unwrap();
        let corporate = PermissionSet::from_rows(vec![corporate], 1).unwrap();
        assert_ne!(free.digest(), corporate.digest());

        let with_cost = PermissionSet::from_rows(vec![row("alpha").with_cost(1), row("beta")], 1).unwrap();
        assert_ne!(a.digest(), with_cost.digest());

        let with_inactive = PermissionSet::from_rows(vec![row("alpha"), row("beta"), row("gamma").inactive()], 1).unwrap();
        assert_eq!(a.digest(), with_inactive.digest());
    }

    #[test]
    fn test_document_version_check() {
        let json = r#"{"version": "2.0.0", "features": []}"#;
        assert!(matches!(
            CatalogDocument::from_json(json),
            Err(GateError::UnsupportedCatalogVersion(_))
        ));

        let json = r#"{"version": "1.4.2", "features": []}"#;
        assert!(CatalogDocument::from_json(json).is_ok());
    }

    #[test]
    fn test_document_toml() {
        let text = r#"
            version = "1.0.0"

            [[features]]
            feature_key = "radar_report"
            feature_category = "radar"
            feature_name = "Competitor report"
            allowed_tiers = ["individual_pro", "corporate_expert"]
            allowed_company_roles = ["ceo"]
            credit_cost = 5
        "#;
        let document = CatalogDocument::from_toml(text).unwrap();
        assert_eq!(document.features.len(), 1);
        assert_eq!(document.features[0].credit_cost, 5);
        assert_eq!(document.features[0].allowed_tiers.len(), 2);
    }

    #[test]
    fn test_refetch_bumps_generation() {
        let source = Arc::new(StaticSource::new(vec![row("alpha")]));
        let catalog = PermissionCatalog::load(Box::new(Arc::clone(&source))).unwrap();
        assert_eq!(catalog.generation(), 1);

        source.replace(vec![row("alpha"), row("beta")]);
        let set = catalog.refetch().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.generation(), 2);
        assert_eq!(catalog.generation(), 2);
    }

    #[test]
    fn test_failed_refetch_keeps_snapshot() {
        let source = Arc::new(StaticSource::new(vec![row("alpha")]));
        let catalog = PermissionCatalog::load(Box::new(Arc::clone(&source))).unwrap();

        source.replace(vec![row("alpha"), row("alpha")]);
        assert!(catalog.refetch().is_err());
        assert_eq!(catalog.snapshot().len(), 1);
        assert_eq!(catalog.generation(), 1);
    }

    #[test]
    fn test_upsert_and_deactivate() {
        let catalog =
            PermissionCatalog::load(Box::new(StaticSource::new(vec![row("alpha")]))).unwrap();

        let set = catalog.upsert(row("beta").with_cost(3)).unwrap();
        assert_eq!(set.get("beta").map(|r| r.credit_cost), Some(3));

        let set = catalog.upsert(row("beta").with_cost(7)).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("beta").map(|r| r.credit_cost), Some(7));

        let set = catalog.deactivate("alpha").unwrap();
        assert!(!set.contains("alpha"));
        assert_eq!(set.inactive_count(), 1);
        assert_eq!(catalog.generation(), 4);

        assert!(catalog.deactivate("missing").is_err());
    }

    #[test]
    fn test_upsert_rejects_invalid_row() {
        let catalog =
            PermissionCatalog::load(Box::new(StaticSource::new(vec![row("alpha")]))).unwrap();
        let bad = row("beta").with_capability(false, true);
        assert!(catalog.upsert(bad).is_err());
        assert_eq!(catalog.generation(), 1);
    }
}

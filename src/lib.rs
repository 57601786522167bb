//! # tiergate - Feature access and credit metering
//!
//! `tiergate` decides which features a user of the HR platform may open, whether
//! they may edit, and what an invocation costs in credits. It covers:
//!
//! - **Tier gating** for individual and corporate plans
//! - **Company role gating** for corporate members
//! - **Credit metering** from personal allotments or a shared company pool,
//!   with atomic debits
//! - **Audit trail** of charges and permission edits for the admin viewer
//!
//! ## Quick Start
//!
//! ```rust
//! use tiergate::{AccessGateBuilder, FeatureKey, FeaturePermission, IndividualTier, Tier, UserContext};
//!
//! # fn main() -> tiergate::Result<()> {
//! let radar = FeaturePermission::new(
//!     FeatureKey::new("radar_report")?,
//!     "radar",
//!     "Competitor report",
//!     [Tier::Individual(IndividualTier::IndividualPro)],
//! )
//! .with_cost(5);
//!
//! let gate = AccessGateBuilder::new().rows(vec![radar]).build()?;
//! gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 20);
//!
//! let user = UserContext::individual("u1", Some(IndividualTier::IndividualPro)).with_credits(20, 0);
//! assert!(gate.check(Some(&user), "radar_report").has_access);
//!
//! let charge = gate.consume(&user, "radar_report")?;
//! assert_eq!(charge.credits_charged, 5);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{GateConfig, MonthlyAllotments};
pub use crate::core::{
    audit::{AuditAction, AuditEntry, AuditLogger, AuditQuery, AuditRecord, AuditTrail, GENESIS_HASH},
    context::UserContext,
    evaluator::{evaluate, evaluate_permission, AccessEvaluator, AccessResult, CacheStats, DenyReason},
    ledger::{AccountRef, CreditLedger, DebitReceipt, LedgerMovement},
    permission::{
        CatalogDocument, FeaturePermission, FileSource, PermissionCatalog, PermissionSet,
        PermissionSource, StaticSource,
    },
    tier::{CompanyRole, CorporateTier, IndividualTier, Tier, UserType},
    validation::FeatureKey,
};
pub use crate::error::{GateError, Result};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a successful [`AccessGate::consume`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub feature_key: String,
    /// What the evaluator granted at the moment of charging
    pub access: AccessResult,
    pub credits_charged: i64,
    /// `None` when nothing was debited (free feature or admin)
    pub receipt: Option<DebitReceipt>,
}

type AuditSink = Box<dyn Fn(&[AuditEntry]) + Send + 'static>;

/// Access gate: permission catalog, cached evaluator, credit ledger and audit
///
/// All methods take `&self`; share the gate across threads with an `Arc`.
pub struct AccessGate {
    catalog: PermissionCatalog,
    evaluator: Mutex<AccessEvaluator>,
    ledger: CreditLedger,
    trail: AuditTrail,
    logger: Option<AuditLogger>,
    config: GateConfig,
}

impl AccessGate {
    /// Decide access for `context` (None for an anonymous visitor)
    ///
    /// Balances are taken from the context as given. Use
    /// [`check_live`](Self::check_live) to evaluate against ledger balances.
    pub fn check(&self, context: Option<&UserContext>, feature_key: &str) -> AccessResult {
        let snapshot = self.catalog.snapshot();
        let result = self.evaluator.lock().evaluate(context, feature_key, &snapshot);
        self.log_decision(context, feature_key, &result);
        result
    }

    /// Like [`check`](Self::check) but with balances hydrated from the ledger
    pub fn check_live(&self, context: &UserContext, feature_key: &str) -> AccessResult {
        let hydrated = self.ledger.hydrate(context);
        self.check(Some(&hydrated), feature_key)
    }

    /// Evaluate and pay for one invocation of `feature_key`
    ///
    /// The decision and the debit happen under the ledger lock against ledger
    /// balances, so concurrent invocations cannot overdraw an account. Fails
    /// with `InsufficientCredit` when the price cannot be paid (even if view
    /// access would be granted), with `FeatureNotViewable` when the row itself
    /// withholds view and with `AccessDenied` for every other denial.
    pub fn consume(&self, context: &UserContext, feature_key: &str) -> Result<Charge> {
        let snapshot = self.catalog.snapshot();
        let mut access = None;

        let receipt = self.ledger.charge_with(context, feature_key, |live| {
            let result = evaluate(Some(live), feature_key, &snapshot);
            access = Some(result);

            match result.reason {
                Some(DenyReason::InsufficientCredit) => Err(GateError::InsufficientCredit {
                    required: i64::from(result.credit_cost),
                    available: live.available_credits(),
                }),
                Some(reason) => Err(GateError::AccessDenied(reason)),
                None if !result.has_access => Err(GateError::FeatureNotViewable(feature_key.to_string())),
                None => Ok(i64::from(result.credit_cost)),
            }
        });

        let access = access.unwrap_or_else(|| evaluate(Some(context), feature_key, &snapshot));
        self.log_decision(Some(context), feature_key, &access);

        let receipt = receipt?;
        let credits_charged = receipt.as_ref().map_or(0, |r| r.amount);

        if credits_charged > 0 {
            self.trail.append(
                &context.user_id,
                AuditAction::Charge,
                feature_key,
                "granted",
                credits_charged,
            );
            self.log_entry(Some(&context.user_id), AuditAction::Charge, feature_key, 0, credits_charged);
        }

        Ok(Charge {
            feature_key: feature_key.to_string(),
            access,
            credits_charged,
            receipt,
        })
    }

    /// Every active feature with the decision for `context`, ordered by key
    pub fn visible_features(&self, context: Option<&UserContext>) -> Vec<(FeaturePermission, AccessResult)> {
        let snapshot = self.catalog.snapshot();
        let mut evaluator = self.evaluator.lock();

        snapshot
            .rows()
            .into_iter()
            .map(|row| {
                let result = evaluator.evaluate(context, row.key(), &snapshot);
                (row.clone(), result)
            })
            .collect()
    }

    /// Reload permissions from the source
    pub fn refetch(&self) -> Result<Arc<PermissionSet>> {
        let set = self.catalog.refetch()?;
        self.trail.append(
            "system",
            AuditAction::CatalogRefetch,
            "*",
            &format!("generation {}", set.generation()),
            0,
        );
        Ok(set)
    }

    /// Create or replace a permission row (admins only)
    pub fn admin_upsert(&self, admin: &UserContext, row: FeaturePermission) -> Result<Arc<PermissionSet>> {
        Self::require_admin(admin)?;

        let key = row.key().to_string();
        let existed = self.catalog.snapshot().contains(&key);
        let set = self.catalog.upsert(row)?;

        let outcome = if existed { "updated" } else { "created" };
        self.trail.append(&admin.user_id, AuditAction::PermissionUpsert, &key, outcome, 0);
        info!("Admin {} {} permission '{}'", admin.user_id, outcome, key);
        Ok(set)
    }

    /// Deactivate a permission row (admins only)
    pub fn admin_deactivate(&self, admin: &UserContext, feature_key: &str) -> Result<Arc<PermissionSet>> {
        Self::require_admin(admin)?;

        let set = self.catalog.deactivate(feature_key)?;
        self.trail.append(
            &admin.user_id,
            AuditAction::PermissionDeactivate,
            feature_key,
            "deactivated",
            0,
        );
        info!("Admin {} deactivated permission '{}'", admin.user_id, feature_key);
        Ok(set)
    }

    /// Start a new billing period using the configured allotments
    pub fn reset_period(&self) -> usize {
        self.ledger.reset_period(&self.config.monthly_allotments)
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.trail
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.evaluator.lock().cache_stats()
    }

    fn require_admin(context: &UserContext) -> Result<()> {
        if context.is_admin {
            Ok(())
        } else {
            Err(GateError::AccessDenied(DenyReason::RoleLacksAccess))
        }
    }

    fn log_decision(&self, context: Option<&UserContext>, feature_key: &str, result: &AccessResult) {
        let outcome = result.reason.map_or(0, |r| r.code());
        self.log_entry(
            context.map(|c| c.user_id.as_str()),
            AuditAction::Evaluate,
            feature_key,
            outcome,
            i64::from(result.credit_cost),
        );
    }

    fn log_entry(&self, actor: Option<&str>, action: AuditAction, feature_key: &str, outcome: u8, credits: i64) {
        if let Some(logger) = &self.logger {
            let credits = u32::try_from(credits).unwrap_or(u32::MAX);
            logger.log(AuditEntry::new(actor, action, feature_key, outcome, credits));
        }
    }
}

/// Builder for [`AccessGate`]
///
/// # Examples
///
/// ```rust,no_run
/// use tiergate::{AccessGateBuilder, GateConfig};
///
/// # fn main() -> tiergate::Result<()> {
/// let gate = AccessGateBuilder::new()
///     .config(GateConfig::load("gate.toml")?)
///     .catalog_file("permissions.toml")
///     .with_audit_logging()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct AccessGateBuilder {
    config: GateConfig,
    source: Option<Box<dyn PermissionSource>>,
    catalog_path: Option<PathBuf>,
    enable_audit: bool,
    audit_sink: Option<AuditSink>,
}

impl AccessGateBuilder {
    pub fn new() -> Self {
        AccessGateBuilder {
            config: GateConfig::default(),
            source: None,
            catalog_path: None,
            enable_audit: false,
            audit_sink: None,
        }
    }

    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Permission rows from any source
    pub fn source(mut self, source: Box<dyn PermissionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Permission rows held in memory
    pub fn rows(self, rows: Vec<FeaturePermission>) -> Self {
        self.source(Box::new(StaticSource::new(rows)))
    }

    /// Permission rows from a catalog document on disk
    pub fn catalog_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Feed evaluations and charges to a background audit logger
    pub fn with_audit_logging(mut self) -> Self {
        self.enable_audit = true;
        self
    }

    /// Where flushed audit batches go (defaults to a debug log line per batch)
    pub fn audit_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&[AuditEntry]) + Send + 'static,
    {
        self.enable_audit = true;
        self.audit_sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> Result<AccessGate> {
        self.config.validate()?;

        let source: Box<dyn PermissionSource> = match (self.source, self.catalog_path) {
            (Some(source), _) => source,
            (None, Some(path)) => Box::new(FileSource::new(path)),
            (None, None) => match &self.config.catalog_path {
                Some(path) => Box::new(FileSource::new(path)),
                None => {
                    return Err(GateError::Config(
                        "no permission source: set rows, a source or a catalog path".to_string(),
                    ))
                }
            },
        };

        let catalog = PermissionCatalog::load(source)?;

        let logger = if self.enable_audit {
            let mut logger =
                AuditLogger::new(self.config.audit_capacity, self.config.audit_flush_interval());
            match self.audit_sink {
                Some(sink) => logger.start(move |entries| sink(entries)),
                None => logger.start(|entries| {
                    debug!("Flushed {} audit entries", entries.len());
                }),
            }
            debug!("Audit logging enabled");
            Some(logger)
        } else {
            None
        };

        info!(
            "Access gate ready: {} features, cache capacity {}",
            catalog.snapshot().len(),
            self.config.cache_capacity
        );

        Ok(AccessGate {
            catalog,
            evaluator: Mutex::new(AccessEvaluator::new(self.config.cache_capacity)),
            ledger: CreditLedger::new(),
            trail: AuditTrail::new(),
            logger,
            config: self.config,
        })
    }
}

impl Default for AccessGateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rows() -> Vec<FeaturePermission> {
        vec![
            FeaturePermission::new(
                FeatureKey::new("radar_report").unwrap(),
                "radar",
                "Competitor report",
                [Tier::Individual(IndividualTier::IndividualPro)],
            )
            .with_cost(5),
            FeaturePermission::new(
                FeatureKey::new("compass_view").unwrap(),
                "compass",
                "Compass overview",
                [
                    Tier::Individual(IndividualTier::IndividualFree),
                    Tier::Individual(IndividualTier::IndividualPro),
                ],
            ),
        ]
    }

    fn pro() -> UserContext {
        UserContext::individual("u1", Some(IndividualTier::IndividualPro))
    }

    #[test]
    fn test_builder_requires_source() {
        assert!(matches!(
            AccessGateBuilder::new().build(),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_check_uses_context_balances() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();

        let broke = pro().with_credits(2, 0);
        let result = gate.check(Some(&broke), "radar_report");
        assert_eq!(result.reason, Some(DenyReason::InsufficientCredit));
        assert!(result.is_view_only());
    }

    #[test]
    fn test_check_live_uses_ledger() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 50);

        let stale = pro().with_credits(0, 0);
        assert_eq!(gate.check_live(&stale, "radar_report").reason, None);
    }

    #[test]
    fn test_consume_debits_and_audits() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 12);

        let charge = gate.consume(&pro(), "radar_report").unwrap();
        assert_eq!(charge.credits_charged, 5);
        assert_eq!(charge.receipt.unwrap().balance_after, 7);

        let records = gate.audit_trail().query(&AuditQuery::new().action(AuditAction::Charge));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].credits, 5);
    }

    #[test]
    fn test_consume_free_feature_charges_nothing() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 0);

        let charge = gate.consume(&pro(), "compass_view").unwrap();
        assert_eq!(charge.credits_charged, 0);
        assert!(charge.receipt.is_none());
        assert!(gate.audit_trail().is_empty());
    }

    #[test]
    fn test_consume_insufficient_credit() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 4);

        let err = gate.consume(&pro(), "radar_report").unwrap_err();
        assert!(matches!(
            err,
            GateError::InsufficientCredit {
                required: 5,
                available: 4
            }
        ));
        assert_eq!(gate.ledger().personal("u1").unwrap().used, 0);
    }

    #[test]
    fn test_consume_denied() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        let free = UserContext::individual("u2", Some(IndividualTier::IndividualFree));
        gate.ledger().open_personal("u2", Some(IndividualTier::IndividualFree), 100);

        assert!(matches!(
            gate.consume(&free, "radar_report"),
            Err(GateError::AccessDenied(DenyReason::NotInPlan))
        ));
    }

    #[test]
    fn test_consume_hidden_feature() {
        let hidden = FeaturePermission::new(
            FeatureKey::new("radar_archive").unwrap(),
            "radar",
            "Archived reports",
            [Tier::Individual(IndividualTier::IndividualPro)],
        )
        .with_capability(false, false)
        .with_cost(3);
        let gate = AccessGateBuilder::new().rows(vec![hidden]).build().unwrap();
        gate.ledger().open_personal("u1", Some(IndividualTier::IndividualPro), 10);

        let result = gate.check_live(&pro(), "radar_archive");
        assert!(!result.has_access);
        assert_eq!(result.reason, None);

        assert!(matches!(
            gate.consume(&pro(), "radar_archive"),
            Err(GateError::FeatureNotViewable(key)) if key == "radar_archive"
        ));
        assert_eq!(gate.ledger().personal("u1").unwrap().used, 0);
    }

    #[test]
    fn test_admin_consumes_for_free() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        let charge = gate.consume(&UserContext::admin("root"), "radar_report").unwrap();
        assert_eq!(charge.credits_charged, 0);
        assert!(charge.access.can_edit);
    }

    #[test]
    fn test_visible_features() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        let free = UserContext::individual("u2", Some(IndividualTier::IndividualFree));

        let visible = gate.visible_features(Some(&free));
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].0.key(), "compass_view");
        assert!(visible[0].1.has_access);
        assert!(!visible[1].1.has_access);
    }

    #[test]
    fn test_admin_edits_require_admin() {
        let gate = AccessGateBuilder::new().rows(rows()).build().unwrap();
        let row = rows().remove(0).with_cost(1);

        assert!(matches!(
            gate.admin_upsert(&pro(), row.clone()),
            Err(GateError::AccessDenied(_))
        ));
        assert!(gate.admin_deactivate(&pro(), "radar_report").is_err());

        let admin = UserContext::admin("root");
        gate.admin_upsert(&admin, row).unwrap();
        gate.admin_deactivate(&admin, "compass_view").unwrap();

        let free = UserContext::individual("u2", Some(IndividualTier::IndividualFree));
        assert_eq!(
            gate.check(Some(&free), "compass_view").reason,
            Some(DenyReason::FeatureNotDefined)
        );

        let edits = gate.audit_trail().query(&AuditQuery::new().actor("root"));
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[1].outcome, "updated");
        assert_eq!(gate.audit_trail().verify(), Ok(()));
    }

    #[test]
    fn test_audit_sink_receives_entries() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let gate = AccessGateBuilder::new()
            .rows(rows())
            .config(GateConfig {
                audit_flush_interval_ms: 10,
                ..GateConfig::default()
            })
            .audit_sink(move |entries| {
                seen_clone.fetch_add(entries.len(), Ordering::SeqCst);
            })
            .build()
            .unwrap();

        for _ in 0..10 {
            gate.check(Some(&pro()), "compass_view");
        }
        drop(gate);

        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }
}

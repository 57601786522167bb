//! Access evaluation
//!
//! Decides whether a user may view or edit a feature and what invoking it
//! costs. Checks run in a fixed order and the first failing one decides:
//! - no session, then admin bypass
//! - unknown or inactive feature
//! - missing plan, plan not allowed, corporate role not allowed
//! - credit balance below the feature's price
//!
//! The decision itself is a pure function ([`evaluate`]); [`AccessEvaluator`]
//! wraps it with an LRU cache.

mod cache;

pub use cache::{CacheStats, DecisionCache};

use crate::core::context::UserContext;
use crate::core::permission::{FeaturePermission, PermissionSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Why access was refused or limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    #[serde(rename = "sign-in required")]
    SignInRequired,
    #[serde(rename = "feature not defined")]
    FeatureNotDefined,
    #[serde(rename = "no subscription")]
    NoSubscription,
    #[serde(rename = "not included in your plan")]
    NotInPlan,
    #[serde(rename = "your role lacks access")]
    RoleLacksAccess,
    /// View may still be granted; edit never is
    #[serde(rename = "insufficient credit")]
    InsufficientCredit,
}

impl DenyReason {
    /// Stable reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::SignInRequired => "sign-in required",
            DenyReason::FeatureNotDefined => "feature not defined",
            DenyReason::NoSubscription => "no subscription",
            DenyReason::NotInPlan => "not included in your plan",
            DenyReason::RoleLacksAccess => "your role lacks access",
            DenyReason::InsufficientCredit => "insufficient credit",
        }
    }

    /// Copy shown to end users
    pub fn message_fa(&self) -> &'static str {
        match self {
            DenyReason::SignInRequired => "لطفاً ابتدا وارد حساب کاربری خود شوید",
            DenyReason::FeatureNotDefined => "این قابلیت تعریف نشده است",
            DenyReason::NoSubscription => "شما اشتراک فعالی ندارید",
            DenyReason::NotInPlan => "این قابلیت در طرح اشتراک شما وجود ندارد",
            DenyReason::RoleLacksAccess => "نقش سازمانی شما به این قابلیت دسترسی ندارد",
            DenyReason::InsufficientCredit => "اعتبار شما برای استفاده از این قابلیت کافی نیست",
        }
    }

    /// Compact numeric code for audit entries (0 is reserved for "granted")
    pub fn code(&self) -> u8 {
        match self {
            DenyReason::SignInRequired => 1,
            DenyReason::FeatureNotDefined => 2,
            DenyReason::NoSubscription => 3,
            DenyReason::NotInPlan => 4,
            DenyReason::RoleLacksAccess => 5,
            DenyReason::InsufficientCredit => 6,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
    pub has_access: bool,
    pub can_edit: bool,
    /// Price of one invocation; 0 for admins and for unknown features
    pub credit_cost: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl AccessResult {
    fn deny(reason: DenyReason, credit_cost: u32) -> Self {
        AccessResult {
            has_access: false,
            can_edit: false,
            credit_cost,
            reason: Some(reason),
        }
    }

    fn admin() -> Self {
        AccessResult {
            has_access: true,
            can_edit: true,
            credit_cost: 0,
            reason: None,
        }
    }

    /// Access granted but editing is not
    pub fn is_view_only(&self) -> bool {
        self.has_access && !self.can_edit
    }

    /// Persian message for the UI, if there is anything to explain
    pub fn message_fa(&self) -> Option<&'static str> {
        self.reason.map(|r| r.message_fa())
    }
}

/// Evaluate `feature_key` for `context` against the active `permissions`
///
/// Never fails: every negative outcome is carried in [`AccessResult::reason`].
///
/// # Examples
///
/// ```
/// use tiergate::{evaluate, DenyReason, FeatureKey, FeaturePermission, PermissionSet, UserContext};
/// use tiergate::{IndividualTier, Tier};
///
/// let row = FeaturePermission::new(
///     FeatureKey::new("radar_report").unwrap(),
///     "radar",
///     "Competitor report",
///     [Tier::Individual(IndividualTier::IndividualPro)],
/// );
/// let permissions = PermissionSet::from_rows(vec![row], 1).unwrap();
///
/// let free = UserContext::individual("u1", Some(IndividualTier::IndividualFree));
/// let result = evaluate(Some(&free), "radar_report", &permissions);
/// assert!(!result.has_access);
/// assert_eq!(result.reason, Some(DenyReason::NotInPlan));
/// ```
pub fn evaluate(
    context: Option<&UserContext>,
    feature_key: &str,
    permissions: &PermissionSet,
) -> AccessResult {
    let Some(context) = context else {
        return AccessResult::deny(DenyReason::SignInRequired, 0);
    };

    if context.is_admin {
        return AccessResult::admin();
    }

    evaluate_permission(context, permissions.get(feature_key))
}

/// Evaluate a single (possibly missing) row for a signed-in user
pub fn evaluate_permission(
    context: &UserContext,
    permission: Option<&FeaturePermission>,
) -> AccessResult {
    if context.is_admin {
        return AccessResult::admin();
    }

    let Some(permission) = permission else {
        return AccessResult::deny(DenyReason::FeatureNotDefined, 0);
    };
    let cost = permission.credit_cost;

    let Some(tier) = context.effective_tier() else {
        return AccessResult::deny(DenyReason::NoSubscription, cost);
    };

    if !permission.allows_tier(tier) {
        return AccessResult::deny(DenyReason::NotInPlan, cost);
    }

    if context.is_corporate() && !permission.allows_role(context.company_role) {
        return AccessResult::deny(DenyReason::RoleLacksAccess, cost);
    }

    if cost > 0 && context.available_credits() < i64::from(cost) {
        return AccessResult {
            has_access: permission.allow_view,
            can_edit: false,
            credit_cost: cost,
            reason: Some(DenyReason::InsufficientCredit),
        };
    }

    AccessResult {
        has_access: permission.allow_view,
        can_edit: permission.allow_edit,
        credit_cost: cost,
        reason: None,
    }
}

/// Cached evaluator
///
/// Results are keyed by a fingerprint of the full context, the feature key and
/// the content digest of the permission set, so a cached answer is always the
/// answer [`evaluate`] would give for the same inputs.
pub struct AccessEvaluator {
    cache: DecisionCache,
}

impl AccessEvaluator {
    /// Create an evaluator with the given cache capacity (0 disables caching)
    pub fn new(cache_capacity: usize) -> Self {
        AccessEvaluator {
            cache: DecisionCache::new(cache_capacity),
        }
    }

    /// Create an evaluator with the default cache (1024 entries)
    pub fn new_default() -> Self {
        Self::new(1024)
    }

    pub fn evaluate(
        &mut self,
        context: Option<&UserContext>,
        feature_key: &str,
        permissions: &PermissionSet,
    ) -> AccessResult {
        let fingerprint = DecisionCache::fingerprint(context, feature_key, permissions.digest());

        if let Some(fingerprint) = fingerprint {
            if let Some(cached) = self.cache.get(fingerprint) {
                return cached;
            }
        }

        let result = evaluate(context, feature_key, permissions);
        if let Some(reason) = result.reason {
            debug!(
                "Feature '{}' for user {:?}: {}",
                feature_key,
                context.map(|c| c.user_id.as_str()),
                reason
            );
        }

        if let Some(fingerprint) = fingerprint {
            self.cache.put(fingerprint, result);
        }

        result
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Default for AccessEvaluator {
    fn default() -> Self {
        Self::new_default()
    }
}

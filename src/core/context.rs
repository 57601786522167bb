//! Per-session user context
//!
//! The session layer builds a [`UserContext`] on login and refreshes it when
//! profile or membership data changes. It is passed explicitly to every
//! evaluation; nothing in this crate reads it from ambient state.

use super::tier::{CompanyRole, CorporateTier, IndividualTier, Tier, UserType};
use serde::{Deserialize, Serialize};

/// Everything the evaluator needs to know about the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserContext {
    /// Opaque user identifier
    pub user_id: String,

    pub user_type: UserType,

    /// Personal plan, meaningful for individual users
    #[serde(default)]
    pub subscription_tier: Option<IndividualTier>,

    #[serde(default)]
    pub company_id: Option<String>,

    #[serde(default)]
    pub company_role: Option<CompanyRole>,

    /// Company plan, meaningful for corporate users
    #[serde(default)]
    pub company_tier: Option<CorporateTier>,

    /// Platform administrators bypass every check
    #[serde(default)]
    pub is_admin: bool,

    /// Personal monthly allotment
    #[serde(default)]
    pub credits: i64,

    /// Personal consumption in the current period
    #[serde(default)]
    pub used_credits: i64,

    #[serde(default)]
    pub company_credit_pool_enabled: bool,

    /// Credits shared by every member of the company
    #[serde(default)]
    pub company_credit_pool: i64,
}

impl UserContext {
    /// Context for an individual user on the given plan
    pub fn individual(user_id: impl Into<String>, tier: Option<IndividualTier>) -> Self {
        UserContext {
            user_id: user_id.into(),
            user_type: UserType::Individual,
            subscription_tier: tier,
            company_id: None,
            company_role: None,
            company_tier: None,
            is_admin: false,
            credits: 0,
            used_credits: 0,
            company_credit_pool_enabled: false,
            company_credit_pool: 0,
        }
    }

    /// Context for a member of a company
    pub fn corporate(
        user_id: impl Into<String>,
        company_id: impl Into<String>,
        tier: Option<CorporateTier>,
        role: Option<CompanyRole>,
    ) -> Self {
        UserContext {
            user_id: user_id.into(),
            user_type: UserType::Corporate,
            subscription_tier: None,
            company_id: Some(company_id.into()),
            company_role: role,
            company_tier: tier,
            is_admin: false,
            credits: 0,
            used_credits: 0,
            company_credit_pool_enabled: false,
            company_credit_pool: 0,
        }
    }

    /// Platform administrator
    pub fn admin(user_id: impl Into<String>) -> Self {
        let mut ctx = Self::individual(user_id, None);
        ctx.is_admin = true;
        ctx
    }

    /// Set personal allotment and consumption
    pub fn with_credits(mut self, credits: i64, used_credits: i64) -> Self {
        self.credits = credits;
        self.used_credits = used_credits;
        self
    }

    /// Enable the shared company pool with the given balance
    pub fn with_company_pool(mut self, balance: i64) -> Self {
        self.company_credit_pool_enabled = true;
        self.company_credit_pool = balance;
        self
    }

    pub fn is_corporate(&self) -> bool {
        self.user_type == UserType::Corporate
    }

    /// The plan that governs this user
    ///
    /// Corporate users with a company plan use it; everyone else falls back to
    /// the personal plan (which is usually unset for corporate users).
    pub fn effective_tier(&self) -> Option<Tier> {
        match (self.user_type, self.company_tier) {
            (UserType::Corporate, Some(company_tier)) => Some(Tier::Corporate(company_tier)),
            _ => self.subscription_tier.map(Tier::Individual),
        }
    }

    /// Whether spending draws from the shared company pool
    pub fn uses_company_pool(&self) -> bool {
        self.is_corporate() && self.company_credit_pool_enabled
    }

    /// Credits the user can spend right now
    pub fn available_credits(&self) -> i64 {
        if self.uses_company_pool() {
            self.company_credit_pool
        } else {
            self.credits.saturating_sub(self.used_credits)
        }
    }
}

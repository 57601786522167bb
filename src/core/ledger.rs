//! Credit ledger
//!
//! Authoritative credit balances. Every debit is a check-and-decrement under
//! one lock, so two sessions spending from the same personal allotment or
//! company pool can never push it below zero.
//!
//! Accounts:
//! - personal: monthly `allotment` and `used` per user
//! - company pool: shared `balance`, used by members while `enabled`

use crate::config::MonthlyAllotments;
use crate::core::context::UserContext;
use crate::core::tier::IndividualTier;
use crate::error::{GateError, Result};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Personal monthly allotment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalAccount {
    pub tier: Option<IndividualTier>,
    pub allotment: i64,
    pub used: i64,
}

impl PersonalAccount {
    pub fn available(&self) -> i64 {
        self.allotment.saturating_sub(self.used)
    }
}

/// Credits shared by all members of a company
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyPool {
    pub balance: i64,
    pub enabled: bool,
}

/// Which balance a movement touched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AccountRef {
    Personal(String),
    CompanyPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Debit,
    Grant,
    Reset,
}

/// One change to a balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub at: DateTime<Utc>,
    pub account: AccountRef,
    pub kind: MovementKind,
    pub amount: i64,
    /// Spendable balance after the movement
    pub balance_after: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_key: Option<String>,
}

/// Proof of a successful debit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitReceipt {
    pub account: AccountRef,
    pub amount: i64,
    pub balance_after: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    personal: AHashMap<String, PersonalAccount>,
    pools: AHashMap<String, CompanyPool>,
    history: Vec<LedgerMovement>,
}

impl LedgerState {
    /// Account step 8 of the evaluation would read for `ctx`
    ///
    /// The ledger's own pool flag decides, not the (possibly stale) flag in
    /// the context.
    fn account_for(&self, ctx: &UserContext) -> Result<AccountRef> {
        if ctx.is_corporate() {
            if let Some(company_id) = &ctx.company_id {
                if self.pools.get(company_id).map_or(false, |pool| pool.enabled) {
                    return Ok(AccountRef::CompanyPool(company_id.clone()));
                }
            }
        }

        if self.personal.contains_key(&ctx.user_id) {
            Ok(AccountRef::Personal(ctx.user_id.clone()))
        } else {
            Err(GateError::UnknownAccount(ctx.user_id.clone()))
        }
    }

    fn available(&self, account: &AccountRef) -> Result<i64> {
        match account {
            AccountRef::Personal(id) => self
                .personal
                .get(id)
                .map(PersonalAccount::available)
                .ok_or_else(|| GateError::UnknownAccount(id.clone())),
            AccountRef::CompanyPool(id) => self
                .pools
                .get(id)
                .map(|pool| pool.balance)
                .ok_or_else(|| GateError::UnknownAccount(id.clone())),
        }
    }

    fn hydrate(&self, ctx: &UserContext) -> UserContext {
        let mut hydrated = ctx.clone();

        if let Some(account) = self.personal.get(&ctx.user_id) {
            hydrated.credits = account.allotment;
            hydrated.used_credits = account.used;
        }

        if let Some(pool) = ctx.company_id.as_ref().and_then(|id| self.pools.get(id)) {
            hydrated.company_credit_pool_enabled = pool.enabled;
            hydrated.company_credit_pool = pool.balance;
        }

        hydrated
    }

    fn debit(
        &mut self,
        ctx: &UserContext,
        amount: i64,
        feature_key: Option<&str>,
    ) -> Result<DebitReceipt> {
        if amount <= 0 {
            return Err(GateError::InvalidAmount(amount));
        }

        let account = self.account_for(ctx)?;
        let available = self.available(&account)?;
        if available < amount {
            warn!(
                "Rejected debit of {} from {:?}: only {} available",
                amount, account, available
            );
            return Err(GateError::InsufficientCredit {
                required: amount,
                available,
            });
        }

        match &account {
            AccountRef::Personal(id) => {
                if let Some(personal) = self.personal.get_mut(id) {
                    personal.used += amount;
                }
            }
            AccountRef::CompanyPool(id) => {
                if let Some(pool) = self.pools.get_mut(id) {
                    pool.balance -= amount;
                }
            }
        }

        let balance_after = available - amount;
        debug!("Debited {} from {:?}, {} left", amount, account, balance_after);
        self.record(
            account.clone(),
            MovementKind::Debit,
            amount,
            balance_after,
            feature_key,
        );

        Ok(DebitReceipt {
            account,
            amount,
            balance_after,
        })
    }

    fn record(
        &mut self,
        account: AccountRef,
        kind: MovementKind,
        amount: i64,
        balance_after: i64,
        feature_key: Option<&str>,
    ) {
        self.history.push(LedgerMovement {
            at: Utc::now(),
            account,
            kind,
            amount,
            balance_after,
            feature_key: feature_key.map(str::to_string),
        });
    }
}

/// Thread-safe credit ledger
#[derive(Debug, Default)]
pub struct CreditLedger {
    state: Mutex<LedgerState>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a personal account with a fresh allotment
    pub fn open_personal(
        &self,
        user_id: impl Into<String>,
        tier: Option<IndividualTier>,
        allotment: i64,
    ) {
        let user_id = user_id.into();
        self.state.lock().personal.insert(
            user_id,
            PersonalAccount {
                tier,
                allotment,
                used: 0,
            },
        );
    }

    /// Open (or reopen) a company pool
    pub fn open_company_pool(&self, company_id: impl Into<String>, balance: i64, enabled: bool) {
        self.state
            .lock()
            .pools
            .insert(company_id.into(), CompanyPool { balance, enabled });
    }

    /// Turn pool spending on or off for a company
    pub fn set_pool_enabled(&self, company_id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.lock();
        let pool = state
            .pools
            .get_mut(company_id)
            .ok_or_else(|| GateError::UnknownAccount(company_id.to_string()))?;
        pool.enabled = enabled;
        Ok(())
    }

    /// Top up an account
    ///
    /// For personal accounts this raises the allotment for the current period.
    /// A grant that would overflow the balance is refused with `InvalidAmount`.
    pub fn grant(&self, account: &AccountRef, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(GateError::InvalidAmount(amount));
        }

        let mut state = self.state.lock();
        match account {
            AccountRef::Personal(id) => {
                let personal = state
                    .personal
                    .get_mut(id)
                    .ok_or_else(|| GateError::UnknownAccount(id.clone()))?;
                personal.allotment = personal
                    .allotment
                    .checked_add(amount)
                    .ok_or(GateError::InvalidAmount(amount))?;
            }
            AccountRef::CompanyPool(id) => {
                let pool = state
                    .pools
                    .get_mut(id)
                    .ok_or_else(|| GateError::UnknownAccount(id.clone()))?;
                pool.balance = pool
                    .balance
                    .checked_add(amount)
                    .ok_or(GateError::InvalidAmount(amount))?;
            }
        }

        let balance_after = state.available(account)?;
        state.record(account.clone(), MovementKind::Grant, amount, balance_after, None);
        Ok(balance_after)
    }

    pub fn personal(&self, user_id: &str) -> Option<PersonalAccount> {
        self.state.lock().personal.get(user_id).cloned()
    }

    pub fn pool(&self, company_id: &str) -> Option<CompanyPool> {
        self.state.lock().pools.get(company_id).cloned()
    }

    /// Account a debit for `ctx` would draw from
    pub fn account_for(&self, ctx: &UserContext) -> Result<AccountRef> {
        self.state.lock().account_for(ctx)
    }

    /// Credits `ctx` can spend right now according to the ledger
    pub fn available_for(&self, ctx: &UserContext) -> Result<i64> {
        let state = self.state.lock();
        let account = state.account_for(ctx)?;
        state.available(&account)
    }

    /// Copy of `ctx` with every balance field taken from the ledger
    ///
    /// Fields for accounts the ledger does not know are left as they were.
    pub fn hydrate(&self, ctx: &UserContext) -> UserContext {
        self.state.lock().hydrate(ctx)
    }

    /// Atomically take `amount` credits from the account `ctx` spends from
    ///
    /// Fails with `InsufficientCredit` and leaves every balance untouched if
    /// the account holds less than `amount`.
    pub fn debit(
        &self,
        ctx: &UserContext,
        amount: i64,
        feature_key: Option<&str>,
    ) -> Result<DebitReceipt> {
        self.state.lock().debit(ctx, amount, feature_key)
    }

    /// Decide and debit under one lock
    ///
    /// `decide` sees the context hydrated from the ledger and returns the
    /// amount to charge (0 charges nothing). No other debit can run between
    /// the decision and the debit.
    pub fn charge_with<F>(
        &self,
        ctx: &UserContext,
        feature_key: &str,
        decide: F,
    ) -> Result<Option<DebitReceipt>>
    where
        F: FnOnce(&UserContext) -> Result<i64>,
    {
        let mut state = self.state.lock();
        let hydrated = state.hydrate(ctx);
        let amount = decide(&hydrated)?;

        if amount == 0 {
            return Ok(None);
        }

        state.debit(&hydrated, amount, Some(feature_key)).map(Some)
    }

    /// Start a new billing period
    ///
    /// Personal usage drops to zero and allotments are set from `allotments`
    /// by tier; accounts without a tier keep their allotment. Company pools are
    /// untouched. Returns the number of accounts reset.
    pub fn reset_period(&self, allotments: &MonthlyAllotments) -> usize {
        let mut state = self.state.lock();
        let mut resets = Vec::with_capacity(state.personal.len());

        for (user_id, account) in state.personal.iter_mut() {
            if let Some(tier) = account.tier {
                account.allotment = allotments.for_tier(tier);
            }
            account.used = 0;
            resets.push((user_id.clone(), account.allotment));
        }

        let count = resets.len();
        for (user_id, allotment) in resets {
            state.record(
                AccountRef::Personal(user_id),
                MovementKind::Reset,
                allotment,
                allotment,
                None,
            );
        }

        info!("Reset credit period for {} personal accounts", count);
        count
    }

    /// Every movement so far, oldest first
    pub fn history(&self) -> Vec<LedgerMovement> {
        self.state.lock().history.clone()
    }

    /// Take every recorded movement, leaving the history empty
    ///
    /// Balances are unaffected. Callers archive the returned movements.
    pub fn drain_history(&self) -> Vec<LedgerMovement> {
        std::mem::take(&mut self.state.lock().history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tier::{CompanyRole, CorporateTier};

    fn pro_user() -> UserContext {
        UserContext::individual("u1", Some(IndividualTier::IndividualPro))
    }

    fn member() -> UserContext {
        UserContext::corporate(
            "m1",
            "acme",
            Some(CorporateTier::CorporateExpert),
            Some(CompanyRole::Manager),
        )
    }

    #[test]
    fn test_personal_debit() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", Some(IndividualTier::IndividualPro), 30);

        let receipt = ledger.debit(&pro_user(), 10, Some("radar")).unwrap();
        assert_eq!(receipt.account, AccountRef::Personal("u1".to_string()));
        assert_eq!(receipt.balance_after, 20);
        assert_eq!(ledger.personal("u1").unwrap().used, 10);
    }

    #[test]
    fn test_debit_floor() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 5);

        let err = ledger.debit(&pro_user(), 6, None).unwrap_err();
        assert!(matches!(
            err,
            GateError::InsufficientCredit {
                required: 6,
                available: 5
            }
        ));
        assert_eq!(ledger.personal("u1").unwrap().used, 0);
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_invalid_amounts() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 5);
        assert!(matches!(
            ledger.debit(&pro_user(), 0, None),
            Err(GateError::InvalidAmount(0))
        ));
        assert!(ledger
            .grant(&AccountRef::Personal("u1".to_string()), -3)
            .is_err());
    }

    #[test]
    fn test_unknown_account() {
        let ledger = CreditLedger::new();
        assert!(matches!(
            ledger.debit(&pro_user(), 1, None),
            Err(GateError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_pool_used_when_enabled() {
        let ledger = CreditLedger::new();
        ledger.open_personal("m1", None, 100);
        ledger.open_company_pool("acme", 8, true);

        let receipt = ledger.debit(&member(), 8, None).unwrap();
        assert_eq!(receipt.account, AccountRef::CompanyPool("acme".to_string()));
        assert_eq!(ledger.pool("acme").unwrap().balance, 0);
        assert_eq!(ledger.personal("m1").unwrap().used, 0);
    }

    #[test]
    fn test_disabled_pool_falls_back_to_personal() {
        let ledger = CreditLedger::new();
        ledger.open_personal("m1", None, 100);
        ledger.open_company_pool("acme", 8, true);
        ledger.set_pool_enabled("acme", false).unwrap();

        let receipt = ledger.debit(&member(), 20, None).unwrap();
        assert_eq!(receipt.account, AccountRef::Personal("m1".to_string()));
        assert_eq!(ledger.pool("acme").unwrap().balance, 8);
    }

    #[test]
    fn test_hydrate_overwrites_balances() {
        let ledger = CreditLedger::new();
        ledger.open_personal("m1", None, 40);
        ledger.open_company_pool("acme", 12, true);

        let stale = member().with_credits(999, 0);
        let fresh = ledger.hydrate(&stale);
        assert_eq!(fresh.credits, 40);
        assert!(fresh.company_credit_pool_enabled);
        assert_eq!(fresh.available_credits(), 12);
        assert_eq!(ledger.available_for(&stale).unwrap(), 12);
    }

    #[test]
    fn test_charge_with_zero_amount() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 5);

        let receipt = ledger.charge_with(&pro_user(), "radar", |_| Ok(0)).unwrap();
        assert!(receipt.is_none());
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_charge_with_sees_ledger_balance() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 5);

        let stale = pro_user().with_credits(1_000, 0);
        let seen = ledger
            .charge_with(&stale, "radar", |ctx| Ok(ctx.available_credits()))
            .unwrap()
            .unwrap();
        assert_eq!(seen.amount, 5);
        assert_eq!(seen.balance_after, 0);
    }

    #[test]
    fn test_grant_and_history() {
        let ledger = CreditLedger::new();
        ledger.open_company_pool("acme", 0, true);

        let pool = AccountRef::CompanyPool("acme".to_string());
        assert_eq!(ledger.grant(&pool, 50).unwrap(), 50);
        ledger.debit(&member(), 20, Some("compass")).unwrap();

        let history = ledger.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, MovementKind::Grant);
        assert_eq!(history[1].kind, MovementKind::Debit);
        assert_eq!(history[1].balance_after, 30);
        assert_eq!(history[1].feature_key.as_deref(), Some("compass"));
    }

    #[test]
    fn test_grant_overflow_refused() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 10);
        ledger.open_company_pool("acme", 10, true);

        for account in [
            AccountRef::Personal("u1".to_string()),
            AccountRef::CompanyPool("acme".to_string()),
        ] {
            assert!(matches!(
                ledger.grant(&account, i64::MAX),
                Err(GateError::InvalidAmount(i64::MAX))
            ));
        }
        assert_eq!(ledger.personal("u1").unwrap().allotment, 10);
        assert_eq!(ledger.pool("acme").unwrap().balance, 10);
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_drain_history() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", None, 30);
        ledger.debit(&pro_user(), 10, Some("radar")).unwrap();
        ledger.debit(&pro_user(), 5, Some("radar")).unwrap();

        let drained = ledger.drain_history();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].balance_after, 15);
        assert!(ledger.history().is_empty());
        assert_eq!(ledger.available_for(&pro_user()).unwrap(), 15);

        ledger.debit(&pro_user(), 1, None).unwrap();
        assert_eq!(ledger.history().len(), 1);
    }

    #[test]
    fn test_reset_period() {
        let ledger = CreditLedger::new();
        ledger.open_personal("u1", Some(IndividualTier::IndividualPro), 5);
        ledger.open_personal("u2", None, 7);
        ledger.debit(&pro_user(), 5, None).unwrap();

        let allotments = MonthlyAllotments::default();
        assert_eq!(ledger.reset_period(&allotments), 2);

        let u1 = ledger.personal("u1").unwrap();
        assert_eq!(u1.used, 0);
        assert_eq!(u1.allotment, allotments.pro);
        assert_eq!(ledger.personal("u2").unwrap().allotment, 7);
    }
}

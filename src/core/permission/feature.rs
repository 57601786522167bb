//! Feature permission rows
//!
//! One row per feature key, edited by administrators in the back office and
//! read by the evaluator. Rows declare which plans and roles may use a feature,
//! the maximum capability they get, and the credit price per invocation.

use crate::core::tier::{CompanyRole, Tier};
use crate::core::validation::FeatureKey;
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

fn default_true() -> bool {
    true
}

/// Admin-configured permission row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FeaturePermission {
    /// Unique feature identifier
    pub feature_key: FeatureKey,

    /// Grouping shown in the admin UI (e.g. "compass", "radar")
    #[validate(length(min = 1, max = 64))]
    pub feature_category: String,

    /// Display name
    #[validate(length(min = 1, max = 200))]
    pub feature_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Plans permitted to use the feature
    pub allowed_tiers: BTreeSet<Tier>,

    /// Corporate roles permitted to use the feature; `None` or empty admits
    /// every role. Individual users ignore this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_company_roles: Option<BTreeSet<CompanyRole>>,

    /// Maximum view capability
    #[serde(default = "default_true")]
    pub allow_view: bool,

    /// Maximum edit capability
    #[serde(default = "default_true")]
    pub allow_edit: bool,

    /// Credits charged per invocation
    #[serde(default)]
    pub credit_cost: u32,

    /// Inactive rows never reach the evaluator
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl FeaturePermission {
    /// Create an active row with full view/edit capability and no credit cost
    pub fn new(
        feature_key: FeatureKey,
        feature_category: impl Into<String>,
        feature_name: impl Into<String>,
        allowed_tiers: impl IntoIterator<Item = Tier>,
    ) -> Self {
        FeaturePermission {
            feature_key,
            feature_category: feature_category.into(),
            feature_name: feature_name.into(),
            description: None,
            allowed_tiers: allowed_tiers.into_iter().collect(),
            allowed_company_roles: None,
            allow_view: true,
            allow_edit: true,
            credit_cost: 0,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cost(mut self, credit_cost: u32) -> Self {
        self.credit_cost = credit_cost;
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = CompanyRole>) -> Self {
        self.allowed_company_roles = Some(roles.into_iter().collect());
        self
    }

    pub fn with_capability(mut self, allow_view: bool, allow_edit: bool) -> Self {
        self.allow_view = allow_view;
        self.allow_edit = allow_edit;
        self
    }

    /// Read-only surface: view granted, edit never
    pub fn view_only(self) -> Self {
        self.with_capability(true, false)
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn key(&self) -> &str {
        self.feature_key.as_str()
    }

    pub fn allows_tier(&self, tier: Tier) -> bool {
        self.allowed_tiers.contains(&tier)
    }

    /// Role gate for corporate users; a missing role only passes an open gate
    pub fn allows_role(&self, role: Option<CompanyRole>) -> bool {
        match &self.allowed_company_roles {
            None => true,
            Some(roles) if roles.is_empty() => true,
            Some(roles) => role.map_or(false, |r| roles.contains(&r)),
        }
    }

    /// Validate field lengths and cross-field rules
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| GateError::InvalidPermission {
            key: self.key().to_string(),
            reason: e.to_string(),
        })?;

        if self.allow_edit && !self.allow_view {
            return Err(GateError::InvalidPermission {
                key: self.key().to_string(),
                reason: "allow_edit requires allow_view".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tier::{CorporateTier, IndividualTier};

    fn radar() -> FeaturePermission {
        FeaturePermission::new(
            FeatureKey::new("radar_report").unwrap(),
            "radar",
            "Competitor report",
            [Tier::Individual(IndividualTier::IndividualPro)],
        )
    }

    #[test]
    fn test_new_defaults() {
        let row = radar();
        assert!(row.allow_view);
        assert!(row.allow_edit);
        assert!(row.is_active);
        assert_eq!(row.credit_cost, 0);
        assert!(row.check().is_ok());
    }

    #[test]
    fn test_role_gate_open_when_unset_or_empty() {
        let row = radar();
        assert!(row.allows_role(None));
        assert!(row.allows_role(Some(CompanyRole::Employee)));

        let row = radar().with_roles([]);
        assert!(row.allows_role(Some(CompanyRole::Employee)));
        assert!(row.allows_role(None));
    }

    #[test]
    fn test_role_gate_restricts() {
        let row = radar().with_roles([CompanyRole::Ceo, CompanyRole::Deputy]);
        assert!(row.allows_role(Some(CompanyRole::Ceo)));
        assert!(!row.allows_role(Some(CompanyRole::Manager)));
        assert!(!row.allows_role(None));
    }

    #[test]
    fn test_check_accepts_empty_tiers() {
        let row = FeaturePermission::new(
            FeatureKey::new("orphan").unwrap(),
            "misc",
            "Orphan",
            Vec::<Tier>::new(),
        );
        assert!(row.check().is_ok());
        for tier in Tier::all() {
            assert!(!row.allows_tier(tier));
        }
    }

    #[test]
    fn test_check_rejects_edit_without_view() {
        let row = radar().with_capability(false, true);
        assert!(row.check().is_err());
    }

    #[test]
    fn test_check_rejects_empty_name() {
        let row = FeaturePermission::new(
            FeatureKey::new("nameless").unwrap(),
            "misc",
            "",
            [Tier::Corporate(CorporateTier::CorporateExpert)],
        );
        assert!(row.check().is_err());
    }

    #[test]
    fn test_row_json_defaults() {
        let json = r#"{
            "feature_key": "compass_matrix",
            "feature_category": "compass",
            "feature_name": "Decision matrix",
            "allowed_tiers": ["corporate_decision_making"]
        }"#;
        let row: FeaturePermission = serde_json::from_str(json).unwrap();
        assert!(row.is_active);
        assert!(row.allow_view);
        assert_eq!(row.allowed_company_roles, None);
        assert!(row.allows_tier(Tier::Corporate(CorporateTier::CorporateDecisionMaking)));
    }
}

//! Subscription tiers, account kinds and company roles
//!
//! Every enum serializes as the snake_case string stored in the backend
//! (`individual_pro`, `corporate_expert`, `ceo`, ...). Unknown strings fail to
//! deserialize instead of silently never matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of account a user signs in with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// Personal account, gated by [`IndividualTier`]
    Individual,
    /// Member of a company, gated by [`CorporateTier`] and [`CompanyRole`]
    Corporate,
}

/// Plans sold to individual users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndividualTier {
    IndividualFree,
    IndividualExpert,
    IndividualPro,
    IndividualPlus,
}

impl IndividualTier {
    pub const ALL: [IndividualTier; 4] = [
        IndividualTier::IndividualFree,
        IndividualTier::IndividualExpert,
        IndividualTier::IndividualPro,
        IndividualTier::IndividualPlus,
    ];
}

/// Plans sold to companies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateTier {
    CorporateExpert,
    CorporateDecisionSupport,
    CorporateDecisionMaking,
}

impl CorporateTier {
    pub const ALL: [CorporateTier; 3] = [
        CorporateTier::CorporateExpert,
        CorporateTier::CorporateDecisionSupport,
        CorporateTier::CorporateDecisionMaking,
    ];
}

/// Union of individual and corporate plans, as listed in a permission row's
/// `allowed_tiers`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tier {
    Individual(IndividualTier),
    Corporate(CorporateTier),
}

impl Tier {
    /// Every tier, individual plans first
    pub fn all() -> impl Iterator<Item = Tier> {
        IndividualTier::ALL
            .into_iter()
            .map(Tier::Individual)
            .chain(CorporateTier::ALL.into_iter().map(Tier::Corporate))
    }

    /// Wire name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Individual(IndividualTier::IndividualFree) => "individual_free",
            Tier::Individual(IndividualTier::IndividualExpert) => "individual_expert",
            Tier::Individual(IndividualTier::IndividualPro) => "individual_pro",
            Tier::Individual(IndividualTier::IndividualPlus) => "individual_plus",
            Tier::Corporate(CorporateTier::CorporateExpert) => "corporate_expert",
            Tier::Corporate(CorporateTier::CorporateDecisionSupport) => {
                "corporate_decision_support"
            }
            Tier::Corporate(CorporateTier::CorporateDecisionMaking) => {
                "corporate_decision_making"
            }
        }
    }
}

impl From<IndividualTier> for Tier {
    fn from(tier: IndividualTier) -> Self {
        Tier::Individual(tier)
    }
}

impl From<CorporateTier> for Tier {
    fn from(tier: CorporateTier) -> Self {
        Tier::Corporate(tier)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::all()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| format!("unknown tier '{}'", s))
    }
}

/// Position inside a company, used for secondary gating of corporate users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyRole {
    Ceo,
    Deputy,
    Manager,
    Employee,
}

impl CompanyRole {
    pub const ALL: [CompanyRole; 4] = [
        CompanyRole::Ceo,
        CompanyRole::Deputy,
        CompanyRole::Manager,
        CompanyRole::Employee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyRole::Ceo => "ceo",
            CompanyRole::Deputy => "deputy",
            CompanyRole::Manager => "manager",
            CompanyRole::Employee => "employee",
        }
    }
}

impl fmt::Display for CompanyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompanyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompanyRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown company role '{}'", s))
    }
}

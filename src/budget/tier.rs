//! Subscription tiers and their spending ceilings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tier of a spending plan.
///
/// The ordering follows the size of the ceiling: `Operator` is the global
/// budget and always the largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionTier {
    Basic,
    Extended,
    Privileged,
    Operator,
}

impl SubscriptionTier {
    /// All tiers, smallest ceiling first.
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Basic,
        SubscriptionTier::Extended,
        SubscriptionTier::Privileged,
        SubscriptionTier::Operator,
    ];

    /// Stable label used in cache records and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "BASIC",
            SubscriptionTier::Extended => "EXTENDED",
            SubscriptionTier::Privileged => "PRIVILEGED",
            SubscriptionTier::Operator => "OPERATOR",
        }
    }

    fn index(self) -> usize {
        match self {
            SubscriptionTier::Basic => 0,
            SubscriptionTier::Extended => 1,
            SubscriptionTier::Privileged => 2,
            SubscriptionTier::Operator => 3,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(SubscriptionTier::Basic),
            "EXTENDED" => Ok(SubscriptionTier::Extended),
            "PRIVILEGED" => Ok(SubscriptionTier::Privileged),
            "OPERATOR" => Ok(SubscriptionTier::Operator),
            other => Err(format!("unknown subscription tier '{}'", other)),
        }
    }
}

/// Immutable table of tier ceilings in tinybars.
///
/// Built once from configuration and shared by reference. The OPERATOR
/// ceiling doubles as the global budget; a non-positive value disables
/// budgeting entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    limits: [i64; 4],
}

impl TierPolicy {
    /// Create a policy from the four tier ceilings.
    pub fn new(basic: i64, extended: i64, privileged: i64, operator: i64) -> Self {
        Self {
            limits: [basic, extended, privileged, operator],
        }
    }

    /// A policy whose global budget is zero, i.e. budgeting disabled.
    pub fn disabled() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Ceiling for `tier` in tinybars.
    pub fn limit(&self, tier: SubscriptionTier) -> i64 {
        self.limits[tier.index()]
    }

    /// Global budget (the OPERATOR ceiling).
    pub fn total_budget(&self) -> i64 {
        self.limit(SubscriptionTier::Operator)
    }

    /// Whether budgeting is active.
    pub fn is_enabled(&self) -> bool {
        self.total_budget() > 0
    }

    /// Check that OPERATOR is strictly the largest ceiling.
    ///
    /// Disabled policies are always valid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.is_enabled() {
            return Ok(());
        }
        let operator = self.total_budget();
        for tier in &SubscriptionTier::ALL[..3] {
            if self.limit(*tier) >= operator {
                return Err(format!(
                    "{} limit {} must be below the OPERATOR limit {}",
                    tier,
                    self.limit(*tier),
                    operator
                ));
            }
        }
        Ok(())
    }
}

//! Spending plans and the identities linked to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tier::SubscriptionTier;

/// A budget bucket tracking cumulative spend for one or more callers.
///
/// `amount_spent` is a snapshot read alongside the record; the authoritative
/// counter lives in its own cache key and only moves through the store's
/// atomic increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingPlan {
    pub id: String,
    pub subscription_tier: SubscriptionTier,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    #[serde(default, skip_serializing)]
    pub amount_spent: u64,
    /// Expiry applied to the record, refreshed on every reset. `None` for
    /// pre-provisioned plans that never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl SpendingPlan {
    pub(crate) fn new(id: String, subscription_tier: SubscriptionTier, ttl_ms: Option<u64>) -> Self {
        Self {
            id,
            subscription_tier,
            created_at: Utc::now(),
            active: true,
            amount_spent: 0,
            ttl_ms,
        }
    }
}

/// One debit appended to a plan's spending history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingRecord {
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

impl SpendingRecord {
    pub fn new(amount: u64) -> Self {
        Self {
            amount,
            timestamp: Utc::now(),
        }
    }
}

/// Which kind of caller identity an association is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    EvmAddress,
    IpAddress,
}

impl IdentityKind {
    pub(crate) fn collection_key(&self) -> &'static str {
        match self {
            IdentityKind::EvmAddress => "evmAddressHbarSpendingPlan",
            IdentityKind::IpAddress => "ipAddressHbarSpendingPlan",
        }
    }

    /// Normalise an identity for use as a key.
    pub fn normalize(&self, identity: &str) -> String {
        match self {
            IdentityKind::EvmAddress => identity.trim().to_lowercase(),
            IdentityKind::IpAddress => identity.trim().to_string(),
        }
    }
}

/// Link between a caller identity and a spending plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityAssociation {
    pub identity: String,
    pub kind: IdentityKind,
    pub plan_id: String,
}

/// Identity of the caller on whose behalf an operation runs.
///
/// The EVM address takes precedence; the IP address is the fallback for
/// requests that carry no signer (e.g. plain reads).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub evm_address: Option<String>,
    pub ip_address: Option<String>,
}

impl CallerIdentity {
    /// Identity known only by EVM address.
    pub fn evm(address: impl Into<String>) -> Self {
        Self::new(Some(address.into()), None)
    }

    /// Identity known only by IP address.
    pub fn ip(address: impl Into<String>) -> Self {
        Self::new(None, Some(address.into()))
    }

    /// Identity with both an EVM and an IP address.
    pub fn new(evm_address: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            evm_address: evm_address.filter(|a| !a.trim().is_empty()),
            ip_address: ip_address.filter(|a| !a.trim().is_empty()),
        }
    }

    /// Candidate lookups in precedence order.
    pub fn lookups(&self) -> Vec<(IdentityKind, &str)> {
        let mut lookups = Vec::with_capacity(2);
        if let Some(evm) = self.evm_address.as_deref() {
            lookups.push((IdentityKind::EvmAddress, evm));
        }
        if let Some(ip) = self.ip_address.as_deref() {
            lookups.push((IdentityKind::IpAddress, ip));
        }
        lookups
    }

    /// The identity a new plan is linked to: EVM if present, else IP.
    pub fn primary(&self) -> Option<(IdentityKind, &str)> {
        self.lookups().into_iter().next()
    }

    /// Whether no identity is known at all.
    pub fn is_anonymous(&self) -> bool {
        self.evm_address.is_none() && self.ip_address.is_none()
    }
}

//! Pre-provisioned spending plans loaded from a JSON file.
//!
//! The file holds an array of plans with fixed ids and the addresses that
//! belong to them:
//!
//! ```json
//! [
//!   {
//!     "id": "c758c095-342c-4607-9db5-867d7e90ab9d",
//!     "name": "partner",
//!     "evmAddresses": ["0x7d102fe71af42790fe31b126c1f49766376ca2b5"],
//!     "ipAddresses": ["127.0.0.1"],
//!     "subscriptionTier": "EXTENDED"
//!   }
//! ]
//! ```
//!
//! Syncing makes the store match the file: plans removed from the file are
//! deleted, new ones created without expiry, and every listed address is
//! linked to its configured plan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, trace};

use super::controller::OPERATOR_PLAN_ID;
use super::plan::IdentityKind;
use super::store::{SpendingPlanStore, StoreError};
use super::tier::SubscriptionTier;

/// Tiers managed by the configuration file.
const MANAGED_TIERS: [SubscriptionTier; 2] = [SubscriptionTier::Extended, SubscriptionTier::Privileged];

/// Errors raised while loading or applying the plan file.
#[derive(Error, Debug)]
pub enum PreconfiguredError {
    #[error("Configuration file not found at path \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid spending plan configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One entry of the plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingPlanConfig {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "ethAddresses")]
    pub evm_addresses: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub subscription_tier: SubscriptionTier,
}

impl SpendingPlanConfig {
    /// Check the entry is usable.
    pub fn validate(&self) -> Result<(), PreconfiguredError> {
        let invalid = |reason: &str| Err(PreconfiguredError::Invalid(format!("plan '{}': {}", self.id, reason)));
        if self.id.trim().is_empty() {
            return invalid("id must not be empty");
        }
        if self.name.trim().is_empty() {
            return invalid("name must not be empty");
        }
        if self.id == OPERATOR_PLAN_ID {
            return invalid("id is reserved for the operator plan");
        }
        if self.subscription_tier == SubscriptionTier::Operator {
            return invalid("OPERATOR plans cannot be pre-provisioned");
        }
        if self.evm_addresses.is_empty() && self.ip_addresses.is_empty() {
            return invalid("at least one EVM or IP address is required");
        }
        Ok(())
    }

    /// Normalized addresses of `kind` listed for this plan.
    pub fn addresses(&self, kind: IdentityKind) -> Vec<String> {
        let raw = match kind {
            IdentityKind::EvmAddress => &self.evm_addresses,
            IdentityKind::IpAddress => &self.ip_addresses,
        };
        raw.iter().map(|address| kind.normalize(address)).collect()
    }
}

/// Parse and validate plan entries from JSON text.
pub fn parse_spending_plans(json: &str) -> Result<Vec<SpendingPlanConfig>, PreconfiguredError> {
    let plans: Vec<SpendingPlanConfig> = serde_json::from_str(json).map_err(|source| PreconfiguredError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;
    validate_all(&plans)?;
    Ok(plans)
}

/// Read, parse and validate the plan file at `path`.
pub fn load_spending_plans(path: &Path) -> Result<Vec<SpendingPlanConfig>, PreconfiguredError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PreconfiguredError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let plans: Vec<SpendingPlanConfig> = serde_json::from_str(&raw).map_err(|source| PreconfiguredError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_all(&plans)?;
    Ok(plans)
}

fn validate_all(plans: &[SpendingPlanConfig]) -> Result<(), PreconfiguredError> {
    let mut seen = HashSet::new();
    for plan in plans {
        plan.validate()?;
        if !seen.insert(plan.id.as_str()) {
            return Err(PreconfiguredError::Invalid(format!("duplicate plan id '{}'", plan.id)));
        }
    }
    Ok(())
}

/// What a sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub plans_deleted: usize,
    pub plans_created: usize,
    pub associations_added: usize,
    pub associations_removed: usize,
}

/// Applies a plan file to the store.
pub struct PreconfiguredPlans {
    store: SpendingPlanStore,
}

impl PreconfiguredPlans {
    pub fn new(store: SpendingPlanStore) -> Self {
        Self { store }
    }

    /// Load `path` and sync the store with it.
    pub async fn sync_from_file(&self, path: &Path) -> Result<SyncReport, PreconfiguredError> {
        let plans = load_spending_plans(path)?;
        self.sync(&plans).await
    }

    /// Make the store's managed plans and their links match `plans`.
    pub async fn sync(&self, plans: &[SpendingPlanConfig]) -> Result<SyncReport, PreconfiguredError> {
        validate_all(plans)?;
        let mut report = SyncReport::default();
        let existing = self.store.find_all_active_by_tier(&MANAGED_TIERS).await?;

        for plan in existing.iter().filter(|p| !plans.iter().any(|c| c.id == p.id)) {
            info!(plan_id = %plan.id, "Deleting HBAR spending plan no longer in the spending plan configuration");
            self.store.delete(&plan.id).await?;
            for kind in [IdentityKind::EvmAddress, IdentityKind::IpAddress] {
                report.associations_removed += self.store.delete_associations_by_plan(&plan.id, kind).await?;
            }
            report.plans_deleted += 1;
        }

        for config in plans.iter().filter(|c| !existing.iter().any(|p| p.id == c.id)) {
            self.store
                .create_with_id(config.id.clone(), config.subscription_tier, None)
                .await?;
            info!(
                plan_id = %config.id,
                name = %config.name,
                tier = %config.subscription_tier,
                "Created HBAR spending plan"
            );
            report.plans_created += 1;
        }

        for config in plans {
            trace!(plan_id = %config.id, name = %config.name, "Updating associations for HBAR spending plan");
            for kind in [IdentityKind::EvmAddress, IdentityKind::IpAddress] {
                self.sync_associations(config, kind, &mut report).await?;
            }
        }

        Ok(report)
    }

    async fn sync_associations(
        &self,
        config: &SpendingPlanConfig,
        kind: IdentityKind,
        report: &mut SyncReport,
    ) -> Result<(), PreconfiguredError> {
        let wanted = config.addresses(kind);

        // Listed addresses linked to some other plan are taken over.
        for address in &wanted {
            if let Some(plan_id) = self.store.find_association(address, kind).await? {
                if plan_id != config.id {
                    info!(name = %config.name, %plan_id, "Deleting association with another HBAR spending plan");
                    self.store.delete_association(address, kind).await?;
                    report.associations_removed += 1;
                }
            }
        }

        let current: Vec<String> = self
            .store
            .find_associations_by_plan(&config.id, kind)
            .await?
            .into_iter()
            .map(|association| association.identity)
            .collect();

        for address in current.iter().filter(|a| !wanted.contains(a)) {
            self.store.delete_association(address, kind).await?;
            info!(name = %config.name, "Removed association with HBAR spending plan");
            report.associations_removed += 1;
        }

        for address in wanted.iter().filter(|a| !current.contains(a)) {
            if self
                .store
                .save_association_if_absent(address, &config.id, kind, None)
                .await?
            {
                info!(name = %config.name, "Associated HBAR spending plan with address");
                report.associations_added += 1;
            } else {
                trace!(name = %config.name, "Skipping address already associated with an HBAR spending plan");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use std::io::Write;
    use std::sync::Arc;

    fn store() -> SpendingPlanStore {
        SpendingPlanStore::new(Arc::new(LocalCache::new()))
    }

    fn plan(id: &str, tier: SubscriptionTier, evm: &[&str], ip: &[&str]) -> SpendingPlanConfig {
        SpendingPlanConfig {
            id: id.to_string(),
            name: format!("{}-name", id),
            evm_addresses: evm.iter().map(|s| s.to_string()).collect(),
            ip_addresses: ip.iter().map(|s| s.to_string()).collect(),
            subscription_tier: tier,
        }
    }

    #[test]
    fn test_parse_accepts_eth_addresses_alias() {
        let plans = parse_spending_plans(
            r#"[{"id":"p1","name":"one","ethAddresses":["0xAA"],"subscriptionTier":"EXTENDED"}]"#,
        )
        .unwrap();
        assert_eq!(plans[0].evm_addresses, vec!["0xAA".to_string()]);
        assert!(plans[0].ip_addresses.is_empty());
    }

    #[test]
    fn test_validation_rules() {
        assert!(plan("p", SubscriptionTier::Extended, &["0x1"], &[]).validate().is_ok());
        assert!(plan("", SubscriptionTier::Extended, &["0x1"], &[]).validate().is_err());
        assert!(plan("p", SubscriptionTier::Operator, &["0x1"], &[]).validate().is_err());
        assert!(plan("p", SubscriptionTier::Privileged, &[], &[]).validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse_spending_plans(
            r#"[
                {"id":"p1","name":"a","ipAddresses":["1.1.1.1"],"subscriptionTier":"EXTENDED"},
                {"id":"p1","name":"b","ipAddresses":["2.2.2.2"],"subscriptionTier":"EXTENDED"}
            ]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_spending_plans(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, PreconfiguredError::Io { .. }));
    }

    #[tokio::test]
    async fn test_sync_from_file_creates_plans_and_links() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"partner","name":"Partner","evmAddresses":["0xABC"],"ipAddresses":["10.0.0.1"],"subscriptionTier":"PRIVILEGED"}}]"#
        )
        .unwrap();

        let store = store();
        let report = PreconfiguredPlans::new(store.clone())
            .sync_from_file(file.path())
            .await
            .unwrap();
        assert_eq!(report.plans_created, 1);
        assert_eq!(report.associations_added, 2);

        let plan = store.find_by_id("partner").await.unwrap().unwrap();
        assert_eq!(plan.subscription_tier, SubscriptionTier::Privileged);
        assert!(plan.ttl_ms.is_none());
        assert_eq!(
            store.find_association("0xabc", IdentityKind::EvmAddress).await.unwrap(),
            Some("partner".to_string())
        );
    }

    #[tokio::test]
    async fn test_resync_removes_obsolete_plans_and_links() {
        let store = store();
        let sync = PreconfiguredPlans::new(store.clone());
        sync.sync(&[
            plan("keep", SubscriptionTier::Extended, &["0x1", "0x2"], &[]),
            plan("drop", SubscriptionTier::Extended, &["0x3"], &["9.9.9.9"]),
        ])
        .await
        .unwrap();

        let report = sync
            .sync(&[plan("keep", SubscriptionTier::Extended, &["0x1"], &[])])
            .await
            .unwrap();
        assert_eq!(report.plans_deleted, 1);
        assert_eq!(report.plans_created, 0);
        assert_eq!(report.associations_removed, 3);

        assert!(store.find_by_id("drop").await.unwrap().is_none());
        assert!(store
            .find_association("0x2", IdentityKind::EvmAddress)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_association("9.9.9.9", IdentityKind::IpAddress)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_configured_address_takes_over_lazy_plan() {
        let store = store();
        let lazy = store.create(SubscriptionTier::Basic, None).await.unwrap();
        store
            .save_association("0xvip", &lazy.id, IdentityKind::EvmAddress, None)
            .await
            .unwrap();

        PreconfiguredPlans::new(store.clone())
            .sync(&[plan("vip", SubscriptionTier::Privileged, &["0xVIP"], &[])])
            .await
            .unwrap();

        assert_eq!(
            store.find_association("0xvip", IdentityKind::EvmAddress).await.unwrap(),
            Some("vip".to_string())
        );
    }

    #[tokio::test]
    async fn test_basic_plans_are_not_touched() {
        let store = store();
        let lazy = store.create(SubscriptionTier::Basic, None).await.unwrap();
        PreconfiguredPlans::new(store.clone()).sync(&[]).await.unwrap();
        assert!(store.find_by_id(&lazy.id).await.unwrap().is_some());
    }
}

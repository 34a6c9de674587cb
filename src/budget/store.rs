//! Cache-backed persistence for spending plans and identity associations.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use super::plan::{IdentityAssociation, IdentityKind, SpendingPlan, SpendingRecord};
use super::tier::SubscriptionTier;
use crate::cache::{CacheError, CacheStore, MAX_INCREMENT_CONFLICTS};

const PLAN_COLLECTION_KEY: &str = "hbarSpendingPlan";
const AMOUNT_SPENT_SUFFIX: &str = ":amountSpent";
const SPENDING_HISTORY_SUFFIX: &str = ":spendingHistory";

/// Errors raised by [`SpendingPlanStore`] mutations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No plan is stored under this id.
    #[error("HbarSpendingPlan with ID {0} not found")]
    PlanNotFound(String),

    /// The plan exists but has been deactivated.
    #[error("HbarSpendingPlan with ID {0} is not active")]
    PlanNotActive(String),

    /// The underlying cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Cache(CacheError::Json(err))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD over spending plans and their identity links.
///
/// Lookups of unknown ids or identities return `Ok(None)`; that is the
/// normal signal for lazy provisioning, not a failure.
#[derive(Clone)]
pub struct SpendingPlanStore {
    cache: Arc<dyn CacheStore>,
}

impl SpendingPlanStore {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Create a plan with a freshly generated id and zero spend.
    pub async fn create(&self, tier: SubscriptionTier, ttl: Option<Duration>) -> StoreResult<SpendingPlan> {
        self.create_with_id(uuid::Uuid::new_v4().to_string(), tier, ttl)
            .await
    }

    /// Create (or overwrite) a plan under a caller-chosen id.
    pub async fn create_with_id(
        &self,
        id: impl Into<String>,
        tier: SubscriptionTier,
        ttl: Option<Duration>,
    ) -> StoreResult<SpendingPlan> {
        let plan = SpendingPlan::new(id.into(), tier, ttl.map(|ttl| ttl.as_millis() as u64));
        trace!(plan_id = %plan.id, tier = %tier, "Creating HbarSpendingPlan");
        self.cache
            .set(&plan_key(&plan.id), serde_json::to_value(&plan)?, ttl)
            .await?;
        Ok(plan)
    }

    /// Fetch a plan with its current amount spent.
    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<SpendingPlan>> {
        let Some(mut plan) = self.find_record(id).await? else {
            return Ok(None);
        };
        plan.amount_spent = self.read_amount_spent(id).await?;
        trace!(plan_id = %id, amount_spent = plan.amount_spent, "Retrieved HbarSpendingPlan");
        Ok(Some(plan))
    }

    /// Current amount spent by an existing, active plan.
    pub async fn amount_spent(&self, id: &str) -> StoreResult<u64> {
        self.require_active(id).await?;
        self.read_amount_spent(id).await
    }

    /// Atomically add `delta` tinybars to a plan's spend and return the new total.
    pub async fn add_to_amount_spent(&self, id: &str, delta: u64) -> StoreResult<u64> {
        let plan = self.require_active(id).await?;
        let ttl = plan.ttl_ms.map(Duration::from_millis);
        let total = self
            .cache
            .increment(&amount_spent_key(id), delta as i64, ttl)
            .await?;
        trace!(plan_id = %id, delta, total, "Added to amountSpent");
        Ok(total.max(0) as u64)
    }

    /// Debits recorded against an active plan, oldest first.
    ///
    /// The history survives resets; it is only removed with the plan.
    pub async fn spending_history(&self, id: &str) -> StoreResult<Vec<SpendingRecord>> {
        self.require_active(id).await?;
        trace!(plan_id = %id, "Retrieving spending history");
        match self.cache.get(&spending_history_key(id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Append `amount` to a plan's spending history and return its new length.
    pub async fn add_to_spending_history(&self, id: &str, amount: u64) -> StoreResult<usize> {
        let plan = self.require_active(id).await?;
        let ttl = plan.ttl_ms.map(Duration::from_millis);
        let key = spending_history_key(id);
        let entry = serde_json::to_value(SpendingRecord::new(amount))?;

        for _ in 0..MAX_INCREMENT_CONFLICTS {
            let current = self.cache.get(&key).await?;
            let mut history: Vec<Value> = match &current {
                Some(value) => serde_json::from_value(value.clone())?,
                None => Vec::new(),
            };
            history.push(entry.clone());
            let length = history.len();
            let swap_ttl = if current.is_none() { ttl } else { None };
            if self
                .cache
                .compare_and_set(&key, current.as_ref(), Value::Array(history), swap_ttl)
                .await?
            {
                trace!(plan_id = %id, amount, length, "Added to spending history");
                return Ok(length);
            }
        }
        Err(StoreError::Cache(CacheError::Contention(key)))
    }

    /// Zero the spend of every plan and refresh the expiry of plans that have one.
    ///
    /// Not atomic across plans: an increment racing with the reset may land
    /// on either side of it. Returns the number of counters cleared.
    pub async fn reset_all_amount_spent(&self) -> StoreResult<usize> {
        trace!("Resetting the amountSpent entries for all HbarSpendingPlans");
        let counters = self
            .cache
            .keys(&format!("{}:*{}", PLAN_COLLECTION_KEY, AMOUNT_SPENT_SUFFIX))
            .await?;
        try_join_all(counters.iter().map(|key| self.cache.delete(key))).await?;

        for plan in self.all_plan_records().await? {
            if let Some(ttl_ms) = plan.ttl_ms {
                self.cache
                    .set(
                        &plan_key(&plan.id),
                        serde_json::to_value(&plan)?,
                        Some(Duration::from_millis(ttl_ms)),
                    )
                    .await?;
            }
        }

        trace!(cleared = counters.len(), "Reset amountSpent entries");
        Ok(counters.len())
    }

    /// All active plans whose tier is one of `tiers`, with their current spend.
    pub async fn find_all_active_by_tier(&self, tiers: &[SubscriptionTier]) -> StoreResult<Vec<SpendingPlan>> {
        let mut plans = Vec::new();
        for mut plan in self.all_plan_records().await? {
            if plan.active && tiers.contains(&plan.subscription_tier) {
                plan.amount_spent = self.read_amount_spent(&plan.id).await?;
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    /// Remove a plan with its spend counter and history. Associations are left untouched.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        trace!(plan_id = %id, "Deleting HbarSpendingPlan");
        self.cache.delete(&plan_key(id)).await?;
        self.cache.delete(&amount_spent_key(id)).await?;
        self.cache.delete(&spending_history_key(id)).await?;
        Ok(())
    }

    /// Plan id linked to `identity`, if any.
    pub async fn find_association(&self, identity: &str, kind: IdentityKind) -> StoreResult<Option<String>> {
        let key = association_key(identity, kind);
        let Some(value) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let association: IdentityAssociation = serde_json::from_value(value)?;
        trace!(identity = %association.identity, plan_id = %association.plan_id, "Retrieved association");
        Ok(Some(association.plan_id))
    }

    /// Link `identity` to `plan_id`, replacing any previous link.
    pub async fn save_association(
        &self,
        identity: &str,
        plan_id: &str,
        kind: IdentityKind,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let association = build_association(identity, plan_id, kind);
        self.cache
            .set(
                &association_key(identity, kind),
                serde_json::to_value(&association)?,
                ttl,
            )
            .await?;
        trace!(identity = %association.identity, plan_id = %plan_id, "Linked identity to HbarSpendingPlan");
        Ok(())
    }

    /// Link `identity` to `plan_id` only if it has no link yet.
    ///
    /// Returns `false` when another writer linked it first.
    pub async fn save_association_if_absent(
        &self,
        identity: &str,
        plan_id: &str,
        kind: IdentityKind,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let association = build_association(identity, plan_id, kind);
        let stored = self
            .cache
            .set_if_absent(
                &association_key(identity, kind),
                serde_json::to_value(&association)?,
                ttl,
            )
            .await?;
        Ok(stored)
    }

    /// Unlink `identity`. Returns whether a link existed.
    pub async fn delete_association(&self, identity: &str, kind: IdentityKind) -> StoreResult<bool> {
        let removed = self.cache.delete(&association_key(identity, kind)).await?;
        trace!(identity = %kind.normalize(identity), removed, "Removed association");
        Ok(removed)
    }

    /// Every identity of `kind` linked to `plan_id`.
    pub async fn find_associations_by_plan(
        &self,
        plan_id: &str,
        kind: IdentityKind,
    ) -> StoreResult<Vec<IdentityAssociation>> {
        let keys = self
            .cache
            .keys(&format!("{}:*", kind.collection_key()))
            .await?;
        let mut associations = Vec::new();
        for key in keys {
            if let Some(value) = self.cache.get(&key).await? {
                let association: IdentityAssociation = serde_json::from_value(value)?;
                if association.plan_id == plan_id {
                    associations.push(association);
                }
            }
        }
        Ok(associations)
    }

    /// Unlink every identity of `kind` from `plan_id`.
    pub async fn delete_associations_by_plan(&self, plan_id: &str, kind: IdentityKind) -> StoreResult<usize> {
        let associations = self.find_associations_by_plan(plan_id, kind).await?;
        for association in &associations {
            self.delete_association(&association.identity, kind).await?;
        }
        Ok(associations.len())
    }

    async fn find_record(&self, id: &str) -> StoreResult<Option<SpendingPlan>> {
        match self.cache.get(&plan_key(id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn require_active(&self, id: &str) -> StoreResult<SpendingPlan> {
        let plan = self
            .find_record(id)
            .await?
            .ok_or_else(|| StoreError::PlanNotFound(id.to_string()))?;
        if !plan.active {
            return Err(StoreError::PlanNotActive(id.to_string()));
        }
        Ok(plan)
    }

    async fn read_amount_spent(&self, id: &str) -> StoreResult<u64> {
        let value = self.cache.get(&amount_spent_key(id)).await?;
        Ok(value.as_ref().and_then(Value::as_i64).unwrap_or(0).max(0) as u64)
    }

    async fn all_plan_records(&self) -> StoreResult<Vec<SpendingPlan>> {
        let keys = self
            .cache
            .keys(&format!("{}:*", PLAN_COLLECTION_KEY))
            .await?;
        let mut plans = Vec::new();
        let records = keys
            .iter()
            .filter(|k| !k.ends_with(AMOUNT_SPENT_SUFFIX) && !k.ends_with(SPENDING_HISTORY_SUFFIX));
        for key in records {
            if let Some(value) = self.cache.get(key).await? {
                plans.push(serde_json::from_value(value)?);
            }
        }
        Ok(plans)
    }
}

fn plan_key(id: &str) -> String {
    format!("{}:{}", PLAN_COLLECTION_KEY, id)
}

fn amount_spent_key(id: &str) -> String {
    format!("{}:{}{}", PLAN_COLLECTION_KEY, id, AMOUNT_SPENT_SUFFIX)
}

fn spending_history_key(id: &str) -> String {
    format!("{}:{}{}", PLAN_COLLECTION_KEY, id, SPENDING_HISTORY_SUFFIX)
}

fn association_key(identity: &str, kind: IdentityKind) -> String {
    format!("{}:{}", kind.collection_key(), kind.normalize(identity))
}

fn build_association(identity: &str, plan_id: &str, kind: IdentityKind) -> IdentityAssociation {
    IdentityAssociation {
        identity: kind.normalize(identity),
        kind,
        plan_id: plan_id.to_string(),
    }
}

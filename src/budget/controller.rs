//! Admission control against the global and per-plan HBAR budgets.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use super::plan::{CallerIdentity, IdentityKind, SpendingPlan};
use super::schedule::ResetSchedule;
use super::store::{SpendingPlanStore, StoreResult};
use super::tier::{SubscriptionTier, TierPolicy};
use crate::metrics;

/// Plan id used for the global budget when no operator address is configured.
pub const OPERATOR_PLAN_ID: &str = "operator";

/// Kind of network interaction an expense or admission check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    Transaction,
    Query,
    Record,
}

impl ExecutionMode {
    /// Metric label for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Transaction => "TRANSACTION",
            ExecutionMode::Query => "QUERY",
            ExecutionMode::Record => "RECORD",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an operation may spend operator funds and records what
/// was spent.
///
/// All spend updates go through the store's atomic increment; the only
/// in-process shared state is the reset timestamp and the per-tier
/// unique-plan counters, both of which tolerate races at the reset boundary.
pub struct BudgetController {
    policy: TierPolicy,
    store: SpendingPlanStore,
    schedule: ResetSchedule,
    plan_ttl: Duration,
    operator_address: Option<String>,
    unique_plans: [AtomicU64; 4],
}

impl BudgetController {
    /// Create a controller resetting every `limit_duration`, starting today.
    pub fn new(policy: TierPolicy, store: SpendingPlanStore, limit_duration: Duration) -> Self {
        if let Err(reason) = policy.validate() {
            warn!(%reason, "Inconsistent HBAR tier limits");
        }
        metrics::set_budget_total(policy.total_budget());
        metrics::set_budget_remaining(policy.total_budget());

        Self {
            policy,
            store,
            schedule: ResetSchedule::new(Utc::now(), to_chrono(limit_duration)),
            plan_ttl: limit_duration,
            operator_address: None,
            unique_plans: Default::default(),
        }
    }

    /// Key the operator plan by this EVM address instead of a fixed id.
    pub fn with_operator_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.operator_address = (!address.trim().is_empty()).then_some(address);
        self
    }

    /// Anchor the reset schedule at midnight of `start`'s day.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.schedule = ResetSchedule::new(start, to_chrono(self.plan_ttl));
        self
    }

    /// Whether budgeting is active at all.
    pub fn is_enabled(&self) -> bool {
        self.policy.is_enabled()
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn store(&self) -> &SpendingPlanStore {
        &self.store
    }

    /// When the next reset is scheduled.
    pub fn next_reset(&self) -> DateTime<Utc> {
        self.schedule.next_reset()
    }

    /// Plans of `tier` charged at least once since the last reset.
    pub fn unique_active_plans(&self, tier: SubscriptionTier) -> u64 {
        self.unique_plans[tier_slot(tier)].load(Ordering::Relaxed)
    }

    /// Decide whether an operation costing `estimated_cost` must be rejected.
    pub async fn should_limit(
        &self,
        mode: ExecutionMode,
        method: &str,
        identity: &CallerIdentity,
        estimated_cost: u64,
    ) -> StoreResult<bool> {
        self.should_limit_at(mode, method, identity, estimated_cost, Utc::now())
            .await
    }

    /// [`should_limit`](Self::should_limit) evaluated at an explicit instant.
    ///
    /// Performs no mutation besides a due reset and lazy provisioning of the
    /// caller's plan. The operator plan is only created by the first expense.
    pub async fn should_limit_at(
        &self,
        mode: ExecutionMode,
        method: &str,
        identity: &CallerIdentity,
        estimated_cost: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.reset_if_due(now).await?;

        let cost = i64::try_from(estimated_cost).unwrap_or(i64::MAX);
        let remaining = self.remaining_budget().await?;
        metrics::set_budget_remaining(remaining);
        if remaining <= 0 || remaining < cost {
            warn!(
                %mode,
                method,
                remaining,
                estimated_cost,
                "HBAR rate limit incoming call: total budget exhausted"
            );
            metrics::record_rate_limit_rejection(mode.as_str(), method);
            return Ok(true);
        }

        let Some(plan) = self.resolve_plan(identity).await? else {
            return Ok(false);
        };
        let limit = self.policy.limit(plan.subscription_tier);
        let spent = i64::try_from(plan.amount_spent).unwrap_or(i64::MAX);
        if spent >= limit || spent.saturating_add(cost) > limit {
            debug!(
                plan_id = %plan.id,
                tier = %plan.subscription_tier,
                spent,
                limit,
                estimated_cost,
                %mode,
                method,
                "HBAR rate limit incoming call: plan budget exhausted"
            );
            return Ok(true);
        }

        trace!(plan_id = %plan.id, spent, limit, remaining, method, "HBAR budget admits call");
        Ok(false)
    }

    /// Debit `cost` from the global budget and from the caller's plan.
    pub async fn add_expense(&self, cost: u64, identity: &CallerIdentity) -> StoreResult<()> {
        self.add_expense_at(cost, identity, Utc::now()).await
    }

    /// [`add_expense`](Self::add_expense) evaluated at an explicit instant.
    pub async fn add_expense_at(&self, cost: u64, identity: &CallerIdentity, now: DateTime<Utc>) -> StoreResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.reset_if_due(now).await?;

        let operator = self.operator_plan().await?;
        let operator_spent = self.store.add_to_amount_spent(&operator.id, cost).await?;
        metrics::set_budget_remaining(self.remaining_after(operator_spent));

        let Some(plan) = self.resolve_plan(identity).await? else {
            warn!(cost, "Expense without caller identity charged to the operator budget only");
            return Ok(());
        };
        if plan.amount_spent == 0 {
            let slot = &self.unique_plans[tier_slot(plan.subscription_tier)];
            let count = slot.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::set_unique_spending_plans(plan.subscription_tier.as_str(), count);
        }
        let spent = self.store.add_to_amount_spent(&plan.id, cost).await?;
        self.store.add_to_spending_history(&plan.id, cost).await?;
        trace!(plan_id = %plan.id, cost, spent, operator_spent, "Added HBAR expense");
        Ok(())
    }

    /// Zero every plan's spend and move the schedule past now.
    pub async fn reset_limiter(&self) -> StoreResult<()> {
        self.reset_limiter_at(Utc::now()).await
    }

    /// [`reset_limiter`](Self::reset_limiter) evaluated at an explicit instant.
    pub async fn reset_limiter_at(&self, now: DateTime<Utc>) -> StoreResult<()> {
        self.schedule.advance(now);
        self.reset_state().await
    }

    /// Tinybars left in the global budget.
    ///
    /// Reads the operator plan without creating it; a missing plan has spent
    /// nothing.
    pub async fn remaining_budget(&self) -> StoreResult<i64> {
        let operator = match &self.operator_address {
            Some(address) => self.find_active_plan(IdentityKind::EvmAddress, address).await?,
            None => self.store.find_by_id(OPERATOR_PLAN_ID).await?,
        };
        let spent = operator.map_or(0, |plan| plan.amount_spent);
        Ok(self.remaining_after(spent))
    }

    fn remaining_after(&self, operator_spent: u64) -> i64 {
        let spent = i64::try_from(operator_spent).unwrap_or(i64::MAX);
        self.policy.total_budget().saturating_sub(spent)
    }

    /// Recompute the average spend of active plans per non-operator tier.
    pub async fn update_average_spend_gauges(&self) -> StoreResult<HashMap<SubscriptionTier, f64>> {
        let mut averages = HashMap::new();
        for tier in &SubscriptionTier::ALL[..3] {
            let plans = self.store.find_all_active_by_tier(&[*tier]).await?;
            let average = if plans.is_empty() {
                0.0
            } else {
                plans.iter().map(|p| p.amount_spent as f64).sum::<f64>() / plans.len() as f64
            };
            metrics::set_average_amount_spent(tier.as_str(), average);
            averages.insert(*tier, average);
        }
        Ok(averages)
    }

    async fn reset_if_due(&self, now: DateTime<Utc>) -> StoreResult<()> {
        if self.schedule.advance(now) {
            info!(next_reset = %self.schedule.next_reset(), "HBAR budget period elapsed, resetting spend");
            self.reset_state().await?;
        }
        Ok(())
    }

    async fn reset_state(&self) -> StoreResult<()> {
        self.store.reset_all_amount_spent().await?;
        for tier in SubscriptionTier::ALL {
            self.unique_plans[tier_slot(tier)].store(0, Ordering::Relaxed);
            metrics::set_unique_spending_plans(tier.as_str(), 0);
        }
        metrics::set_budget_remaining(self.policy.total_budget());
        Ok(())
    }

    async fn operator_plan(&self) -> StoreResult<SpendingPlan> {
        if let Some(address) = &self.operator_address {
            return self
                .resolve_or_provision(IdentityKind::EvmAddress, address, SubscriptionTier::Operator)
                .await;
        }
        if let Some(plan) = self.store.find_by_id(OPERATOR_PLAN_ID).await? {
            return Ok(plan);
        }
        debug!("Creating operator HbarSpendingPlan");
        self.store
            .create_with_id(OPERATOR_PLAN_ID, SubscriptionTier::Operator, Some(self.plan_ttl))
            .await
    }

    /// Find the caller's active plan, preferring the EVM association, and
    /// provision a BASIC one if neither identity has a live plan.
    async fn resolve_plan(&self, identity: &CallerIdentity) -> StoreResult<Option<SpendingPlan>> {
        for (kind, value) in identity.lookups() {
            if let Some(plan) = self.find_active_plan(kind, value).await? {
                return Ok(Some(plan));
            }
        }
        match identity.primary() {
            Some((kind, value)) => Ok(Some(self.provision(kind, value, SubscriptionTier::Basic).await?)),
            None => Ok(None),
        }
    }

    async fn resolve_or_provision(
        &self,
        kind: IdentityKind,
        identity: &str,
        tier: SubscriptionTier,
    ) -> StoreResult<SpendingPlan> {
        match self.find_active_plan(kind, identity).await? {
            Some(plan) => Ok(plan),
            None => self.provision(kind, identity, tier).await,
        }
    }

    async fn find_active_plan(&self, kind: IdentityKind, identity: &str) -> StoreResult<Option<SpendingPlan>> {
        let Some(plan_id) = self.store.find_association(identity, kind).await? else {
            return Ok(None);
        };
        match self.store.find_by_id(&plan_id).await? {
            Some(plan) if plan.active => Ok(Some(plan)),
            _ => {
                debug!(%plan_id, "Association points at a missing or inactive HbarSpendingPlan");
                Ok(None)
            }
        }
    }

    /// Create a plan for `identity` and link it.
    ///
    /// When a concurrent caller linked the identity first, its plan wins and
    /// the one created here is discarded.
    async fn provision(&self, kind: IdentityKind, identity: &str, tier: SubscriptionTier) -> StoreResult<SpendingPlan> {
        let ttl = Some(self.plan_ttl);
        let plan = self.store.create(tier, ttl).await?;
        if self
            .store
            .save_association_if_absent(identity, &plan.id, kind, ttl)
            .await?
        {
            debug!(plan_id = %plan.id, tier = %tier, "Provisioned HbarSpendingPlan");
            return Ok(plan);
        }

        if let Some(existing) = self.find_active_plan(kind, identity).await? {
            self.store.delete(&plan.id).await?;
            return Ok(existing);
        }

        // The existing link is stale; take it over.
        self.store
            .save_association(identity, &plan.id, kind, ttl)
            .await?;
        debug!(plan_id = %plan.id, tier = %tier, "Re-provisioned HbarSpendingPlan");
        Ok(plan)
    }
}

fn tier_slot(tier: SubscriptionTier) -> usize {
    match tier {
        SubscriptionTier::Basic => 0,
        SubscriptionTier::Extended => 1,
        SubscriptionTier::Privileged => 2,
        SubscriptionTier::Operator => 3,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1))
}

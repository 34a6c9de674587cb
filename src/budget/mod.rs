//! HBAR budget management for the relay.
//!
//! Operator funds are spent on behalf of callers whenever the relay pays for
//! a query or submits a transaction. This module decides whether such an
//! operation may proceed and keeps per-caller and global spend totals.
//!
//! # Overview
//!
//! - **TierPolicy**: ceiling per [`SubscriptionTier`]; the OPERATOR ceiling is the global budget
//! - **SpendingPlanStore**: spending plans and identity links on top of a [`CacheStore`](crate::cache::CacheStore)
//! - **BudgetController**: admission checks and expense recording, with periodic resets
//! - **PreconfiguredPlans**: plans with fixed ids provisioned from a JSON file
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_budget::budget::{BudgetController, CallerIdentity, ExecutionMode, SpendingPlanStore, TierPolicy};
//! use relay_budget::cache::LocalCache;
//!
//! let store = SpendingPlanStore::new(Arc::new(LocalCache::new()));
//! let controller = BudgetController::new(policy, store, Duration::from_secs(86_400));
//!
//! let caller = CallerIdentity::evm("0x7d102fe71af42790fe31b126c1f49766376ca2b5");
//! if !controller.should_limit(ExecutionMode::Transaction, "eth_sendRawTransaction", &caller, 0).await? {
//!     // submit, then later:
//!     controller.add_expense(fee, &caller).await?;
//! }
//! ```

mod controller;
mod plan;
mod preconfigured;
mod schedule;
mod store;
mod tier;

pub use controller::{BudgetController, ExecutionMode, OPERATOR_PLAN_ID};
pub use plan::{CallerIdentity, IdentityAssociation, IdentityKind, SpendingPlan, SpendingRecord};
pub use preconfigured::{
    load_spending_plans, parse_spending_plans, PreconfiguredError, PreconfiguredPlans, SpendingPlanConfig, SyncReport,
};
pub use schedule::ResetSchedule;
pub use store::{SpendingPlanStore, StoreError, StoreResult};
pub use tier::{SubscriptionTier, TierPolicy};

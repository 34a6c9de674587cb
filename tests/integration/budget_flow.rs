//! Spending plans, pre-configured overrides and the reset schedule.

use std::io::Write;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use relay_budget::budget::{
    BudgetController, CallerIdentity, ExecutionMode, IdentityKind, PreconfiguredPlans, SpendingPlanStore,
    SubscriptionTier,
};
use relay_budget::cache::LocalCache;
use tokio_test::assert_ok;

use crate::support::{policy, DAY};

const PLANS: &str = r#"[
    {
        "id": "c758c095-342c-4607-9db5-867d7e90ab9d",
        "name": "partner",
        "evmAddresses": ["0x7D102FE71AF42790FE31B126C1F49766376CA2B5"],
        "ipAddresses": ["203.0.113.7"],
        "subscriptionTier": "PRIVILEGED"
    }
]"#;

fn controller() -> BudgetController {
    BudgetController::new(policy(), SpendingPlanStore::new(Arc::new(LocalCache::new())), DAY)
}

#[tokio::test]
async fn preconfigured_plan_lifts_caller_above_basic_limit() {
    let budget = controller();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PLANS.as_bytes()).unwrap();

    let report = assert_ok!(PreconfiguredPlans::new(budget.store().clone()).sync_from_file(file.path()).await);
    assert_eq!(report.plans_created, 1);
    assert_eq!(report.associations_added, 2);

    let partner = CallerIdentity::evm("0x7d102fe71af42790fe31b126c1f49766376ca2b5");
    let stranger = CallerIdentity::evm("0x0000000000000000000000000000000000000001");
    let cost = 1_500_000_000;

    assert!(!budget
        .should_limit(ExecutionMode::Transaction, "eth_sendRawTransaction", &partner, cost)
        .await
        .unwrap());
    assert!(budget
        .should_limit(ExecutionMode::Transaction, "eth_sendRawTransaction", &stranger, cost)
        .await
        .unwrap());

    // the IP link resolves to the same plan when no EVM address is known
    assert_ok!(budget.add_expense(cost, &CallerIdentity::ip("203.0.113.7")).await);
    let plan = budget
        .store()
        .find_by_id("c758c095-342c-4607-9db5-867d7e90ab9d")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plan.subscription_tier, SubscriptionTier::Privileged);
    assert_eq!(plan.amount_spent, cost);
}

#[tokio::test]
async fn removed_preconfigured_plan_falls_back_to_basic() {
    let budget = controller();
    let plans = PreconfiguredPlans::new(budget.store().clone());
    let configs = relay_budget::budget::parse_spending_plans(PLANS).unwrap();
    assert_ok!(plans.sync(&configs).await);

    let report = assert_ok!(plans.sync(&[]).await);
    assert_eq!(report.plans_deleted, 1);
    assert!(budget
        .store()
        .find_association("203.0.113.7", IdentityKind::IpAddress)
        .await
        .unwrap()
        .is_none());

    let partner = CallerIdentity::evm("0x7d102fe71af42790fe31b126c1f49766376ca2b5");
    assert!(budget
        .should_limit(ExecutionMode::Transaction, "eth_sendRawTransaction", &partner, 1_500_000_000)
        .await
        .unwrap());
    assert_eq!(budget.unique_active_plans(SubscriptionTier::Privileged), 0);
}

#[tokio::test]
async fn spend_resets_at_period_boundary() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let budget = controller().with_start(start);
    let caller = CallerIdentity::new(Some("0xabc".into()), Some("198.51.100.4".into()));
    let morning = start + ChronoDuration::hours(9);

    assert_ok!(budget.add_expense_at(1_000_000_000, &caller, morning).await);
    assert!(assert_ok!(
        budget
            .should_limit_at(ExecutionMode::Query, "eth_call", &caller, 1, morning)
            .await
    ));
    assert_eq!(budget.unique_active_plans(SubscriptionTier::Basic), 1);

    let next_day = start + ChronoDuration::days(1) + ChronoDuration::minutes(1);
    assert!(!assert_ok!(
        budget
            .should_limit_at(ExecutionMode::Query, "eth_call", &caller, 1, next_day)
            .await
    ));
    assert_eq!(budget.unique_active_plans(SubscriptionTier::Basic), 0);
    assert_eq!(budget.next_reset(), start + ChronoDuration::days(2));
}

//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; installing an exporter is
//! left to the embedding binary. Without one every call is a no-op.

use ::metrics::Label;

/// Requests rejected by the global budget, labelled by `mode` and `method`.
pub const HBAR_RATE_LIMIT: &str = "rpc_relay_hbar_rate_limit";
/// Tinybars left in the global budget.
pub const HBAR_RATE_REMAINING: &str = "rpc_relay_hbar_rate_remaining";
/// Configured global budget in tinybars.
pub const HBAR_RATE_TOTAL: &str = "rpc_relay_hbar_rate_total";
/// Plans charged at least once in the current period, labelled by `tier`.
pub const UNIQUE_SPENDING_PLANS: &str = "rpc_relay_unique_spending_plans";
/// Average spend of active plans, labelled by `tier`.
pub const AVERAGE_AMOUNT_SPENT: &str = "rpc_relay_average_amount_spent";
/// Tinybars charged per consensus-node interaction.
pub const CONSENSUS_NODE_RESPONSE: &str = "rpc_relay_consensusnode_response";
/// Gas used per consensus-node interaction.
pub const CONSENSUS_NODE_GAS_FEE: &str = "rpc_relay_consensusnode_gasfee";

pub(crate) fn record_rate_limit_rejection(mode: &'static str, method: &str) {
    ::metrics::counter!(HBAR_RATE_LIMIT, "mode" => mode, "method" => method.to_string()).increment(1);
}

pub(crate) fn set_budget_remaining(remaining: i64) {
    ::metrics::gauge!(HBAR_RATE_REMAINING).set(remaining as f64);
}

pub(crate) fn set_budget_total(total: i64) {
    ::metrics::gauge!(HBAR_RATE_TOTAL).set(total as f64);
}

pub(crate) fn set_unique_spending_plans(tier: &'static str, count: u64) {
    ::metrics::gauge!(UNIQUE_SPENDING_PLANS, "tier" => tier).set(count as f64);
}

pub(crate) fn set_average_amount_spent(tier: &'static str, average: f64) {
    ::metrics::gauge!(AVERAGE_AMOUNT_SPENT, "tier" => tier).set(average);
}

/// Labels shared by the consensus-node histograms.
#[derive(Debug, Clone)]
pub(crate) struct ConsensusNodeLabels<'a> {
    pub mode: &'static str,
    pub tx_type: &'a str,
    pub status: &'a str,
    pub caller: &'a str,
    pub interacting_entity: &'a str,
}

pub(crate) fn record_consensus_node_expense(labels: &ConsensusNodeLabels<'_>, cost: u64, gas_used: u64) {
    let label_set = vec![
        Label::new("mode", labels.mode),
        Label::new("type", labels.tx_type.to_string()),
        Label::new("status", labels.status.to_string()),
        Label::new("caller", labels.caller.to_string()),
        Label::new("interacting_entity", labels.interacting_entity.to_string()),
    ];
    ::metrics::histogram!(CONSENSUS_NODE_RESPONSE, label_set.clone()).record(cost as f64);
    ::metrics::histogram!(CONSENSUS_NODE_GAS_FEE, label_set).record(gas_used as f64);
}

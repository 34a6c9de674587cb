//! Background consumer that turns execution events into budget expenses.
//!
//! Each event is handled on its own task so a slow record lookup never
//! delays other events, and nothing here ever blocks the request that
//! produced the event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{trace, warn};

use crate::budget::{BudgetController, ExecutionMode};
use crate::execution::{
    ExchangeRate, ExecuteQueryEvent, ExecuteTransactionEvent, ExecutionEvent, MirrorClient, NetworkClient,
    NetworkError, TINYBARS_PER_HBAR,
};
use crate::metrics::{self, ConsensusNodeLabels};

/// Fee in US cents for fetching a transaction record from a consensus node.
pub const TRANSACTION_GET_RECORD_CENTS: f64 = 0.01;

const RECORD_QUERY_NAME: &str = "TransactionRecordQuery";

/// Fees extracted from a transaction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecordMetric {
    pub gas_used: u64,
    /// Tinybars the operator paid for the transaction.
    pub transaction_fee: u64,
    /// Tinybars paid to fetch the record itself.
    pub record_charge: u64,
    pub status: String,
}

/// Tinybar price of a record query at `rate`.
pub fn record_query_charge(rate: &ExchangeRate) -> u64 {
    let cents_per_hbar = rate.cents_per_hbar();
    if cents_per_hbar <= 0.0 {
        return 0;
    }
    (TRANSACTION_GET_RECORD_CENTS / cents_per_hbar * TINYBARS_PER_HBAR).round() as u64
}

/// Records what executed operations actually cost.
pub struct ExpenseRecorder {
    budget: Arc<BudgetController>,
    client: Arc<dyn NetworkClient>,
    mirror: Arc<dyn MirrorClient>,
    records_from_consensus_node: bool,
    mirror_retries: u32,
    mirror_retry_delay: Duration,
}

impl ExpenseRecorder {
    pub fn new(budget: Arc<BudgetController>, client: Arc<dyn NetworkClient>, mirror: Arc<dyn MirrorClient>) -> Self {
        Self {
            budget,
            client,
            mirror,
            records_from_consensus_node: false,
            mirror_retries: 10,
            mirror_retry_delay: Duration::from_millis(500),
        }
    }

    /// Fetch records from a consensus node (paid) instead of the mirror node.
    pub fn with_consensus_node_records(mut self, enabled: bool) -> Self {
        self.records_from_consensus_node = enabled;
        self
    }

    /// How often and how patiently to wait for the mirror to ingest a record.
    pub fn with_mirror_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.mirror_retries = retries;
        self.mirror_retry_delay = delay;
        self
    }

    /// Consume events until every publisher is dropped.
    ///
    /// The returned handle completes once the channel is closed and all
    /// in-flight events have been handled.
    pub fn spawn(self, mut receiver: UnboundedReceiver<ExecutionEvent>) -> JoinHandle<()> {
        let recorder = Arc::new(self);
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(event) => {
                            let recorder = Arc::clone(&recorder);
                            tasks.spawn(async move { recorder.handle(event).await });
                        }
                        None => break,
                    },
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            }
            while tasks.join_next().await.is_some() {}
        })
    }

    /// Handle a single event.
    pub async fn handle(&self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::Query(event) => self.record_query(&event).await,
            ExecutionEvent::Transaction(event) => self.record_transaction(&event).await,
        }
    }

    async fn record_query(&self, event: &ExecuteQueryEvent) {
        let labels = ConsensusNodeLabels {
            mode: ExecutionMode::Query.as_str(),
            tx_type: &event.constructor_name,
            status: &event.status,
            caller: &event.caller_name,
            interacting_entity: &event.interacting_entity,
        };
        self.add_expense(&labels, event.cost, event.gas_used, &event.identity, &event.request.formatted_request_id())
            .await;
    }

    async fn record_transaction(&self, event: &ExecuteTransactionEvent) {
        let prefix = event.request.formatted_request_id();
        let metric = match self.transaction_record_metric(event).await {
            Ok(Some(metric)) => metric,
            Ok(None) => {
                warn!(
                    "{} No transaction record retrieved: transactionId={}, txConstructorName={}, callerName={}",
                    prefix, event.transaction_id, event.constructor_name, event.caller_name
                );
                return;
            }
            Err(err) => {
                warn!("{} Could not fetch transaction record: error={}", prefix, err);
                return;
            }
        };

        if metric.transaction_fee != 0 {
            let labels = ConsensusNodeLabels {
                mode: ExecutionMode::Transaction.as_str(),
                tx_type: &event.constructor_name,
                status: &metric.status,
                caller: &event.caller_name,
                interacting_entity: &event.interacting_entity,
            };
            self.add_expense(&labels, metric.transaction_fee, metric.gas_used, &event.identity, &prefix)
                .await;
        }
        if metric.record_charge != 0 {
            let labels = ConsensusNodeLabels {
                mode: ExecutionMode::Record.as_str(),
                tx_type: RECORD_QUERY_NAME,
                status: &metric.status,
                caller: &event.caller_name,
                interacting_entity: &event.interacting_entity,
            };
            self.add_expense(&labels, metric.record_charge, 0, &event.identity, &prefix)
                .await;
        }
    }

    async fn add_expense(
        &self,
        labels: &ConsensusNodeLabels<'_>,
        cost: u64,
        gas_used: u64,
        identity: &crate::budget::CallerIdentity,
        prefix: &str,
    ) {
        trace!(
            "{} Capturing HBAR charged: executionMode={} txConstructorName={}, callerName={}, cost={} tinybars",
            prefix,
            labels.mode,
            labels.tx_type,
            labels.caller,
            cost
        );
        if let Err(err) = self.budget.add_expense(cost, identity).await {
            warn!("{} Failed to record HBAR expense of {} tinybars: {}", prefix, cost, err);
        }
        metrics::record_consensus_node_expense(labels, cost, gas_used);
    }

    /// Resolve the fees of a transaction from the configured source.
    pub async fn transaction_record_metric(
        &self,
        event: &ExecuteTransactionEvent,
    ) -> Result<Option<TransactionRecordMetric>, NetworkError> {
        if self.records_from_consensus_node {
            let record = self.client.get_record(&event.transaction_id).await?;
            let record_charge = record
                .exchange_rate
                .as_ref()
                .map(record_query_charge)
                .unwrap_or(0);
            return Ok(Some(TransactionRecordMetric {
                gas_used: record.gas_used,
                transaction_fee: record.amount_paid_by(&event.operator_account_id),
                record_charge,
                status: record.status.to_string(),
            }));
        }

        for attempt in 0..=self.mirror_retries {
            if let Some(record) = self.mirror.transaction_record(&event.transaction_id).await? {
                return Ok(Some(TransactionRecordMetric {
                    gas_used: 0,
                    transaction_fee: record.amount_paid_by(&event.operator_account_id),
                    record_charge: 0,
                    status: record.status.to_string(),
                }));
            }
            if attempt < self.mirror_retries {
                trace!(
                    "{} Transaction {} not yet on the mirror node, retry {}",
                    event.request.formatted_request_id(),
                    event.transaction_id,
                    attempt + 1
                );
                tokio::time::sleep(self.mirror_retry_delay).await;
            }
        }
        Ok(None)
    }
}

//! Metered execution of queries and transactions against the network.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::events::{EventPublisher, ExecuteQueryEvent, ExecuteTransactionEvent, ExecutionEvent};
use super::file::{estimate_file_transactions_fee, FileChunkPlan, TINYBARS_PER_HBAR};
use super::network::{
    ExchangeRate, FileId, MirrorClient, NetworkClient, Query, QueryKind, QueryResponse, Transaction,
    TransactionId, TransactionReceipt, TransactionResponse,
};
use super::status::{NetworkError, Status};
use crate::budget::{BudgetController, CallerIdentity, ExecutionMode};
use crate::error::{RelayError, RelayResult};
use crate::request::RequestDetails;

/// Gas ceiling of a block; with the gas price it bounds an Ethereum
/// transaction's fee.
pub const BLOCK_GAS_LIMIT: u64 = 15_000_000;

/// Maximum fee offered for deleting a call-data file.
const FILE_DELETE_MAX_FEE: u64 = 2 * TINYBARS_PER_HBAR as u64;

/// Tunables of the execution engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Largest hex payload sent in one file transaction.
    pub file_append_chunk_size: usize,
    /// Upper bound on append transactions per upload.
    pub file_append_max_chunks: usize,
    /// Factor applied to a query payment per retry.
    pub query_cost_incrementation_step: f64,
    /// Retries after the first paid attempt.
    pub query_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file_append_chunk_size: 5120,
            file_append_max_chunks: 20,
            query_cost_incrementation_step: 1.1,
            query_max_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_append_chunk_size(mut self, size: usize) -> Self {
        self.file_append_chunk_size = size.max(1);
        self
    }

    pub fn with_file_append_max_chunks(mut self, max: usize) -> Self {
        self.file_append_max_chunks = max;
        self
    }

    pub fn with_query_cost_incrementation_step(mut self, step: f64) -> Self {
        self.query_cost_incrementation_step = step;
        self
    }

    pub fn with_query_max_retries(mut self, retries: u32) -> Self {
        self.query_max_retries = retries;
        self
    }
}

/// Who an operation runs for and what it touches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    /// JSON-RPC method that triggered the operation.
    pub caller_name: String,
    /// Account or contract the operation interacts with.
    pub interacting_entity: String,
    pub request: RequestDetails,
    pub identity: CallerIdentity,
}

impl CallContext {
    /// Context whose identity falls back to the request's IP address.
    pub fn new(caller_name: impl Into<String>, request: RequestDetails) -> Self {
        let identity = CallerIdentity::new(None, request.ip().map(str::to_string));
        Self {
            caller_name: caller_name.into(),
            interacting_entity: String::new(),
            request,
            identity,
        }
    }

    /// Attribute the operation to an EVM address, keeping the IP fallback.
    pub fn with_caller_address(mut self, address: impl Into<String>) -> Self {
        self.identity = CallerIdentity::new(Some(address.into()), self.identity.ip_address.take());
        self
    }

    pub fn with_interacting_entity(mut self, entity: impl Into<String>) -> Self {
        self.interacting_entity = entity.into();
        self
    }
}

/// A signed Ethereum transaction split into its call data and the rest of
/// the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumTransactionData {
    pub to: Option<String>,
    pub call_data: Vec<u8>,
    pub envelope: Vec<u8>,
}

/// Outcome of [`ExecutionEngine::submit_ethereum_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumSubmission {
    /// File holding the call data when it was too large to send inline.
    pub file_id: Option<FileId>,
    pub response: TransactionResponse,
}

/// Submits paid work to the network, consulting the budget before costly
/// operations and publishing an event for every charge it incurs.
pub struct ExecutionEngine {
    client: Arc<dyn NetworkClient>,
    mirror: Arc<dyn MirrorClient>,
    budget: Arc<BudgetController>,
    events: EventPublisher,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<dyn NetworkClient>,
        mirror: Arc<dyn MirrorClient>,
        budget: Arc<BudgetController>,
        events: EventPublisher,
    ) -> Self {
        Self {
            client,
            mirror,
            budget,
            events,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a query, paying for it when required.
    ///
    /// A paid query is quoted first, then retried with a growing payment
    /// while the network answers `INSUFFICIENT_TX_FEE`. Whatever was paid on
    /// the last attempt is published for expense recording, even on failure.
    pub async fn execute_query(&self, query: &Query, ctx: &CallContext) -> RelayResult<QueryResponse> {
        let prefix = ctx.request.formatted_request_id();
        let mut payment = None;

        let result = if query.paid {
            match self.client.query_cost(query).await {
                Ok(base_cost) => {
                    self.increase_cost_and_retry_execution(query, base_cost, &mut payment, &prefix)
                        .await
                }
                Err(err) => Err(err),
            }
        } else {
            self.client.execute_query(query, None).await
        };

        let status = match &result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        };
        if let Some(cost) = payment.filter(|cost| *cost > 0) {
            self.events.publish(ExecutionEvent::Query(ExecuteQueryEvent {
                identity: ctx.identity.clone(),
                transaction_id: None,
                constructor_name: query.name().to_string(),
                caller_name: ctx.caller_name.clone(),
                cost,
                gas_used: 0,
                status: status.to_string(),
                interacting_entity: ctx.interacting_entity.clone(),
                request: ctx.request.clone(),
            }));
        }

        match result {
            Ok(response) => {
                info!(
                    "{} {} {} status: {}, cost: {}",
                    prefix,
                    ctx.caller_name,
                    query.name(),
                    status,
                    payment.unwrap_or(0)
                );
                Ok(response)
            }
            Err(err) => {
                debug!(
                    "{} {} {} status: {}, cost: {}",
                    prefix,
                    ctx.caller_name,
                    query.name(),
                    status,
                    payment.unwrap_or(0)
                );
                if let Some(message) = err.contract_error.clone() {
                    return Err(RelayError::ContractRevert(message));
                }
                if err.is_grpc_timeout() {
                    return Err(RelayError::RequestTimeout);
                }
                Err(err.into())
            }
        }
    }

    /// Attempt `n` pays `round(base_cost * step^n)`; retries only on
    /// `INSUFFICIENT_TX_FEE` and at most `query_max_retries` times.
    async fn increase_cost_and_retry_execution(
        &self,
        query: &Query,
        base_cost: u64,
        payment: &mut Option<u64>,
        prefix: &str,
    ) -> Result<QueryResponse, NetworkError> {
        let mut attempt: u32 = 0;
        loop {
            let multiplier = self.config.query_cost_incrementation_step.powi(attempt as i32);
            let cost = (base_cost as f64 * multiplier).round() as u64;
            *payment = Some(cost);

            match self.client.execute_query(query, Some(cost)).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_insufficient_tx_fee() && attempt < self.config.query_max_retries => {
                    attempt += 1;
                    info!(
                        "{} Retrying query execution with increased cost, retry number: {}",
                        prefix, attempt
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Submit a transaction and wait for its receipt.
    ///
    /// With `estimated_fee` the budget is consulted first and a rejection
    /// fails without touching the network. A receipt reporting failure is
    /// logged and the response still returned, except for `WRONG_NONCE`
    /// which callers must handle themselves.
    pub async fn execute_transaction(
        &self,
        transaction: &Transaction,
        ctx: &CallContext,
        estimated_fee: Option<u64>,
    ) -> RelayResult<TransactionResponse> {
        let (response, _) = self
            .execute_transaction_with_receipt(transaction, ctx, estimated_fee)
            .await?;
        Ok(response)
    }

    async fn execute_transaction_with_receipt(
        &self,
        transaction: &Transaction,
        ctx: &CallContext,
        estimated_fee: Option<u64>,
    ) -> RelayResult<(TransactionResponse, Option<TransactionReceipt>)> {
        let name = transaction.name();
        let prefix = ctx.request.formatted_request_id();

        if let Some(fee) = estimated_fee {
            if self
                .budget
                .should_limit(ExecutionMode::Transaction, &ctx.caller_name, &ctx.identity, fee)
                .await?
            {
                return Err(RelayError::HbarRateLimitExceeded);
            }
        }

        info!("{} Execute {} transaction", prefix, name);
        let response = match self.client.submit_transaction(transaction).await {
            Ok(response) => response,
            Err(err) => {
                // A timed-out or failed submission may still have reached
                // consensus and been charged.
                if let Some(transaction_id) = &err.transaction_id {
                    self.publish_transaction_event(transaction_id, name, ctx);
                }
                return Err(self.submission_failure(err, name, ctx));
            }
        };

        let receipt = self.client.get_receipt(&response).await;
        self.publish_transaction_event(&response.transaction_id, name, ctx);

        match receipt {
            Ok(receipt) => {
                if receipt.status.is_success() {
                    info!(
                        "{} {} {} {} status: {}",
                        prefix, response.transaction_id, ctx.caller_name, name, receipt.status
                    );
                } else {
                    warn!(
                        "{} {} {} {} status: {}",
                        prefix, response.transaction_id, ctx.caller_name, name, receipt.status
                    );
                }
                Ok((response, Some(receipt)))
            }
            Err(err) if err.is_wrong_nonce() => Err(err.into()),
            Err(err) => {
                warn!(
                    "{} {} {} {} receipt failed with status {}: {}",
                    prefix,
                    response.transaction_id,
                    ctx.caller_name,
                    name,
                    err.status(),
                    err
                );
                Ok((response, None))
            }
        }
    }

    fn submission_failure(&self, err: NetworkError, name: &str, ctx: &CallContext) -> RelayError {
        let prefix = ctx.request.formatted_request_id();
        if err.is_wrong_nonce() || err.is_connection_dropped() || err.is_timeout_exceeded() {
            debug!("{} {} submission failed with status {}: {}", prefix, name, err.status(), err);
            return err.into();
        }
        let transaction_id = err
            .transaction_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        warn!("{} {} submission failed with status {}: {}", prefix, name, err.status(), err);
        RelayError::internal(format!(
            "{} Transaction execution returns a null value: transactionId={}, callerName={}, txConstructorName={}",
            prefix, transaction_id, ctx.caller_name, name
        ))
    }

    fn publish_transaction_event(&self, transaction_id: &TransactionId, name: &str, ctx: &CallContext) {
        self.events
            .publish(ExecutionEvent::Transaction(ExecuteTransactionEvent {
                identity: ctx.identity.clone(),
                transaction_id: transaction_id.clone(),
                constructor_name: name.to_string(),
                caller_name: ctx.caller_name.clone(),
                interacting_entity: ctx.interacting_entity.clone(),
                operator_account_id: self.client.operator_account_id(),
                request: ctx.request.clone(),
            }));
    }

    /// Submit an Ethereum transaction, uploading oversized call data to a
    /// file first.
    ///
    /// `network_gas_price` is in tinybars; when given the fee is capped at
    /// `gas_price * BLOCK_GAS_LIMIT`.
    pub async fn submit_ethereum_transaction(
        &self,
        data: EthereumTransactionData,
        ctx: &CallContext,
        network_gas_price: Option<u64>,
        exchange_rate: Option<ExchangeRate>,
    ) -> RelayResult<EthereumSubmission> {
        let ctx = ctx
            .clone()
            .with_interacting_entity(data.to.clone().unwrap_or_default());

        let (call_data, file_id) = if data.call_data.len() <= self.config.file_append_chunk_size {
            (data.call_data, None)
        } else {
            let file_id = self.create_file(&data.call_data, &ctx, exchange_rate).await?;
            (Vec::new(), Some(file_id))
        };

        let transaction = Transaction::Ethereum {
            ethereum_data: [data.envelope, call_data].concat(),
            call_data_file_id: file_id.clone(),
            max_transaction_fee: network_gas_price.map(|price| price.saturating_mul(BLOCK_GAS_LIMIT)),
        };
        let response = self.execute_transaction(&transaction, &ctx, Some(0)).await?;
        Ok(EthereumSubmission { file_id, response })
    }

    /// Upload `call_data` to a new file and return its id.
    ///
    /// The whole create-and-append sequence is priced and admitted up front;
    /// the individual file transactions are not checked again.
    pub async fn create_file(
        &self,
        call_data: &[u8],
        ctx: &CallContext,
        exchange_rate: Option<ExchangeRate>,
    ) -> RelayResult<FileId> {
        let prefix = ctx.request.formatted_request_id();
        let plan = FileChunkPlan::new(call_data, self.config.file_append_chunk_size);
        if plan.append_count() > self.config.file_append_max_chunks {
            return Err(RelayError::internal(format!(
                "{} Contents with size {} too long for {} max chunks",
                prefix,
                plan.len(),
                self.config.file_append_max_chunks
            )));
        }

        let rate = match exchange_rate {
            Some(rate) => rate,
            None => self.mirror.exchange_rate().await?,
        };
        let estimated_fee = estimate_file_transactions_fee(plan.len(), plan.chunk_size(), rate.cents_per_hbar());
        if self
            .budget
            .should_limit(ExecutionMode::Transaction, &ctx.caller_name, &ctx.identity, estimated_fee)
            .await?
        {
            warn!("{} HBAR rate limit exceeded for file upload, estimated fee: {}", prefix, estimated_fee);
            return Err(RelayError::HbarRateLimitExceeded);
        }

        let create = Transaction::FileCreate {
            contents: plan.first_chunk().to_string(),
        };
        let (_, receipt) = self
            .execute_transaction_with_receipt(&create, ctx, None)
            .await?;
        let file_id = receipt
            .and_then(|receipt| receipt.file_id)
            .ok_or_else(|| RelayError::internal(format!("{} No fileId created for transaction.", prefix)))?;

        for contents in plan.append_chunks() {
            let append = Transaction::FileAppend {
                file_id: file_id.clone(),
                contents: contents.to_string(),
            };
            self.execute_transaction(&append, ctx, None).await?;
        }

        let info = Query::paid(QueryKind::FileInfo {
            file_id: file_id.clone(),
        });
        match self.execute_query(&info, ctx).await? {
            QueryResponse::FileInfo(info) if info.size == 0 && !plan.is_empty() => {
                warn!("{} File {} is empty.", prefix, file_id);
                Err(RelayError::internal(format!("{} Created file is empty.", prefix)))
            }
            QueryResponse::FileInfo(info) => {
                trace!(
                    "{} Created file with fileId: {} and file size {}",
                    prefix,
                    file_id,
                    info.size
                );
                Ok(file_id)
            }
            other => Err(RelayError::internal(format!(
                "{} Unexpected response to FileInfoQuery: {:?}",
                prefix, other
            ))),
        }
    }

    /// Delete a call-data file. Failures are logged, never returned.
    pub async fn delete_file(&self, file_id: &FileId, ctx: &CallContext) {
        let prefix = ctx.request.formatted_request_id();
        let delete = Transaction::FileDelete {
            file_id: file_id.clone(),
            max_transaction_fee: Some(FILE_DELETE_MAX_FEE),
        };
        if let Err(err) = self.execute_transaction(&delete, ctx, None).await {
            warn!("{} {}", prefix, err);
            return;
        }

        let info = Query::paid(QueryKind::FileInfo {
            file_id: file_id.clone(),
        });
        match self.execute_query(&info, ctx).await {
            Ok(QueryResponse::FileInfo(info)) if info.is_deleted => {
                trace!("{} Deleted file with fileId: {}", prefix, file_id);
            }
            Ok(_) => warn!("{} Fail to delete file with fileId: {}", prefix, file_id),
            Err(err) => warn!("{} {}", prefix, err),
        }
    }

    /// Current exchange rate according to the mirror node.
    pub async fn exchange_rate(&self) -> RelayResult<ExchangeRate> {
        Ok(self.mirror.exchange_rate().await?)
    }
}

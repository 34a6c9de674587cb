//! In-memory stand-ins for the consensus network and mirror node.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_budget::budget::{BudgetController, IdentityKind, SpendingPlanStore, TierPolicy};
use relay_budget::cache::LocalCache;
use relay_budget::execution::events::{self, ExecutionEvent};
use relay_budget::execution::{
    ContractCallResult, EngineConfig, ExchangeRate, ExecutionEngine, FileId, FileInfo, MirrorClient, NetworkClient,
    NetworkError, Query, QueryKind, QueryResponse, Status, Transaction, TransactionId, TransactionReceipt,
    TransactionRecord, TransactionResponse, Transfer,
};
use relay_budget::recorder::ExpenseRecorder;
use tokio::sync::mpsc::UnboundedReceiver;

pub const OPERATOR_ACCOUNT: &str = "0.0.2";
/// Tinybars every transaction costs the operator.
pub const TX_FEE: u64 = 50_000;
/// Quoted price of every paid query.
pub const QUERY_COST: u64 = 1_000;
pub const DAY: Duration = Duration::from_secs(86_400);

/// A network that accepts everything, tracks uploaded files and charges a
/// flat fee per transaction.
#[derive(Default)]
pub struct FakeNetwork {
    submitted: Mutex<Vec<(TransactionId, Transaction)>>,
    receipts: Mutex<HashMap<TransactionId, FileId>>,
    files: Mutex<HashMap<FileId, String>>,
    deleted: Mutex<HashSet<FileId>>,
}

impl FakeNetwork {
    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().unwrap().iter().map(|(_, tx)| tx.clone()).collect()
    }

    pub fn file_contents(&self, file_id: &FileId) -> Option<String> {
        self.files.lock().unwrap().get(file_id).cloned()
    }

    fn knows(&self, id: &TransactionId) -> bool {
        self.submitted.lock().unwrap().iter().any(|(known, _)| known == id)
    }

    fn record(id: &TransactionId) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.clone(),
            status: Status::Success,
            transfers: vec![
                Transfer {
                    account: OPERATOR_ACCOUNT.into(),
                    amount: -(TX_FEE as i64),
                },
                Transfer {
                    account: "0.0.98".into(),
                    amount: TX_FEE as i64,
                },
            ],
            gas_used: 30_000,
            exchange_rate: Some(ExchangeRate::new(1, 12)),
        }
    }
}

#[async_trait]
impl NetworkClient for FakeNetwork {
    fn operator_account_id(&self) -> String {
        OPERATOR_ACCOUNT.to_string()
    }

    async fn query_cost(&self, _query: &Query) -> Result<u64, NetworkError> {
        Ok(QUERY_COST)
    }

    async fn execute_query(&self, query: &Query, _payment: Option<u64>) -> Result<QueryResponse, NetworkError> {
        match &query.kind {
            QueryKind::FileInfo { file_id } => {
                let size = self.files.lock().unwrap().get(file_id).map(|c| c.len() as u64);
                let Some(size) = size else {
                    return Err(NetworkError::with_status(Status::InvalidFileId, "INVALID_FILE_ID"));
                };
                Ok(QueryResponse::FileInfo(FileInfo {
                    file_id: file_id.clone(),
                    size,
                    is_deleted: self.deleted.lock().unwrap().contains(file_id),
                }))
            }
            QueryKind::ContractCall { .. } => Ok(QueryResponse::ContractCall(ContractCallResult {
                bytes: vec![0x2a],
                gas_used: 21_000,
                error_message: None,
            })),
            QueryKind::AccountBalance { .. } => Ok(QueryResponse::Balance { tinybars: 1 }),
            _ => Ok(QueryResponse::Bytes(Vec::new())),
        }
    }

    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TransactionResponse, NetworkError> {
        let mut submitted = self.submitted.lock().unwrap();
        let id = TransactionId(format!("{}@{}.0", OPERATOR_ACCOUNT, submitted.len() + 1));
        match transaction {
            Transaction::FileCreate { contents } => {
                let file_id = FileId(format!("0.0.{}", 5000 + submitted.len()));
                self.files.lock().unwrap().insert(file_id.clone(), contents.clone());
                self.receipts.lock().unwrap().insert(id.clone(), file_id);
            }
            Transaction::FileAppend { file_id, contents } => {
                if let Some(existing) = self.files.lock().unwrap().get_mut(file_id) {
                    existing.push_str(contents);
                }
            }
            Transaction::FileDelete { file_id, .. } => {
                self.deleted.lock().unwrap().insert(file_id.clone());
            }
            Transaction::Ethereum { .. } => {}
        }
        submitted.push((id.clone(), transaction.clone()));
        Ok(TransactionResponse {
            transaction_id: id,
            node_id: "0.0.3".to_string(),
        })
    }

    async fn get_receipt(&self, response: &TransactionResponse) -> Result<TransactionReceipt, NetworkError> {
        Ok(TransactionReceipt {
            status: Status::Success,
            file_id: self.receipts.lock().unwrap().get(&response.transaction_id).cloned(),
            exchange_rate: Some(ExchangeRate::new(1, 12)),
        })
    }

    async fn get_record(&self, transaction_id: &TransactionId) -> Result<TransactionRecord, NetworkError> {
        if !self.knows(transaction_id) {
            return Err(NetworkError::with_status(Status::InvalidTransactionId, "RECORD_NOT_FOUND"));
        }
        Ok(Self::record(transaction_id))
    }
}

/// Mirror node that has ingested everything the network accepted.
pub struct FakeMirror {
    network: Arc<FakeNetwork>,
}

#[async_trait]
impl MirrorClient for FakeMirror {
    async fn exchange_rate(&self) -> Result<ExchangeRate, NetworkError> {
        Ok(ExchangeRate::new(1, 12))
    }

    async fn transaction_record(&self, transaction_id: &TransactionId) -> Result<Option<TransactionRecord>, NetworkError> {
        if self.network.knows(transaction_id) {
            return Ok(Some(FakeNetwork::record(transaction_id)));
        }
        Ok(None)
    }
}

/// Engine, budget and recorder wired over the fakes.
pub struct Harness {
    pub network: Arc<FakeNetwork>,
    pub budget: Arc<BudgetController>,
    pub engine: ExecutionEngine,
    pub recorder: ExpenseRecorder,
    pub events: UnboundedReceiver<ExecutionEvent>,
}

impl Harness {
    pub fn new(policy: TierPolicy) -> Self {
        let network = Arc::new(FakeNetwork::default());
        let mirror = Arc::new(FakeMirror {
            network: Arc::clone(&network),
        });
        let store = SpendingPlanStore::new(Arc::new(LocalCache::new()));
        let budget = Arc::new(BudgetController::new(policy, store, DAY));
        let (publisher, events) = events::channel();
        let engine = ExecutionEngine::new(network.clone(), mirror.clone(), Arc::clone(&budget), publisher)
            .with_config(EngineConfig::new().with_file_append_chunk_size(8).with_file_append_max_chunks(4));
        let recorder = ExpenseRecorder::new(Arc::clone(&budget), network.clone(), mirror)
            .with_mirror_retry(0, Duration::from_millis(1));
        Self {
            network,
            budget,
            engine,
            recorder,
            events,
        }
    }

    /// Resolve transaction fees from consensus-node records.
    pub fn with_consensus_node_records(mut self) -> Self {
        self.recorder = self.recorder.with_consensus_node_records(true);
        self
    }

    /// Record every event published so far.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.recorder.handle(event).await;
            handled += 1;
        }
        handled
    }

    /// Tinybars charged to the plan linked to `address`.
    pub async fn spent_by(&self, address: &str) -> u64 {
        let store = self.budget.store();
        let plan_id = store
            .find_association(address, IdentityKind::EvmAddress)
            .await
            .unwrap()
            .expect("address has a plan");
        store.amount_spent(&plan_id).await.unwrap()
    }

    /// Amounts in the spending history of `address`'s plan, oldest first.
    pub async fn history_of(&self, address: &str) -> Vec<u64> {
        let store = self.budget.store();
        let plan_id = store
            .find_association(address, IdentityKind::EvmAddress)
            .await
            .unwrap()
            .expect("address has a plan");
        let history = store.spending_history(&plan_id).await.unwrap();
        history.into_iter().map(|record| record.amount).collect()
    }
}

pub fn policy() -> TierPolicy {
    TierPolicy::new(1_000_000_000, 2_000_000_000, 3_000_000_000, 10_000_000_000)
}

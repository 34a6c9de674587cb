//! Metered execution against the consensus network.
//!
//! The [`ExecutionEngine`] is the only place the relay spends operator funds.
//! It asks the [`BudgetController`](crate::budget::BudgetController) before
//! costly submissions and publishes an [`ExecutionEvent`] for every charge so
//! the [`ExpenseRecorder`](crate::recorder::ExpenseRecorder) can debit the
//! right plan off the request path.

mod engine;
pub mod events;
mod file;
mod network;
mod status;

pub use engine::{CallContext, EngineConfig, EthereumSubmission, EthereumTransactionData, ExecutionEngine, BLOCK_GAS_LIMIT};
pub use events::{EventPublisher, ExecuteQueryEvent, ExecuteTransactionEvent, ExecutionEvent};
pub use file::{estimate_file_transactions_fee, FileChunkPlan, TINYBARS_PER_HBAR};
pub use network::{
    ContractCallResult, ExchangeRate, FileId, FileInfo, MirrorClient, NetworkClient, Query, QueryKind, QueryResponse,
    Transaction, TransactionId, TransactionReceipt, TransactionRecord, TransactionResponse, Transfer,
};
pub use status::{NetworkError, Status};

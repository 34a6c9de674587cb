//! Collaborator traits for the consensus network and the mirror node, plus
//! the wire-neutral values that cross them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::status::{NetworkError, Status};

/// Identifier assigned to a submitted transaction (`0.0.2@1700000000.000000001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a network file (`0.0.1234`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exchange rate between HBAR and US cents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub hbar_equivalent: u64,
    pub cent_equivalent: u64,
}

impl ExchangeRate {
    pub fn new(hbar_equivalent: u64, cent_equivalent: u64) -> Self {
        Self {
            hbar_equivalent,
            cent_equivalent,
        }
    }

    /// US cents per whole HBAR.
    pub fn cents_per_hbar(&self) -> f64 {
        if self.hbar_equivalent == 0 {
            return 0.0;
        }
        self.cent_equivalent as f64 / self.hbar_equivalent as f64
    }
}

/// Read operations the relay issues against the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    AccountBalance {
        account: String,
    },
    ContractByteCode {
        contract: String,
    },
    ContractCall {
        contract: String,
        data: Vec<u8>,
        gas: u64,
        sender: Option<String>,
    },
    FileContents {
        file_id: FileId,
    },
    FileInfo {
        file_id: FileId,
    },
}

/// A query plus whether it is paid for up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryKind,
    /// Queries carrying a payment transaction are quoted before execution
    /// and retried with a higher payment on `INSUFFICIENT_TX_FEE`.
    pub paid: bool,
}

impl Query {
    /// A query that needs no up-front payment.
    pub fn free(kind: QueryKind) -> Self {
        Self { kind, paid: false }
    }

    /// A query paid for by the operator.
    pub fn paid(kind: QueryKind) -> Self {
        Self { kind, paid: true }
    }

    /// Operation name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self.kind {
            QueryKind::AccountBalance { .. } => "AccountBalanceQuery",
            QueryKind::ContractByteCode { .. } => "ContractByteCodeQuery",
            QueryKind::ContractCall { .. } => "ContractCallQuery",
            QueryKind::FileContents { .. } => "FileContentsQuery",
            QueryKind::FileInfo { .. } => "FileInfoQuery",
        }
    }
}

/// Size and state of a network file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: FileId,
    pub size: u64,
    pub is_deleted: bool,
}

/// Result of a contract call query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractCallResult {
    pub bytes: Vec<u8>,
    pub gas_used: u64,
    pub error_message: Option<String>,
}

/// Answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    Balance { tinybars: u64 },
    Bytes(Vec<u8>),
    ContractCall(ContractCallResult),
    FileInfo(FileInfo),
}

/// State-changing operations the relay submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Ethereum {
        /// Signed transaction envelope, with the call data stripped when it
        /// was uploaded to a file.
        ethereum_data: Vec<u8>,
        call_data_file_id: Option<FileId>,
        max_transaction_fee: Option<u64>,
    },
    FileCreate {
        contents: String,
    },
    FileAppend {
        file_id: FileId,
        contents: String,
    },
    FileDelete {
        file_id: FileId,
        max_transaction_fee: Option<u64>,
    },
}

impl Transaction {
    /// Operation name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Transaction::Ethereum { .. } => "EthereumTransaction",
            Transaction::FileCreate { .. } => "FileCreateTransaction",
            Transaction::FileAppend { .. } => "FileAppendTransaction",
            Transaction::FileDelete { .. } => "FileDeleteTransaction",
        }
    }
}

/// Acknowledgement of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResponse {
    pub transaction_id: TransactionId,
    pub node_id: String,
}

/// Consensus outcome of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReceipt {
    pub status: Status,
    pub file_id: Option<FileId>,
    pub exchange_rate: Option<ExchangeRate>,
}

/// A single HBAR movement in a record, negative for debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub account: String,
    pub amount: i64,
}

/// Authoritative record of an executed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub status: Status,
    pub transfers: Vec<Transfer>,
    pub gas_used: u64,
    pub exchange_rate: Option<ExchangeRate>,
}

impl TransactionRecord {
    /// Tinybars paid by `account`: the sum of its debits.
    pub fn amount_paid_by(&self, account: &str) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.account == account && t.amount < 0)
            .map(|t| t.amount.unsigned_abs())
            .sum()
    }
}

/// Consensus-network client.
///
/// Implementations own connection management, signing and their own
/// execution timeout; every call may take arbitrarily long.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Account paying for queries and transactions.
    fn operator_account_id(&self) -> String;

    /// Quote the payment `query` requires, in tinybars.
    async fn query_cost(&self, query: &Query) -> Result<u64, NetworkError>;

    /// Execute `query`, paying `payment` tinybars when given.
    async fn execute_query(&self, query: &Query, payment: Option<u64>) -> Result<QueryResponse, NetworkError>;

    /// Sign and submit `transaction`.
    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TransactionResponse, NetworkError>;

    /// Wait for the receipt of a submitted transaction.
    ///
    /// Fails when the transaction reached consensus with a non-success status.
    async fn get_receipt(&self, response: &TransactionResponse) -> Result<TransactionReceipt, NetworkError>;

    /// Fetch the record of a transaction without validating its status.
    async fn get_record(&self, transaction_id: &TransactionId) -> Result<TransactionRecord, NetworkError>;
}

/// Mirror-node client used for exchange rates and fee lookups.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Current network exchange rate.
    async fn exchange_rate(&self) -> Result<ExchangeRate, NetworkError>;

    /// Record of a transaction once the mirror has ingested it.
    async fn transaction_record(&self, transaction_id: &TransactionId) -> Result<Option<TransactionRecord>, NetworkError>;
}

//! Network status codes and error classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::network::TransactionId;

/// Outcome reported by the consensus network for a query or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Success,
    InsufficientTxFee,
    InsufficientPayerBalance,
    InvalidTransactionId,
    InvalidAccountId,
    InvalidContractId,
    InvalidFileId,
    ContractRevertExecuted,
    WrongNonce,
    Busy,
    Unknown,
    /// Any status the relay does not branch on.
    Other(String),
}

impl Status {
    /// Name of the status as reported by the network.
    pub fn as_str(&self) -> &str {
        match self {
            Status::Ok => "OK",
            Status::Success => "SUCCESS",
            Status::InsufficientTxFee => "INSUFFICIENT_TX_FEE",
            Status::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
            Status::InvalidTransactionId => "INVALID_TRANSACTION_ID",
            Status::InvalidAccountId => "INVALID_ACCOUNT_ID",
            Status::InvalidContractId => "INVALID_CONTRACT_ID",
            Status::InvalidFileId => "INVALID_FILE_ID",
            Status::ContractRevertExecuted => "CONTRACT_REVERT_EXECUTED",
            Status::WrongNonce => "WRONG_NONCE",
            Status::Busy => "BUSY",
            Status::Unknown => "UNKNOWN",
            Status::Other(name) => name,
        }
    }

    /// Whether a receipt with this status counts as successful.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success | Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a network client.
///
/// Errors without a status did not come from the network itself (local
/// validation, transport setup, ...) and are treated as `UNKNOWN`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NetworkError {
    pub status: Option<Status>,
    pub message: String,
    pub transaction_id: Option<TransactionId>,
    pub node_id: Option<String>,
    /// Error message of the contract call result attached to a precheck failure.
    pub contract_error: Option<String>,
}

impl NetworkError {
    /// An error that did not originate from the network.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            transaction_id: None,
            node_id: None,
            contract_error: None,
        }
    }

    /// An error carrying a network status.
    pub fn with_status(status: Status, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_contract_error(mut self, message: impl Into<String>) -> Self {
        self.contract_error = Some(message.into());
        self
    }

    /// The reported status, `UNKNOWN` when none was reported.
    pub fn status(&self) -> Status {
        self.status.clone().unwrap_or(Status::Unknown)
    }

    pub fn is_valid_network_error(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_insufficient_tx_fee(&self) -> bool {
        self.status == Some(Status::InsufficientTxFee)
    }

    pub fn is_timeout_exceeded(&self) -> bool {
        self.status() == Status::Unknown && self.message.contains("timeout exceeded")
    }

    pub fn is_connection_dropped(&self) -> bool {
        self.status() == Status::Unknown && self.message.contains("Connection dropped")
    }

    /// The network gave up waiting on the request (`INVALID_TRANSACTION_ID`).
    pub fn is_grpc_timeout(&self) -> bool {
        self.status == Some(Status::InvalidTransactionId)
    }

    pub fn is_wrong_nonce(&self) -> bool {
        self.status == Some(Status::WrongNonce)
    }

    pub fn is_contract_revert(&self) -> bool {
        self.status == Some(Status::ContractRevertExecuted)
    }

    pub fn is_invalid_account_id(&self) -> bool {
        self.status == Some(Status::InvalidAccountId)
    }

    pub fn is_invalid_contract_id(&self) -> bool {
        self.status == Some(Status::InvalidContractId)
            || (self.is_valid_network_error() && self.message.contains(Status::InvalidContractId.as_str()))
    }
}

//! Caller-visible relay errors.
//!
//! Every error that can leave the budget or execution layers is expressed as
//! a [`RelayError`] carrying a stable JSON-RPC error code, so the dispatch
//! layer can surface "budget exceeded" distinctly from generic failures.

use thiserror::Error;

use crate::budget::StoreError;
use crate::cache::CacheError;
use crate::execution::NetworkError;

/// JSON-RPC code returned when the HBAR budget rejects a request.
pub const HBAR_RATE_LIMIT_EXCEEDED_CODE: i64 = -32606;
/// JSON-RPC code for internal failures.
pub const INTERNAL_ERROR_CODE: i64 = -32603;
/// JSON-RPC code for requests that timed out against the consensus network.
pub const REQUEST_TIMEOUT_CODE: i64 = -32010;
/// Ethereum-compatible code for reverted contract execution.
pub const CONTRACT_REVERT_CODE: i64 = 3;

/// Errors surfaced by the budget and execution layers.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The global or per-plan HBAR budget would be exceeded.
    #[error("HBAR Rate limit exceeded")]
    HbarRateLimitExceeded,

    /// The consensus network did not answer in time.
    #[error("Request timeout. Please try again.")]
    RequestTimeout,

    /// A contract call reverted with a message.
    #[error("execution reverted: {0}")]
    ContractRevert(String),

    /// An error the relay cannot classify further.
    #[error("Error invoking RPC: {0}")]
    InternalError(String),

    /// A network error propagated unchanged for a higher layer to handle
    /// (nonce conflicts, dropped connections, submission timeouts, ...).
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The backing cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The spending-plan store rejected an update.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Build an internal error from any displayable message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Stable JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::HbarRateLimitExceeded => HBAR_RATE_LIMIT_EXCEEDED_CODE,
            Self::RequestTimeout => REQUEST_TIMEOUT_CODE,
            Self::ContractRevert(_) => CONTRACT_REVERT_CODE,
            Self::InternalError(_) | Self::Network(_) | Self::Cache(_) | Self::Store(_) => {
                INTERNAL_ERROR_CODE
            }
        }
    }

    /// Whether the error is a budget rejection rather than a failure.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::HbarRateLimitExceeded)
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

//! HBAR spending control for an Ethereum-compatible JSON-RPC relay.
//!
//! The relay pays network fees from a single operator account. This crate
//! decides which callers may spend from it and meters what they spend:
//!
//! - [`budget`]: subscription tiers, spending plans, and the admission
//!   controller with its periodic reset.
//! - [`execution`]: the engine that executes queries and transactions on the
//!   consensus network, including large call-data uploads.
//! - [`recorder`]: the background consumer that turns execution events into
//!   expenses.
//! - [`cache`]: the key/value backend plans are persisted in.

pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod request;

pub use budget::{BudgetController, CallerIdentity, SpendingPlanStore, SubscriptionTier, TierPolicy};
pub use cache::{CacheStore, LocalCache};
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use execution::{CallContext, ExecutionEngine};
pub use recorder::ExpenseRecorder;
pub use request::RequestDetails;

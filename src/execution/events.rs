//! Events published by the execution engine for expense recording.
//!
//! Delivery is fire-and-forget: the engine never waits on the consumer and an
//! event sent after the consumer stopped is dropped with a warning.

use tokio::sync::mpsc;
use tracing::warn;

use super::network::TransactionId;
use crate::budget::CallerIdentity;
use crate::request::RequestDetails;

/// A paid query finished, successfully or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteQueryEvent {
    pub identity: CallerIdentity,
    pub transaction_id: Option<TransactionId>,
    pub constructor_name: String,
    pub caller_name: String,
    pub cost: u64,
    pub gas_used: u64,
    pub status: String,
    pub interacting_entity: String,
    pub request: RequestDetails,
}

/// A transaction was accepted by a node; its fee is resolved later.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteTransactionEvent {
    pub identity: CallerIdentity,
    pub transaction_id: TransactionId,
    pub constructor_name: String,
    pub caller_name: String,
    pub interacting_entity: String,
    pub operator_account_id: String,
    pub request: RequestDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Query(ExecuteQueryEvent),
    Transaction(ExecuteTransactionEvent),
}

/// Sending half of the engine's event bus.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl EventPublisher {
    /// Publish without waiting.
    pub fn publish(&self, event: ExecutionEvent) {
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            warn!(?event, "Expense recorder stopped; dropping execution event");
        }
    }
}

/// Create a connected publisher and receiver.
pub fn channel() -> (EventPublisher, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventPublisher { sender }, receiver)
}

//! Per-request context carried through the budget and execution layers.

use serde::{Deserialize, Serialize};

/// Identifies the JSON-RPC request an operation runs for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_id: String,
    pub ip_address: String,
}

impl RequestDetails {
    pub fn new(request_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ip_address: ip_address.into(),
        }
    }

    /// Log prefix for this request, empty when no id is known.
    pub fn formatted_request_id(&self) -> String {
        if self.request_id.is_empty() {
            String::new()
        } else {
            format!("[Request ID: {}]", self.request_id)
        }
    }

    /// The caller's IP address, if known.
    pub fn ip(&self) -> Option<&str> {
        let ip = self.ip_address.trim();
        (!ip.is_empty()).then_some(ip)
    }
}

//! Structured logging helpers
//!
//! Transfers emit one JSON event per state transition so a log pipeline can
//! reconstruct every transfer from the log stream alone.

use serde_json::{json, Value};

use crate::transfer::error::TransferError;
use crate::transfer::state::TransferState;
use crate::transfer::types::Transfer;

pub const SERVICE: &str = "cctp-relay";

/// Get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Structured log event builder
///
/// Usage:
/// ```
/// use cctp_relay::logging::LogEvent;
///
/// let log_value = LogEvent::new("TRANSFER_TRANSITION")
///     .field("from", "init")
///     .field("to", "authorized")
///     .service("cctp-relay")
///     .build();
///
/// log::info!("{}", log_value);
/// ```
pub struct LogEvent {
    fields: serde_json::Map<String, Value>,
}

impl LogEvent {
    /// Create a new log event with the given event name
    pub fn new(event: &str) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("event".to_string(), json!(event));
        fields.insert("timestamp_ms".to_string(), json!(now_ms()));

        Self { fields }
    }

    /// Add a field to the log event
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Add a field only when `value` is present
    pub fn field_opt<T: Into<Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Add service name
    pub fn service(mut self, service: &str) -> Self {
        self.fields.insert("service".to_string(), json!(service));
        self
    }

    /// Build the final JSON value
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

/// `TRANSFER_TRANSITION` event for a transfer that just left `from`
pub fn transition_event(transfer: &Transfer, from: TransferState) -> Value {
    LogEvent::new("TRANSFER_TRANSITION")
        .field("transfer_id", transfer.id.to_string())
        .field("from", from.as_str())
        .field("to", transfer.state.as_str())
        .field("source", transfer.source_domain.to_string())
        .field("destination", transfer.destination_domain.to_string())
        .field_opt("approval_tx", transfer.approval_tx.map(|tx| format!("{:?}", tx.hash)))
        .field_opt("burn_tx", transfer.burn_tx.map(|tx| format!("{:?}", tx.hash)))
        .field_opt("message_hash", transfer.message_hash.map(|h| format!("{:?}", h)))
        .field_opt("message_nonce", transfer.message_nonce)
        .field_opt("completion_tx", transfer.completion_tx.map(|tx| format!("{:?}", tx.hash)))
        .service(SERVICE)
        .build()
}

/// `TRANSFER_FAILED` event
pub fn failure_event(err: &TransferError) -> Value {
    LogEvent::new("TRANSFER_FAILED")
        .field("transfer_id", err.transfer_id.to_string())
        .field("state", err.state.as_str())
        .field("error_code", err.reason.error_code())
        .field("reason", err.reason.to_string())
        .field("resumable", err.is_resumable())
        .service(SERVICE)
        .build()
}

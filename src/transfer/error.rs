//! Error types for burn-and-mint transfers

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::transfer::state::{TransferEvent, TransferState};
use crate::transfer::types::TxRef;

/// Failure of a single ledger call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Transport failure before anything was broadcast
    #[error("network error: {0}")]
    Network(String),
    /// Broadcast failed in transit; the node may or may not hold the signed transaction
    #[error("broadcast of transaction {0} has unknown outcome")]
    Unknown(TxRef),
    /// The node refused the transaction (insufficient funds, bad nonce, ...)
    #[error("transaction rejected by node: {0}")]
    Rejected(String),
    #[error("transaction {0} reverted")]
    Reverted(TxRef),
    #[error("transaction {0} was dropped or replaced")]
    Dropped(TxRef),
    /// Accepted but not confirmed within the wait window
    #[error("transaction {0} not confirmed yet")]
    Unconfirmed(TxRef),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Unconfirmed(_))
    }

    /// Transaction that may have reached the ledger despite the error
    pub fn possibly_accepted(&self) -> Option<TxRef> {
        match self {
            LedgerError::Unknown(tx) => Some(*tx),
            _ => None,
        }
    }
}

/// Failure of a single attestation request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("attestation service unreachable: {0}")]
    Unreachable(String),
    #[error("attestation service rate limited the request")]
    RateLimited,
    #[error("unexpected attestation response: {0}")]
    BadResponse(String),
    #[error("attestation request refused with HTTP {status}: {body}")]
    BadRequest { status: u16, body: String },
}

impl OracleError {
    /// Transient errors are retried on the poll interval
    pub fn is_transient(&self) -> bool {
        !matches!(self, OracleError::BadRequest { .. })
    }
}

/// Outcome of an attestation wait that did not yield a proof
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollError {
    #[error("attestation not ready after {0:?}")]
    Timeout(Duration),
    #[error("attestation rejected by oracle: {0}")]
    Rejected(String),
    #[error("attestation service unavailable: {0}")]
    Unavailable(String),
    #[error("attestation polling cancelled")]
    Cancelled,
}

/// Why a transfer ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("burn failed: {0}")]
    BurnFailed(String),
    /// Burn receipt could not be fetched after the burn confirmed
    #[error("burn receipt unavailable: {0}")]
    ReceiptUnavailable(String),
    /// Missing, malformed or mismatched burn message. Never retried.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("attestation rejected: {0}")]
    AttestationRejected(String),
    #[error("{0}")]
    Poll(PollError),
    #[error("completion failed: {0}")]
    CompletionFailed(String),
}

impl FailureReason {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidRecipient(_) => "INVALID_RECIPIENT",
            Self::AuthorizationFailed(_) => "AUTHORIZATION_FAILED",
            Self::BurnFailed(_) => "BURN_FAILED",
            Self::ReceiptUnavailable(_) => "RECEIPT_UNAVAILABLE",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::AttestationRejected(_) => "ATTESTATION_REJECTED",
            Self::Poll(PollError::Timeout(_)) => "ATTESTATION_TIMEOUT",
            Self::Poll(PollError::Unavailable(_)) => "ATTESTATION_UNAVAILABLE",
            Self::Poll(PollError::Cancelled) => "ATTESTATION_CANCELLED",
            Self::Poll(PollError::Rejected(_)) => "ATTESTATION_REJECTED",
            Self::CompletionFailed(_) => "COMPLETION_FAILED",
        }
    }

    /// Whether a fresh attempt from the last recorded state can succeed
    pub fn is_resumable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InvalidRecipient(_)
                | Self::ProtocolViolation(_)
                | Self::AttestationRejected(_)
                | Self::Poll(PollError::Rejected(_))
        )
    }
}

impl From<PollError> for FailureReason {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Rejected(status) => FailureReason::AttestationRejected(status),
            other => FailureReason::Poll(other),
        }
    }
}

/// Error surfaced to the caller of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transfer {transfer_id} failed after reaching {state}: {reason}")]
pub struct TransferError {
    pub transfer_id: Uuid,
    /// Last state reached before the failure
    pub state: TransferState,
    pub reason: FailureReason,
}

impl TransferError {
    pub fn is_resumable(&self) -> bool {
        self.reason.is_resumable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: TransferState,
    pub event: TransferEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::DomainId;
    use ethers::types::TxHash;

    #[test]
    fn test_ledger_error_retryable() {
        let tx = TxRef::new(DomainId::ETHEREUM, TxHash::zero());
        assert!(LedgerError::Network("timeout".to_string()).is_retryable());
        assert!(LedgerError::Unconfirmed(tx).is_retryable());
        assert!(!LedgerError::Rejected("insufficient funds".to_string()).is_retryable());
        assert!(!LedgerError::Reverted(tx).is_retryable());
        assert!(!LedgerError::Dropped(tx).is_retryable());
        // Resolved by re-query, never by another broadcast
        assert!(!LedgerError::Unknown(tx).is_retryable());
    }

    #[test]
    fn test_oracle_error_transient() {
        assert!(OracleError::RateLimited.is_transient());
        assert!(OracleError::Unreachable("refused".to_string()).is_transient());
        assert!(OracleError::BadResponse("eof".to_string()).is_transient());
        assert!(!OracleError::BadRequest { status: 400, body: String::new() }.is_transient());
    }

    #[test]
    fn test_poll_rejection_maps_to_attestation_rejected() {
        let reason: FailureReason = PollError::Rejected("failed".to_string()).into();
        assert_eq!(reason, FailureReason::AttestationRejected("failed".to_string()));
        assert_eq!(reason.error_code(), "ATTESTATION_REJECTED");

        let reason: FailureReason = PollError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(reason.error_code(), "ATTESTATION_TIMEOUT");
        assert!(reason.is_resumable());
    }

    #[test]
    fn test_failure_reason_json() {
        let reason = FailureReason::BurnFailed("reverted".to_string());
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#"{"kind":"burn_failed","detail":"reverted"}"#);
    }

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError {
            transfer_id: Uuid::nil(),
            state: TransferState::Burned,
            reason: FailureReason::ProtocolViolation("no MessageSent log".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "transfer 00000000-0000-0000-0000-000000000000 failed after reaching burned: protocol violation: no MessageSent log"
        );
        assert!(!err.is_resumable());
    }
}

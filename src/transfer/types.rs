//! Core types for burn-and-mint transfers
//!
//! This module defines the Transfer entity and the values that flow in and out of
//! the orchestrator.

use ethers::types::{Address, Bytes, TxHash, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::transfer::error::{FailureReason, InvalidTransition, TransferError};
use crate::transfer::state::{transition, TransferEvent, TransferState};

/// Protocol domain - the bridge's numeric identifier of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(u32);

impl DomainId {
    pub const ETHEREUM: DomainId = DomainId(0);
    pub const AVALANCHE: DomainId = DomainId(1);
    pub const OPTIMISM: DomainId = DomainId(2);
    pub const ARBITRUM: DomainId = DomainId(3);
    pub const NOBLE: DomainId = DomainId(4);
    pub const SOLANA: DomainId = DomainId(5);
    pub const BASE: DomainId = DomainId(6);
    pub const POLYGON: DomainId = DomainId(7);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Well-known name, if any
    pub fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("ethereum"),
            1 => Some("avalanche"),
            2 => Some("optimism"),
            3 => Some("arbitrum"),
            4 => Some("noble"),
            5 => Some("solana"),
            6 => Some("base"),
            7 => Some("polygon"),
            _ => None,
        }
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "domain-{}", self.0),
        }
    }
}

/// Reference to a transaction accepted by a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub chain: DomainId,
    pub hash: TxHash,
}

impl TxRef {
    pub fn new(chain: DomainId, hash: TxHash) -> Self {
        Self { chain, hash }
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.chain, self.hash)
    }
}

/// Request to move `amount` of `asset` from the source to the destination domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_domain: DomainId,
    pub destination_domain: DomainId,
    /// Token contract on the source chain
    pub asset: Address,
    /// Amount in smallest unit (e.g. 1_000_000 = 1 USDC)
    pub amount: U256,
    /// Recipient in the destination chain's native encoding
    pub recipient: String,
}

/// Transfer record - the unit of work driven by the orchestrator
///
/// Every field that is set stays set; a resumed transfer re-derives nothing it already has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub source_domain: DomainId,
    pub destination_domain: DomainId,
    pub asset: Address,
    pub amount: U256,
    pub recipient: String,
    /// Recipient as a 32-byte protocol address
    pub recipient_canonical: Option<H256>,
    pub state: TransferState,
    pub approval_tx: Option<TxRef>,
    pub burn_tx: Option<TxRef>,
    pub message_bytes: Option<Bytes>,
    pub message_hash: Option<H256>,
    pub message_nonce: Option<u64>,
    pub attestation: Option<Bytes>,
    pub completion_tx: Option<TxRef>,
    pub failure: Option<FailureReason>,
    /// Last state reached before entering `Failed`
    pub failed_from: Option<TransferState>,
    /// Creation timestamp (ms)
    pub created_at: i64,
    /// Last update timestamp (ms)
    pub updated_at: i64,
}

impl Transfer {
    pub fn new(request: TransferRequest) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            source_domain: request.source_domain,
            destination_domain: request.destination_domain,
            asset: request.asset,
            amount: request.amount,
            recipient: request.recipient,
            recipient_canonical: None,
            state: TransferState::Init,
            approval_tx: None,
            burn_tx: None,
            message_bytes: None,
            message_hash: None,
            message_nonce: None,
            attestation: None,
            completion_tx: None,
            failure: None,
            failed_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an FSM event, rejecting anything `transition` does not accept
    pub fn apply(&mut self, event: TransferEvent) -> Result<TransferState, InvalidTransition> {
        let from = self.state;
        let to = transition(from, event);
        if to == from {
            return Err(InvalidTransition { from, event });
        }
        self.state = to;
        self.touch();
        Ok(to)
    }

    /// Move into `Failed`, remembering where the transfer stopped.
    ///
    /// A terminal transfer is left untouched.
    pub fn fail(&mut self, reason: FailureReason) -> TransferError {
        let from = self.state;
        let to = transition(from, TransferEvent::Fail);
        if to != from {
            self.failed_from = Some(from);
            self.state = to;
            self.failure = Some(reason.clone());
            self.touch();
        }

        TransferError {
            transfer_id: self.id,
            state: self.failed_from.unwrap_or(self.state),
            reason,
        }
    }

    /// The error a failed transfer was closed with
    pub fn error(&self) -> Option<TransferError> {
        match (&self.failure, self.failed_from) {
            (Some(reason), Some(state)) if self.state == TransferState::Failed => Some(TransferError {
                transfer_id: self.id,
                state,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    /// Start a fresh attempt from the last durable fact of a failed transfer.
    ///
    /// Returns `None` unless the transfer failed for a reason another attempt can fix.
    /// The failed value itself stays terminal.
    pub fn reopen(&self) -> Option<Transfer> {
        let reason = self.failure.as_ref()?;
        let from = self.failed_from?;
        if self.state != TransferState::Failed || !reason.is_resumable() {
            return None;
        }

        let mut reopened = self.clone();
        reopened.state = from;
        reopened.failure = None;
        reopened.failed_from = None;
        reopened.touch();
        Some(reopened)
    }

    /// Receipt for a completed transfer
    pub fn completion_receipt(&self) -> Option<CompletionReceipt> {
        if self.state != TransferState::Completed {
            return None;
        }
        Some(CompletionReceipt {
            transfer_id: self.id,
            message_hash: self.message_hash?,
            message_nonce: self.message_nonce?,
            burn_tx: self.burn_tx?,
            completion_tx: self.completion_tx?,
            amount: self.amount,
            recipient: self.recipient.clone(),
        })
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// What the caller gets back from a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReceipt {
    pub transfer_id: Uuid,
    pub message_hash: H256,
    pub message_nonce: u64,
    pub burn_tx: TxRef,
    pub completion_tx: TxRef,
    pub amount: U256,
    pub recipient: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::error::PollError;
    use std::time::Duration;

    fn request() -> TransferRequest {
        TransferRequest {
            source_domain: DomainId::ETHEREUM,
            destination_domain: DomainId::BASE,
            asset: Address::repeat_byte(0x1c),
            amount: U256::from(1_000_000u64),
            recipient: "0x00000000000000000000000000000000000000aa".to_string(),
        }
    }

    #[test]
    fn test_domain_display() {
        assert_eq!(DomainId::ETHEREUM.to_string(), "ethereum");
        assert_eq!(DomainId::BASE.to_string(), "base");
        assert_eq!(DomainId::new(42).to_string(), "domain-42");
    }

    #[test]
    fn test_new_transfer_starts_in_init() {
        let transfer = Transfer::new(request());
        assert_eq!(transfer.state, TransferState::Init);
        assert!(transfer.recipient_canonical.is_none());
        assert!(transfer.burn_tx.is_none());
        assert!(transfer.failure.is_none());
        assert_eq!(transfer.created_at, transfer.updated_at);
    }

    #[test]
    fn test_apply_rejects_skipping() {
        let mut transfer = Transfer::new(request());
        let err = transfer.apply(TransferEvent::BurnConfirmed).unwrap_err();
        assert_eq!(err.from, TransferState::Init);
        assert_eq!(transfer.state, TransferState::Init);

        assert_eq!(transfer.apply(TransferEvent::ApprovalConfirmed).unwrap(), TransferState::Authorized);
    }

    #[test]
    fn test_fail_records_last_state() {
        let mut transfer = Transfer::new(request());
        transfer.apply(TransferEvent::ApprovalConfirmed).unwrap();

        let err = transfer.fail(FailureReason::BurnFailed("reverted".to_string()));
        assert_eq!(err.state, TransferState::Authorized);
        assert_eq!(transfer.state, TransferState::Failed);
        assert_eq!(transfer.failed_from, Some(TransferState::Authorized));
        assert_eq!(transfer.error().unwrap().reason, FailureReason::BurnFailed("reverted".to_string()));
    }

    #[test]
    fn test_fail_is_noop_on_completed() {
        let mut transfer = Transfer::new(request());
        transfer.state = TransferState::Completed;
        transfer.fail(FailureReason::CompletionFailed("late".to_string()));
        assert_eq!(transfer.state, TransferState::Completed);
        assert!(transfer.failure.is_none());
    }

    #[test]
    fn test_reopen_resumes_from_last_state() {
        let mut transfer = Transfer::new(request());
        transfer.state = TransferState::AttestationPending;
        transfer.burn_tx = Some(TxRef::new(DomainId::ETHEREUM, TxHash::repeat_byte(1)));
        transfer.fail(FailureReason::Poll(PollError::Timeout(Duration::from_secs(60))));

        let reopened = transfer.reopen().unwrap();
        assert_eq!(reopened.id, transfer.id);
        assert_eq!(reopened.state, TransferState::AttestationPending);
        assert_eq!(reopened.burn_tx, transfer.burn_tx);
        assert!(reopened.failure.is_none());

        // The failed value is untouched
        assert_eq!(transfer.state, TransferState::Failed);
    }

    #[test]
    fn test_reopen_refuses_protocol_violation() {
        let mut transfer = Transfer::new(request());
        transfer.state = TransferState::Burned;
        transfer.fail(FailureReason::ProtocolViolation("no MessageSent log".to_string()));
        assert!(transfer.reopen().is_none());

        let pending = Transfer::new(request());
        assert!(pending.reopen().is_none());
    }

    #[test]
    fn test_transfer_json_roundtrip() {
        let mut transfer = Transfer::new(request());
        transfer.recipient_canonical = Some(H256::repeat_byte(0xaa));
        transfer.message_bytes = Some(Bytes::from(vec![1u8, 2, 3]));

        let json = serde_json::to_string(&transfer).unwrap();
        assert!(json.contains("\"state\":\"init\""));

        let parsed: Transfer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, transfer);
    }
}

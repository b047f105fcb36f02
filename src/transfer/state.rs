//! Transfer State Machine
//!
//! Defines the FSM states, events, and transition function for burn-and-mint transfers.
//! Every non-terminal state is named after the durable fact that was last recorded,
//! so a transfer can be resumed from its state alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Request accepted, nothing on-chain yet (approval may be in flight)
    Init,
    /// Source-chain spend approved for the token messenger
    Authorized,
    /// Burn transaction confirmed on the source chain
    Burned,
    /// Protocol message and its hash recorded
    MessageExtracted,
    /// Oracle is being polled for the attestation
    AttestationPending,
    /// Attestation recorded, ready to mint
    AttestationReady,
    /// Mint confirmed on the destination chain ✅
    Completed,
    /// Terminal failure ❌
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Init => "init",
            TransferState::Authorized => "authorized",
            TransferState::Burned => "burned",
            TransferState::MessageExtracted => "message_extracted",
            TransferState::AttestationPending => "attestation_pending",
            TransferState::AttestationReady => "attestation_ready",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FSM Events (inputs that trigger state transitions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Approval transaction confirmed
    ApprovalConfirmed,
    /// Burn transaction confirmed
    BurnConfirmed,
    /// Message decoded and hashed from the burn receipt
    MessageDecoded,
    /// First oracle request is about to be issued
    PollStarted,
    /// Oracle returned a complete attestation
    AttestationReceived,
    /// Mint transaction confirmed
    MintConfirmed,
    /// Any unrecoverable error
    Fail,
}

/// State transition function
///
/// Given the current state and an event, returns the next state.
/// Invalid transitions return the current state (no change).
pub fn transition(current: TransferState, event: TransferEvent) -> TransferState {
    use TransferEvent::*;
    use TransferState::*;

    match (current, event) {
        (Init, ApprovalConfirmed) => Authorized,
        (Authorized, BurnConfirmed) => Burned,
        (Burned, MessageDecoded) => MessageExtracted,
        (MessageExtracted, PollStarted) => AttestationPending,
        (AttestationPending, AttestationReceived) => AttestationReady,
        (AttestationReady, MintConfirmed) => Completed,

        // Failure is reachable from every non-terminal state
        (Completed, Fail) | (Failed, Fail) => current,
        (_, Fail) => Failed,

        // Invalid transitions - stay in current state
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [TransferState; 8] = [
        TransferState::Init,
        TransferState::Authorized,
        TransferState::Burned,
        TransferState::MessageExtracted,
        TransferState::AttestationPending,
        TransferState::AttestationReady,
        TransferState::Completed,
        TransferState::Failed,
    ];

    const ALL_EVENTS: [TransferEvent; 7] = [
        TransferEvent::ApprovalConfirmed,
        TransferEvent::BurnConfirmed,
        TransferEvent::MessageDecoded,
        TransferEvent::PollStarted,
        TransferEvent::AttestationReceived,
        TransferEvent::MintConfirmed,
        TransferEvent::Fail,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Failed.is_terminal());

        assert!(!TransferState::Init.is_terminal());
        assert!(!TransferState::Authorized.is_terminal());
        assert!(!TransferState::Burned.is_terminal());
        assert!(!TransferState::MessageExtracted.is_terminal());
        assert!(!TransferState::AttestationPending.is_terminal());
        assert!(!TransferState::AttestationReady.is_terminal());
    }

    #[test]
    fn test_state_names_match_serde() {
        for state in ALL_STATES {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(serde_json::from_str::<TransferState>(&json).unwrap(), state);
        }
        assert!(serde_json::from_str::<TransferState>("\"COMPLETED\"").is_err());
    }

    #[test]
    fn test_happy_path() {
        let mut state = TransferState::Init;
        let steps = [
            (TransferEvent::ApprovalConfirmed, TransferState::Authorized),
            (TransferEvent::BurnConfirmed, TransferState::Burned),
            (TransferEvent::MessageDecoded, TransferState::MessageExtracted),
            (TransferEvent::PollStarted, TransferState::AttestationPending),
            (TransferEvent::AttestationReceived, TransferState::AttestationReady),
            (TransferEvent::MintConfirmed, TransferState::Completed),
        ];

        for (event, expected) in steps {
            state = transition(state, event);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_fail_from_every_non_terminal_state() {
        for state in ALL_STATES.into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(transition(state, TransferEvent::Fail), TransferState::Failed);
        }
    }

    #[test]
    fn test_terminal_state_is_stable() {
        for event in ALL_EVENTS {
            assert_eq!(transition(TransferState::Completed, event), TransferState::Completed);
            assert_eq!(transition(TransferState::Failed, event), TransferState::Failed);
        }
    }

    #[test]
    fn test_no_skipping_or_moving_backwards() {
        // Exactly one forward event is accepted per non-terminal state
        for state in ALL_STATES.into_iter().filter(|s| !s.is_terminal()) {
            let forward: Vec<_> = ALL_EVENTS
                .into_iter()
                .filter(|e| *e != TransferEvent::Fail)
                .filter(|e| transition(state, *e) != state)
                .collect();
            assert_eq!(forward.len(), 1, "state {} accepts {:?}", state, forward);
        }

        assert_eq!(transition(TransferState::Init, TransferEvent::BurnConfirmed), TransferState::Init);
        assert_eq!(
            transition(TransferState::Authorized, TransferEvent::MintConfirmed),
            TransferState::Authorized
        );
        assert_eq!(
            transition(TransferState::AttestationReady, TransferEvent::ApprovalConfirmed),
            TransferState::AttestationReady
        );
    }
}

//! Transfer module - main module file
//!
//! This module provides burn-and-mint transfer orchestration: the FSM, the
//! orchestrator, attestation polling, retry policies and the ledger/oracle adapters.

pub mod state;
pub mod types;
pub mod error;
pub mod clock;
pub mod retry;
pub mod poller;
pub mod journal;
pub mod registry;
pub mod coordinator;
pub mod adapters;

// Re-export commonly used types
pub use state::{TransferEvent, TransferState};
pub use types::{CompletionReceipt, DomainId, Transfer, TransferRequest, TxRef};
pub use error::{FailureReason, LedgerError, OracleError, PollError, TransferError};
pub use clock::{Clock, ManualClock, TokioClock};
pub use retry::{Backoff, RetryPolicy};
pub use poller::{AttestationPoller, PollConfig};
pub use journal::{MemoryJournal, NoopJournal, TransferJournal};
pub use registry::CompletionRegistry;
pub use coordinator::{OrchestratorConfig, TransferOrchestrator};

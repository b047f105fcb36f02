//! Transition journal
//!
//! Receives a snapshot of the Transfer after every applied transition and whenever
//! a ledger accepts one of its transactions. A durable journal is all a persistence
//! layer needs to resume transfers after a restart.

use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::transfer::state::TransferState;
use crate::transfer::types::Transfer;

pub trait TransferJournal: Send + Sync {
    fn record(&self, transfer: &Transfer);
}

/// Journal that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl TransferJournal for NoopJournal {
    fn record(&self, _transfer: &Transfer) {}
}

/// In-memory journal keeping every snapshot in order
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<Transfer>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Transfer> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// States recorded for `id`, oldest first, with repeats collapsed
    pub fn states(&self, id: Uuid) -> Vec<TransferState> {
        let mut states: Vec<TransferState> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.id == id)
            .map(|t| t.state)
            .collect();
        states.dedup();
        states
    }

    /// Most recent snapshot of `id`
    pub fn last(&self, id: Uuid) -> Option<Transfer> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|t| t.id == id)
            .cloned()
    }
}

impl TransferJournal for MemoryJournal {
    fn record(&self, transfer: &Transfer) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transfer.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::{DomainId, TransferRequest};
    use ethers::types::{Address, U256};

    fn transfer() -> Transfer {
        Transfer::new(TransferRequest {
            source_domain: DomainId::ETHEREUM,
            destination_domain: DomainId::BASE,
            asset: Address::repeat_byte(0x1c),
            amount: U256::from(10u64),
            recipient: "0x00000000000000000000000000000000000000aa".to_string(),
        })
    }

    #[test]
    fn test_memory_journal_keeps_order() {
        let journal = MemoryJournal::new();
        let mut a = transfer();
        let b = transfer();

        journal.record(&a);
        journal.record(&b);
        journal.record(&a);
        a.state = TransferState::Authorized;
        journal.record(&a);

        assert_eq!(journal.entries().len(), 4);
        assert_eq!(journal.states(a.id), vec![TransferState::Init, TransferState::Authorized]);
        assert_eq!(journal.last(a.id).unwrap().state, TransferState::Authorized);
        assert_eq!(journal.states(b.id), vec![TransferState::Init]);
        assert!(journal.last(Uuid::nil()).is_none());
    }
}

//! Completion registry
//!
//! One slot per message hash holding the completion transaction once a ledger has
//! (possibly) accepted it. A slot is locked only by transfers minting that same
//! message; different messages never wait on each other.

use ethers::types::H256;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::transfer::types::TxRef;

pub type CompletionSlot = Arc<tokio::sync::Mutex<Option<TxRef>>>;

#[derive(Default)]
struct RegistryInner {
    slots: HashMap<H256, CompletionSlot>,
    /// Completed message hashes, oldest first
    completed: VecDeque<H256>,
}

pub struct CompletionRegistry {
    /// Completed entries kept for late duplicates before the oldest is evicted
    capacity: usize,
    inner: Mutex<RegistryInner>,
}

impl CompletionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Slot for `hash`, created empty on first use
    pub fn slot(&self, hash: H256) -> CompletionSlot {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.slots.entry(hash).or_default().clone()
    }

    /// Drop the slot for `hash` if nothing was ever submitted and nobody else holds it
    pub fn release(&self, hash: H256, slot: CompletionSlot) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = inner.slots.get(&hash) else {
            return;
        };
        // Map and `slot` are the only holders
        let unused = Arc::ptr_eq(current, &slot)
            && Arc::strong_count(&slot) == 2
            && slot.try_lock().map(|tx| tx.is_none()).unwrap_or(false);
        if unused {
            inner.slots.remove(&hash);
        }
    }

    /// Mark `hash` as minted; the oldest completed entries beyond capacity are evicted
    pub fn complete(&self, hash: H256) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.completed.contains(&hash) {
            return;
        }
        inner.completed.push_back(hash);
        while inner.completed.len() > self.capacity {
            if let Some(oldest) = inner.completed.pop_front() {
                inner.slots.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

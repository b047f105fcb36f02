//! Collaborator traits
//!
//! Defines the interfaces the orchestrator drives: one ledger client per chain and
//! the attestation oracle.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

use crate::transfer::error::{LedgerError, OracleError};
use crate::transfer::types::{DomainId, TxRef};

/// Contract call submitted through [`LedgerClient::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// Burn `amount` of `burn_token` on the source chain, addressed to `mint_recipient`
    DepositForBurn {
        amount: U256,
        destination_domain: DomainId,
        mint_recipient: H256,
        burn_token: Address,
    },
    /// Present a message and its attestation on the destination chain
    ReceiveMessage { message: Bytes, attestation: Bytes },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::DepositForBurn { .. } => "depositForBurn",
            ContractCall::ReceiveMessage { .. } => "receiveMessage",
        }
    }
}

/// Ledger client - one instance per chain
///
/// `authorize` and `submit` return as soon as the node accepts the transaction.
/// `LedgerError::Unknown` carries the hash of a transaction that may have been
/// accepted; any other error from either means nothing was broadcast.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain name for logging
    fn name(&self) -> &str;

    fn domain(&self) -> DomainId;

    /// Approve `spender` to move `amount` of `token` from the signer's account
    async fn authorize(&self, token: Address, spender: Address, amount: U256) -> Result<TxRef, LedgerError>;

    async fn submit(&self, call: ContractCall) -> Result<TxRef, LedgerError>;

    /// Wait for the transaction to confirm
    ///
    /// Returns `Unconfirmed` if the wait window ran out, which callers resolve
    /// with [`LedgerClient::get_receipt`].
    async fn await_confirmation(&self, tx: &TxRef) -> Result<TransactionReceipt, LedgerError>;

    /// Receipt of a mined transaction, `None` if not mined yet
    async fn get_receipt(&self, tx: &TxRef) -> Result<Option<TransactionReceipt>, LedgerError>;
}

/// Attestation status reported by the oracle for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatus {
    Pending,
    Complete(Bytes),
    /// Permanent rejection, carrying the oracle's status string
    Rejected(String),
}

#[async_trait]
pub trait AttestationOracle: Send + Sync {
    /// Issue a single request for the attestation of `message_hash`
    async fn fetch_attestation(&self, message_hash: H256) -> Result<AttestationStatus, OracleError>;
}

//! Adapters module - ledger and attestation oracle clients

pub mod traits;
pub mod mock;
pub mod evm;
pub mod iris;

pub use traits::{AttestationOracle, AttestationStatus, ContractCall, LedgerClient};
pub use mock::{MockLedgerClient, MockOracle};

pub use evm::{EvmChainSettings, EvmLedgerClient};
pub use iris::IrisOracleClient;

//! EVM ledger client
//!
//! Signs approve / depositForBurn / receiveMessage transactions locally, broadcasts
//! the raw bytes and tracks them to confirmation. The hash is known before the
//! broadcast, so a broadcast lost in transit is still reported against its transaction.

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::prelude::*;
use ethers::providers::MiddlewareError;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::traits::{ContractCall, LedgerClient};
use crate::transfer::error::LedgerError;
use crate::transfer::types::{DomainId, TxRef};

type EvmClient = SignerMiddleware<Provider<Http>, LocalWallet>;

const APPROVE_SIG: &str = "approve(address,uint256)";
const DEPOSIT_FOR_BURN_SIG: &str = "depositForBurn(uint256,uint32,bytes32,address)";
const RECEIVE_MESSAGE_SIG: &str = "receiveMessage(bytes,bytes)";

/// Per-chain connection settings
#[derive(Debug, Clone)]
pub struct EvmChainSettings {
    pub name: String,
    pub domain: DomainId,
    pub rpc_url: Url,
    /// Contract receiving `depositForBurn`
    pub token_messenger: Address,
    /// Contract receiving `receiveMessage`
    pub message_transmitter: Address,
    /// Block depth required before a receipt counts as confirmed
    pub confirmations: u64,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

pub struct EvmLedgerClient {
    settings: EvmChainSettings,
    client: Arc<EvmClient>,
    /// Next nonce of the signer account, `None` until read from the node.
    /// Held from nonce assignment through broadcast.
    next_nonce: tokio::sync::Mutex<Option<U256>>,
}

impl EvmLedgerClient {
    /// Connect to the node and bind `wallet` to its chain id
    pub async fn connect(settings: EvmChainSettings, wallet: LocalWallet) -> Result<Self, LedgerError> {
        let provider = Provider::new(Http::new(settings.rpc_url.clone())).interval(settings.poll_interval);
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| LedgerError::Network(format!("{}: eth_chainId failed: {}", settings.name, e)))?;

        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let address = wallet.address();
        let client = SignerMiddleware::new(provider, wallet);

        log::info!(
            "[{}] connected: domain={}, chain_id={}, signer={:?}",
            settings.name,
            settings.domain,
            chain_id,
            address
        );

        Ok(Self {
            settings,
            client: Arc::new(client),
            next_nonce: tokio::sync::Mutex::new(None),
        })
    }

    fn target(&self, call: &ContractCall) -> Address {
        match call {
            ContractCall::DepositForBurn { .. } => self.settings.token_messenger,
            ContractCall::ReceiveMessage { .. } => self.settings.message_transmitter,
        }
    }

    async fn send(&self, to: Address, calldata: Bytes, what: &str) -> Result<TxRef, LedgerError> {
        let mut next_nonce = self.next_nonce.lock().await;
        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self
                .client
                .get_transaction_count(self.client.address(), Some(BlockNumber::Pending.into()))
                .await
                .map_err(|e| LedgerError::Network(format!("{}: nonce lookup failed: {}", self.settings.name, e)))?,
        };

        let mut tx: TypedTransaction = TransactionRequest::new().to(to).data(calldata).nonce(nonce).into();
        self.client
            .fill_transaction(&mut tx, None)
            .await
            .map_err(classify_prepare_error)?;
        let signature = self
            .client
            .signer()
            .sign_transaction(&tx)
            .await
            .map_err(|e| LedgerError::Rejected(format!("signing failed: {}", e)))?;
        let signed = TxRef::new(self.settings.domain, tx.hash(&signature));

        match self.client.send_raw_transaction(tx.rlp_signed(&signature)).await {
            Ok(_) => {
                *next_nonce = Some(nonce + U256::one());
                log::info!("[{}] {} submitted: {} (nonce {})", self.settings.name, what, signed, nonce);
                Ok(signed)
            }
            Err(e) => {
                // Re-read from the node before the next broadcast
                *next_nonce = None;
                let err = classify_broadcast_error(e, signed);
                log::warn!("[{}] {} broadcast failed: {}", self.settings.name, what, err);
                Err(err)
            }
        }
    }

    async fn is_confirmed(&self, receipt: &TransactionReceipt) -> Result<bool, LedgerError> {
        if self.settings.confirmations <= 1 {
            return Ok(true);
        }
        let Some(mined) = receipt.block_number else {
            return Ok(false);
        };
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        Ok(head.as_u64().saturating_sub(mined.as_u64()) + 1 >= self.settings.confirmations)
    }
}

/// Failure while estimating gas or pricing, before anything is signed
fn classify_prepare_error<E: MiddlewareError>(err: E) -> LedgerError {
    match err.as_error_response() {
        Some(rpc) => LedgerError::Rejected(rpc.message.clone()),
        None => LedgerError::Network(err.to_string()),
    }
}

/// A JSON-RPC error means the node answered and refused the transaction.
/// Anything else leaves the signed transaction's fate unknown.
fn classify_broadcast_error<E: MiddlewareError>(err: E, tx: TxRef) -> LedgerError {
    match err.as_error_response() {
        Some(rpc) if rpc.message.contains("already known") => LedgerError::Unknown(tx),
        Some(rpc) => LedgerError::Rejected(rpc.message.clone()),
        None => LedgerError::Unknown(tx),
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn with_selector(signature: &str, args: &[Token]) -> Bytes {
    let mut calldata = selector(signature).to_vec();
    calldata.extend_from_slice(&abi::encode(args));
    Bytes::from(calldata)
}

pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    with_selector(APPROVE_SIG, &[Token::Address(spender), Token::Uint(amount)])
}

pub fn encode_call(call: &ContractCall) -> Bytes {
    match call {
        ContractCall::DepositForBurn {
            amount,
            destination_domain,
            mint_recipient,
            burn_token,
        } => with_selector(
            DEPOSIT_FOR_BURN_SIG,
            &[
                Token::Uint(*amount),
                Token::Uint(U256::from(destination_domain.as_u32())),
                Token::FixedBytes(mint_recipient.as_bytes().to_vec()),
                Token::Address(*burn_token),
            ],
        ),
        ContractCall::ReceiveMessage { message, attestation } => with_selector(
            RECEIVE_MESSAGE_SIG,
            &[Token::Bytes(message.to_vec()), Token::Bytes(attestation.to_vec())],
        ),
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn domain(&self) -> DomainId {
        self.settings.domain
    }

    async fn authorize(&self, token: Address, spender: Address, amount: U256) -> Result<TxRef, LedgerError> {
        self.send(token, approve_calldata(spender, amount), "approve").await
    }

    async fn submit(&self, call: ContractCall) -> Result<TxRef, LedgerError> {
        self.send(self.target(&call), encode_call(&call), call.name()).await
    }

    async fn await_confirmation(&self, tx: &TxRef) -> Result<TransactionReceipt, LedgerError> {
        let deadline = Instant::now() + self.settings.confirmation_timeout;
        let mut seen = false;
        let mut last_error: Option<String> = None;

        loop {
            match self.client.get_transaction_receipt(tx.hash).await {
                Ok(Some(receipt)) => {
                    seen = true;
                    if self.is_confirmed(&receipt).await? {
                        log::info!(
                            "[{}] {} confirmed in block {:?}",
                            self.settings.name,
                            tx,
                            receipt.block_number
                        );
                        return Ok(receipt);
                    }
                }
                Ok(None) if !seen => match self.client.get_transaction(tx.hash).await {
                    Ok(known) => seen = known.is_some(),
                    Err(e) => last_error = Some(e.to_string()),
                },
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[{}] receipt query for {} failed: {}", self.settings.name, tx, e);
                    last_error = Some(e.to_string());
                }
            }

            if Instant::now() >= deadline {
                return Err(match (seen, last_error) {
                    (true, _) => LedgerError::Unconfirmed(*tx),
                    (false, Some(e)) => LedgerError::Network(e),
                    (false, None) => LedgerError::Dropped(*tx),
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn get_receipt(&self, tx: &TxRef) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.client
            .get_transaction_receipt(tx.hash)
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::ProviderError;

    #[test]
    fn test_lost_broadcast_keeps_tx_hash() {
        let tx = TxRef::new(DomainId::ETHEREUM, TxHash::repeat_byte(0x3c));
        let err = classify_broadcast_error(ProviderError::CustomError("request timed out".to_string()), tx);

        assert_eq!(err, LedgerError::Unknown(tx));
        assert!(!err.is_retryable());
        assert_eq!(err.possibly_accepted(), Some(tx));
    }

    #[test]
    fn test_prepare_transport_error_is_retryable() {
        let err = classify_prepare_error(ProviderError::CustomError("connection refused".to_string()));
        assert!(matches!(err, LedgerError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_approve_calldata() {
        let spender: Address = "0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5".parse().unwrap();
        let calldata = approve_calldata(spender, U256::from(1_000_000u64));

        assert_eq!(&calldata[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(calldata.len(), 4 + 64);
        assert_eq!(&calldata[16..36], spender.as_bytes());
        assert_eq!(U256::from_big_endian(&calldata[36..68]), U256::from(1_000_000u64));
    }

    #[test]
    fn test_deposit_for_burn_calldata() {
        let recipient = H256::repeat_byte(0xaa);
        let token = Address::repeat_byte(0x1c);
        let calldata = encode_call(&ContractCall::DepositForBurn {
            amount: U256::from(42u64),
            destination_domain: DomainId::BASE,
            mint_recipient: recipient,
            burn_token: token,
        });

        assert_eq!(&calldata[..4], &selector(DEPOSIT_FOR_BURN_SIG));
        assert_eq!(calldata.len(), 4 + 4 * 32);
        assert_eq!(U256::from_big_endian(&calldata[4..36]), U256::from(42u64));
        assert_eq!(U256::from_big_endian(&calldata[36..68]), U256::from(6u64));
        assert_eq!(&calldata[68..100], recipient.as_bytes());
        assert_eq!(&calldata[112..132], token.as_bytes());
    }

    #[test]
    fn test_receive_message_calldata() {
        let message = Bytes::from(vec![0x01; 248]);
        let attestation = Bytes::from(vec![0x02; 65]);
        let calldata = encode_call(&ContractCall::ReceiveMessage {
            message: message.clone(),
            attestation: attestation.clone(),
        });

        assert_eq!(&calldata[..4], &selector(RECEIVE_MESSAGE_SIG));
        let decoded = abi::decode(&[abi::ParamType::Bytes, abi::ParamType::Bytes], &calldata[4..]).unwrap();
        assert_eq!(decoded, vec![Token::Bytes(message.to_vec()), Token::Bytes(attestation.to_vec())]);
    }
}

//! Mock collaborators for testing
//!
//! `MockLedgerClient` accepts every call by default, mines instantly and emits a
//! well-formed `MessageSent` log for each burn. Failures, reverts, dropped
//! transactions and custom logs are scripted per operation.

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, TxHash, H256, U256, U64};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::traits::{AttestationOracle, AttestationStatus, ContractCall, LedgerClient};
use crate::message::{address_to_bytes32, event_topic, BurnMessage, ProtocolMessage, MESSAGE_SENT_EVENT};
use crate::transfer::error::{LedgerError, OracleError};
use crate::transfer::types::{DomainId, TxRef};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ledger operation a failure can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Authorize,
    Submit,
    AwaitConfirmation,
    GetReceipt,
}

/// Transaction kind, for revert scripting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Approve,
    DepositForBurn,
    ReceiveMessage,
}

#[derive(Default)]
struct LedgerInner {
    next_tx: u64,
    next_nonce: u64,
    scripted: HashMap<LedgerOp, VecDeque<LedgerError>>,
    always_fail: HashMap<LedgerOp, LedgerError>,
    reverting: HashSet<TxKind>,
    dropping: HashSet<TxKind>,
    failing_mints: HashMap<H256, LedgerError>,
    burn_logs: Option<Vec<Log>>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    authorizations: Vec<(Address, Address, U256)>,
    submissions: Vec<ContractCall>,
    confirmations: Vec<TxRef>,
    receipt_queries: Vec<TxRef>,
}

/// Mock ledger client for testing
pub struct MockLedgerClient {
    name: String,
    domain: DomainId,
    inner: Mutex<LedgerInner>,
}

impl MockLedgerClient {
    pub fn new(name: &str, domain: DomainId) -> Self {
        Self {
            name: name.to_string(),
            domain,
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Fail the next call of `op` with `err`. Calls queue up in order.
    ///
    /// An `Unconfirmed` entry is reported against the transaction being awaited.
    /// An `Unknown` entry for `Authorize`/`Submit` accepts the transaction and
    /// then reports it as a lost broadcast.
    pub fn fail_next(&self, op: LedgerOp, err: LedgerError) {
        lock(&self.inner).scripted.entry(op).or_default().push_back(err);
    }

    /// Fail every call of `op` with `err`
    pub fn fail_always(&self, op: LedgerOp, err: LedgerError) {
        lock(&self.inner).always_fail.insert(op, err);
    }

    /// Drop every scripted failure
    pub fn clear_failures(&self) {
        let mut inner = lock(&self.inner);
        inner.scripted.clear();
        inner.always_fail.clear();
    }

    /// Mine transactions of `kind` with a failed status
    pub fn revert(&self, kind: TxKind) {
        lock(&self.inner).reverting.insert(kind);
    }

    /// Accept transactions of `kind` but never mine them
    pub fn drop_tx(&self, kind: TxKind) {
        lock(&self.inner).dropping.insert(kind);
    }

    /// Refuse every `receiveMessage` whose burn mints to `mint_recipient`
    pub fn fail_mints_to(&self, mint_recipient: H256, err: LedgerError) {
        lock(&self.inner).failing_mints.insert(mint_recipient, err);
    }

    /// Replace the logs attached to burn receipts
    pub fn set_burn_logs(&self, logs: Vec<Log>) {
        lock(&self.inner).burn_logs = Some(logs);
    }

    pub fn authorizations(&self) -> Vec<(Address, Address, U256)> {
        lock(&self.inner).authorizations.clone()
    }

    pub fn submissions(&self) -> Vec<ContractCall> {
        lock(&self.inner).submissions.clone()
    }

    pub fn burn_count(&self) -> usize {
        self.count_submissions(|call| matches!(call, ContractCall::DepositForBurn { .. }))
    }

    pub fn completion_count(&self) -> usize {
        self.count_submissions(|call| matches!(call, ContractCall::ReceiveMessage { .. }))
    }

    pub fn confirmations(&self) -> Vec<TxRef> {
        lock(&self.inner).confirmations.clone()
    }

    pub fn receipt_queries(&self) -> Vec<TxRef> {
        lock(&self.inner).receipt_queries.clone()
    }

    fn count_submissions(&self, pred: impl Fn(&ContractCall) -> bool) -> usize {
        lock(&self.inner).submissions.iter().filter(|call| pred(call)).count()
    }

    fn scripted_failure(inner: &mut LedgerInner, op: LedgerOp) -> Option<LedgerError> {
        if let Some(err) = inner.scripted.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(err);
        }
        inner.always_fail.get(&op).cloned()
    }

    fn accept(&self, inner: &mut LedgerInner, kind: TxKind, logs: Vec<Log>) -> TxRef {
        inner.next_tx += 1;
        let hash = TxHash::from_low_u64_be(((self.domain.as_u32() as u64) << 32) | inner.next_tx);
        if inner.dropping.contains(&kind) {
            return TxRef::new(self.domain, hash);
        }
        let status = if inner.reverting.contains(&kind) { 0u64 } else { 1u64 };
        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(inner.next_tx)),
            status: Some(U64::from(status)),
            logs,
            ..Default::default()
        };
        inner.receipts.insert(hash, receipt);
        TxRef::new(self.domain, hash)
    }

    fn burn_logs_for(&self, inner: &mut LedgerInner, call: &ContractCall) -> Vec<Log> {
        if let Some(logs) = &inner.burn_logs {
            return logs.clone();
        }
        let ContractCall::DepositForBurn {
            amount,
            destination_domain,
            mint_recipient,
            burn_token,
        } = call
        else {
            return Vec::new();
        };

        let nonce = inner.next_nonce;
        inner.next_nonce += 1;
        let message = burn_message(
            self.domain,
            *destination_domain,
            nonce,
            *burn_token,
            *mint_recipient,
            *amount,
        );
        vec![message_sent_log(&message)]
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> DomainId {
        self.domain
    }

    async fn authorize(&self, token: Address, spender: Address, amount: U256) -> Result<TxRef, LedgerError> {
        log::debug!("[{}] approve({:?}, spender={:?}, amount={})", self.name, token, spender, amount);
        let mut inner = lock(&self.inner);
        let failure = Self::scripted_failure(&mut inner, LedgerOp::Authorize);
        if let Some(err) = failure.as_ref().filter(|e| e.possibly_accepted().is_none()) {
            return Err(err.clone());
        }
        inner.authorizations.push((token, spender, amount));
        let tx = self.accept(&mut inner, TxKind::Approve, Vec::new());
        match failure {
            Some(_) => Err(LedgerError::Unknown(tx)),
            None => Ok(tx),
        }
    }

    async fn submit(&self, call: ContractCall) -> Result<TxRef, LedgerError> {
        log::debug!("[{}] submit {}", self.name, call.name());
        let mut inner = lock(&self.inner);
        let failure = Self::scripted_failure(&mut inner, LedgerOp::Submit);
        if let Some(err) = failure.as_ref().filter(|e| e.possibly_accepted().is_none()) {
            return Err(err.clone());
        }
        if let ContractCall::ReceiveMessage { message, .. } = &call {
            let recipient = ProtocolMessage::decode(message)
                .and_then(|m| BurnMessage::decode(&m.body))
                .map(|burn| burn.mint_recipient);
            if let Some(err) = recipient.ok().and_then(|r| inner.failing_mints.get(&r).cloned()) {
                return Err(err);
            }
        }
        let (kind, logs) = match &call {
            ContractCall::DepositForBurn { .. } => (TxKind::DepositForBurn, self.burn_logs_for(&mut inner, &call)),
            ContractCall::ReceiveMessage { .. } => (TxKind::ReceiveMessage, Vec::new()),
        };
        inner.submissions.push(call);
        let tx = self.accept(&mut inner, kind, logs);
        match failure {
            Some(_) => Err(LedgerError::Unknown(tx)),
            None => Ok(tx),
        }
    }

    async fn await_confirmation(&self, tx: &TxRef) -> Result<TransactionReceipt, LedgerError> {
        log::debug!("[{}] await_confirmation({})", self.name, tx);
        let mut inner = lock(&self.inner);
        inner.confirmations.push(*tx);
        if let Some(err) = Self::scripted_failure(&mut inner, LedgerOp::AwaitConfirmation) {
            return Err(match err {
                LedgerError::Unconfirmed(_) => LedgerError::Unconfirmed(*tx),
                other => other,
            });
        }
        inner
            .receipts
            .get(&tx.hash)
            .cloned()
            .ok_or(LedgerError::Dropped(*tx))
    }

    async fn get_receipt(&self, tx: &TxRef) -> Result<Option<TransactionReceipt>, LedgerError> {
        log::debug!("[{}] get_receipt({})", self.name, tx);
        let mut inner = lock(&self.inner);
        inner.receipt_queries.push(*tx);
        if let Some(err) = Self::scripted_failure(&mut inner, LedgerOp::GetReceipt) {
            return Err(err);
        }
        Ok(inner.receipts.get(&tx.hash).cloned())
    }
}

#[derive(Default)]
struct OracleInner {
    script: VecDeque<Result<AttestationStatus, OracleError>>,
    requests: Vec<H256>,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// Mock attestation oracle
///
/// Replies from a scripted queue; once it is drained every request is `Pending`.
#[derive(Default)]
pub struct MockOracle {
    inner: Mutex<OracleInner>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Result<AttestationStatus, OracleError>) {
        lock(&self.inner).script.push_back(reply);
    }

    /// Reply `pending` `n` times, then `complete` with `attestation`
    pub fn complete_after(&self, n: usize, attestation: Bytes) {
        for _ in 0..n {
            self.push(Ok(AttestationStatus::Pending));
        }
        self.push(Ok(AttestationStatus::Complete(attestation)));
    }

    /// Cancel `token` while serving the `n`-th request
    pub fn cancel_after(&self, n: usize, token: CancellationToken) {
        lock(&self.inner).cancel_after = Some((n, token));
    }

    /// Every message hash requested so far, in order
    pub fn requests(&self) -> Vec<H256> {
        lock(&self.inner).requests.clone()
    }
}

#[async_trait]
impl AttestationOracle for MockOracle {
    async fn fetch_attestation(&self, message_hash: H256) -> Result<AttestationStatus, OracleError> {
        let mut inner = lock(&self.inner);
        inner.requests.push(message_hash);
        if let Some((n, token)) = &inner.cancel_after {
            if inner.requests.len() >= *n {
                token.cancel();
            }
        }
        inner.script.pop_front().unwrap_or(Ok(AttestationStatus::Pending))
    }
}

/// `MessageSent(bytes)` log carrying `message`
pub fn message_sent_log(message: &Bytes) -> Log {
    Log {
        topics: vec![event_topic(MESSAGE_SENT_EVENT)],
        data: Bytes::from(abi::encode(&[Token::Bytes(message.to_vec())])),
        ..Default::default()
    }
}

/// Encoded burn message as the source chain would emit it
pub fn burn_message(
    source: DomainId,
    destination: DomainId,
    nonce: u64,
    burn_token: Address,
    mint_recipient: H256,
    amount: U256,
) -> Bytes {
    let body = BurnMessage {
        version: 0,
        burn_token: address_to_bytes32(burn_token),
        mint_recipient,
        amount,
        message_sender: H256::repeat_byte(0x11),
    };
    ProtocolMessage {
        version: 0,
        source_domain: source,
        destination_domain: destination,
        nonce,
        sender: H256::repeat_byte(0x9f),
        recipient: H256::repeat_byte(0x78),
        destination_caller: H256::zero(),
        body: body.encode(),
    }
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::extract_message;

    fn burn_call() -> ContractCall {
        ContractCall::DepositForBurn {
            amount: U256::from(500u64),
            destination_domain: DomainId::BASE,
            mint_recipient: H256::repeat_byte(0xaa),
            burn_token: Address::repeat_byte(0x1c),
        }
    }

    #[tokio::test]
    async fn test_mock_burn_emits_message() {
        let ledger = MockLedgerClient::new("sepolia", DomainId::ETHEREUM);
        let tx = ledger.submit(burn_call()).await.unwrap();
        let receipt = ledger.await_confirmation(&tx).await.unwrap();

        assert_eq!(receipt.status, Some(U64::from(1)));
        let extracted = extract_message(&receipt, MESSAGE_SENT_EVENT).unwrap();
        let message = ProtocolMessage::decode(&extracted.bytes).unwrap();
        assert_eq!(message.destination_domain, DomainId::BASE);
        assert_eq!(BurnMessage::decode(&message.body).unwrap().amount, U256::from(500u64));
        assert_eq!(ledger.burn_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let ledger = MockLedgerClient::new("sepolia", DomainId::ETHEREUM);
        ledger.fail_next(LedgerOp::Submit, LedgerError::Network("reset".to_string()));

        assert!(ledger.submit(burn_call()).await.is_err());
        assert!(ledger.submit(burn_call()).await.is_ok());
        assert_eq!(ledger.burn_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_unconfirmed_reports_awaited_tx() {
        let ledger = MockLedgerClient::new("sepolia", DomainId::ETHEREUM);
        let tx = ledger.submit(burn_call()).await.unwrap();
        ledger.fail_next(
            LedgerOp::AwaitConfirmation,
            LedgerError::Unconfirmed(TxRef::new(DomainId::ETHEREUM, TxHash::zero())),
        );

        assert_eq!(ledger.await_confirmation(&tx).await.unwrap_err(), LedgerError::Unconfirmed(tx));
        assert!(ledger.get_receipt(&tx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_lost_broadcast_is_accepted() {
        let ledger = MockLedgerClient::new("sepolia", DomainId::ETHEREUM);
        ledger.fail_next(
            LedgerOp::Submit,
            LedgerError::Unknown(TxRef::new(DomainId::ETHEREUM, TxHash::zero())),
        );

        let err = ledger.submit(burn_call()).await.unwrap_err();
        let tx = err.possibly_accepted().unwrap();
        assert_ne!(tx.hash, TxHash::zero());
        assert_eq!(ledger.burn_count(), 1);
        assert!(ledger.get_receipt(&tx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_dropped_tx_never_mines() {
        let ledger = MockLedgerClient::new("sepolia", DomainId::ETHEREUM);
        ledger.drop_tx(TxKind::DepositForBurn);

        let tx = ledger.submit(burn_call()).await.unwrap();
        assert_eq!(ledger.await_confirmation(&tx).await.unwrap_err(), LedgerError::Dropped(tx));
        assert!(ledger.get_receipt(&tx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_oracle_defaults_to_pending() {
        let oracle = MockOracle::new();
        oracle.complete_after(1, Bytes::from(vec![9u8]));

        assert_eq!(oracle.fetch_attestation(H256::zero()).await.unwrap(), AttestationStatus::Pending);
        assert_eq!(
            oracle.fetch_attestation(H256::zero()).await.unwrap(),
            AttestationStatus::Complete(Bytes::from(vec![9u8]))
        );
        assert_eq!(oracle.fetch_attestation(H256::zero()).await.unwrap(), AttestationStatus::Pending);
        assert_eq!(oracle.requests().len(), 3);
    }
}

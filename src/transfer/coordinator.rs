//! Transfer Orchestrator
//!
//! Drives a burn-and-mint transfer through the FSM:
//! approve -> burn -> extract message -> poll attestation -> mint.
//!
//! Every on-chain effect is recorded on the Transfer the moment the ledger accepts
//! it. A step that finds its transaction already recorded only confirms it, so a
//! retried or resumed transfer never repeats an approval, burn or mint.

use ethers::types::{Address, Bytes, TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::logging::{failure_event, transition_event};
use crate::message::{
    address_to_bytes32, canonical_address, extract_message, message_hash, BurnMessage, ProtocolMessage,
    MESSAGE_SENT_EVENT,
};
use crate::transfer::adapters::{AttestationOracle, ContractCall, LedgerClient};
use crate::transfer::clock::Clock;
use crate::transfer::error::{FailureReason, LedgerError, TransferError};
use crate::transfer::journal::{NoopJournal, TransferJournal};
use crate::transfer::poller::{AttestationPoller, PollConfig};
use crate::transfer::registry::CompletionRegistry;
use crate::transfer::retry::{retry_with_backoff, RetryPolicy};
use crate::transfer::state::{TransferEvent, TransferState};
use crate::transfer::types::{CompletionReceipt, Transfer, TransferRequest, TxRef};

pub const DEFAULT_COMPLETION_REGISTRY_CAPACITY: usize = 10_000;

/// Validated orchestrator parameters
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Spender approved on the source chain; receives `depositForBurn`
    pub token_messenger: Address,
    pub burn_event_signature: String,
    pub approval_retry: RetryPolicy,
    pub burn_retry: RetryPolicy,
    /// Used for confirmation waits and receipt re-queries
    pub confirmation_retry: RetryPolicy,
    pub completion_retry: RetryPolicy,
    pub poll: PollConfig,
    /// Completed message hashes remembered to absorb late duplicates
    pub completion_registry_capacity: usize,
}

impl OrchestratorConfig {
    pub fn new(token_messenger: Address) -> Self {
        Self {
            token_messenger,
            burn_event_signature: MESSAGE_SENT_EVENT.to_string(),
            approval_retry: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(10)),
            burn_retry: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(10)),
            confirmation_retry: RetryPolicy::fixed(5, Duration::from_secs(3)),
            completion_retry: RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(30)),
            poll: PollConfig::default(),
            completion_registry_capacity: DEFAULT_COMPLETION_REGISTRY_CAPACITY,
        }
    }
}

/// Transfer Orchestrator - drives transfers between one source and one destination ledger
///
/// Safe to share across tasks running independent transfers.
pub struct TransferOrchestrator {
    source: Arc<dyn LedgerClient>,
    destination: Arc<dyn LedgerClient>,
    poller: AttestationPoller,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    journal: Arc<dyn TransferJournal>,
    cancel: CancellationToken,
    /// message hash -> accepted completion tx
    completions: CompletionRegistry,
}

impl TransferOrchestrator {
    pub fn new(
        source: Arc<dyn LedgerClient>,
        destination: Arc<dyn LedgerClient>,
        oracle: Arc<dyn AttestationOracle>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let poller = AttestationPoller::new(oracle, clock.clone(), config.poll.clone());
        let completions = CompletionRegistry::new(config.completion_registry_capacity);
        Self {
            source,
            destination,
            poller,
            clock,
            config,
            journal: Arc::new(NoopJournal),
            cancel: CancellationToken::new(),
            completions,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn TransferJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Use `token` to abort attestation polling
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a transfer for `request` and run it to completion or failure
    pub async fn execute(&self, request: TransferRequest) -> Result<CompletionReceipt, TransferError> {
        let mut transfer = Transfer::new(request);
        log::info!(
            "Created transfer: {} ({} -> {}, amount={}, recipient={})",
            transfer.id,
            transfer.source_domain,
            transfer.destination_domain,
            transfer.amount,
            transfer.recipient
        );
        self.journal.record(&transfer);
        self.run(&mut transfer).await
    }

    /// Drive an existing transfer from its current state until it is terminal
    pub async fn run(&self, transfer: &mut Transfer) -> Result<CompletionReceipt, TransferError> {
        loop {
            match transfer.state {
                TransferState::Init => self.step_init(transfer).await?,
                TransferState::Authorized => self.step_authorized(transfer).await?,
                TransferState::Burned => self.step_burned(transfer).await?,
                TransferState::MessageExtracted => self.step_message_extracted(transfer)?,
                TransferState::AttestationPending => self.step_attestation_pending(transfer).await?,
                TransferState::AttestationReady => self.step_attestation_ready(transfer).await?,
                TransferState::Completed => {
                    return transfer.completion_receipt().ok_or_else(|| TransferError {
                        transfer_id: transfer.id,
                        state: TransferState::Completed,
                        reason: FailureReason::ProtocolViolation(
                            "completed transfer is missing receipt fields".to_string(),
                        ),
                    });
                }
                TransferState::Failed => {
                    return Err(transfer.error().unwrap_or(TransferError {
                        transfer_id: transfer.id,
                        state: TransferState::Failed,
                        reason: FailureReason::ProtocolViolation("failed transfer has no recorded reason".to_string()),
                    }));
                }
            }
        }
    }

    /// Step from Init: validate, canonicalize the recipient, approve the spend
    async fn step_init(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        if let Err(msg) = self.validate(transfer) {
            return Err(self.fail(transfer, FailureReason::InvalidRequest(msg)));
        }

        if transfer.recipient_canonical.is_none() {
            match canonical_address(&transfer.recipient) {
                Ok(canonical) => {
                    transfer.recipient_canonical = Some(canonical);
                    transfer.touch();
                }
                Err(e) => return Err(self.fail(transfer, FailureReason::InvalidRecipient(e.to_string()))),
            }
        }

        let tx = match transfer.approval_tx {
            Some(tx) => {
                log::info!("Transfer {}: approval {} already submitted, confirming", transfer.id, tx);
                tx
            }
            None => {
                let source = self.source.as_ref();
                let (token, spender, amount) = (transfer.asset, self.config.token_messenger, transfer.amount);
                let submitted = retry_with_backoff(&self.config.approval_retry, self.clock.as_ref(), "approve", move |_| {
                    source.authorize(token, spender, amount)
                })
                .await;

                match submitted.map_err(|e| (e.possibly_accepted(), e)) {
                    Ok(tx) | Err((Some(tx), _)) => {
                        transfer.approval_tx = Some(tx);
                        self.checkpoint(transfer);
                        tx
                    }
                    Err((None, e)) => return Err(self.fail(transfer, FailureReason::AuthorizationFailed(e.to_string()))),
                }
            }
        };

        if let Err(e) = self.confirm(self.source.as_ref(), tx).await {
            return Err(self.fail(transfer, FailureReason::AuthorizationFailed(e.to_string())));
        }
        self.advance(transfer, TransferEvent::ApprovalConfirmed)
    }

    /// Step from Authorized: burn on the source chain
    async fn step_authorized(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        let tx = match transfer.burn_tx {
            Some(tx) => {
                log::info!("Transfer {}: burn {} already submitted, confirming", transfer.id, tx);
                tx
            }
            None => {
                let Some(mint_recipient) = transfer.recipient_canonical else {
                    return Err(self.fail(
                        transfer,
                        FailureReason::ProtocolViolation("authorized transfer has no canonical recipient".to_string()),
                    ));
                };
                let call = ContractCall::DepositForBurn {
                    amount: transfer.amount,
                    destination_domain: transfer.destination_domain,
                    mint_recipient,
                    burn_token: transfer.asset,
                };

                let source = self.source.as_ref();
                let submitted = retry_with_backoff(&self.config.burn_retry, self.clock.as_ref(), "depositForBurn", move |_| {
                    source.submit(call.clone())
                })
                .await;

                // A lost broadcast is recorded like an accepted one and settled by confirmation
                match submitted.map_err(|e| (e.possibly_accepted(), e)) {
                    Ok(tx) | Err((Some(tx), _)) => {
                        transfer.burn_tx = Some(tx);
                        self.checkpoint(transfer);
                        tx
                    }
                    Err((None, e)) => return Err(self.fail(transfer, FailureReason::BurnFailed(e.to_string()))),
                }
            }
        };

        if let Err(e) = self.confirm(self.source.as_ref(), tx).await {
            return Err(self.fail(transfer, FailureReason::BurnFailed(e.to_string())));
        }
        self.advance(transfer, TransferEvent::BurnConfirmed)
    }

    /// Step from Burned: pull the protocol message out of the burn receipt
    async fn step_burned(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        let Some(burn_tx) = transfer.burn_tx else {
            return Err(self.fail(
                transfer,
                FailureReason::ProtocolViolation("burned transfer has no burn transaction".to_string()),
            ));
        };

        let receipt = match self.fetch_receipt(self.source.as_ref(), burn_tx).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(transfer, FailureReason::ReceiptUnavailable(e.to_string()))),
        };

        let extracted = match extract_message(&receipt, &self.config.burn_event_signature) {
            Ok(extracted) => extracted,
            Err(e) => return Err(self.fail(transfer, FailureReason::ProtocolViolation(e.to_string()))),
        };

        let message = match verify_burn_message(transfer, &extracted.bytes) {
            Ok(message) => message,
            Err(msg) => return Err(self.fail(transfer, FailureReason::ProtocolViolation(msg))),
        };

        log::info!(
            "Transfer {}: extracted message nonce={} hash={:?} ({} bytes)",
            transfer.id,
            message.nonce,
            extracted.hash,
            extracted.bytes.len()
        );
        transfer.message_bytes = Some(extracted.bytes);
        transfer.message_hash = Some(extracted.hash);
        transfer.message_nonce = Some(message.nonce);
        self.advance(transfer, TransferEvent::MessageDecoded)
    }

    fn step_message_extracted(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        self.recorded_message(transfer)?;
        self.advance(transfer, TransferEvent::PollStarted)
    }

    /// Step from AttestationPending: wait for the oracle's proof
    async fn step_attestation_pending(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        let (_, hash) = self.recorded_message(transfer)?;

        match self.poller.wait_for_attestation(hash, &self.cancel).await {
            Ok(attestation) => {
                transfer.attestation = Some(attestation);
                self.advance(transfer, TransferEvent::AttestationReceived)
            }
            Err(e) => Err(self.fail(transfer, e.into())),
        }
    }

    /// Step from AttestationReady: mint on the destination chain
    async fn step_attestation_ready(&self, transfer: &mut Transfer) -> Result<(), TransferError> {
        let (message, hash) = self.recorded_message(transfer)?;
        let Some(attestation) = transfer.attestation.clone() else {
            return Err(self.fail(
                transfer,
                FailureReason::ProtocolViolation("attestation-ready transfer has no attestation".to_string()),
            ));
        };

        let tx = match transfer.completion_tx {
            Some(tx) => {
                log::info!("Transfer {}: completion {} already submitted, confirming", transfer.id, tx);
                tx
            }
            None => {
                // Held across the submit so one message hash is never minted twice
                let slot = self.completions.slot(hash);
                let mut recorded = slot.lock().await;
                let existing = *recorded;
                let submitted = match existing {
                    Some(tx) => {
                        log::warn!("Transfer {}: message {:?} already submitted as {}", transfer.id, hash, tx);
                        Ok(tx)
                    }
                    None => {
                        let destination = self.destination.as_ref();
                        let call = ContractCall::ReceiveMessage { message, attestation };
                        let submitted = retry_with_backoff(
                            &self.config.completion_retry,
                            self.clock.as_ref(),
                            "receiveMessage",
                            move |_| destination.submit(call.clone()),
                        )
                        .await;

                        match submitted.map_err(|e| (e.possibly_accepted(), e)) {
                            Ok(tx) | Err((Some(tx), _)) => {
                                *recorded = Some(tx);
                                Ok(tx)
                            }
                            Err((None, e)) => Err(e),
                        }
                    }
                };
                drop(recorded);

                let tx = match submitted {
                    Ok(tx) => tx,
                    Err(e) => {
                        self.completions.release(hash, slot);
                        return Err(self.fail(transfer, FailureReason::CompletionFailed(e.to_string())));
                    }
                };
                transfer.completion_tx = Some(tx);
                self.checkpoint(transfer);
                tx
            }
        };

        if let Err(e) = self.confirm(self.destination.as_ref(), tx).await {
            return Err(self.fail(transfer, FailureReason::CompletionFailed(e.to_string())));
        }
        self.advance(transfer, TransferEvent::MintConfirmed)?;
        self.completions.complete(hash);

        log::info!(
            "Transfer {} completed: burn={} mint={}",
            transfer.id,
            transfer.burn_tx.map(|tx| tx.to_string()).unwrap_or_default(),
            tx
        );
        Ok(())
    }

    fn validate(&self, transfer: &Transfer) -> Result<(), String> {
        if transfer.amount.is_zero() {
            return Err("amount must be greater than 0".to_string());
        }
        if transfer.source_domain == transfer.destination_domain {
            return Err(format!(
                "source and destination must differ (both {})",
                transfer.source_domain
            ));
        }
        if transfer.source_domain != self.source.domain() {
            return Err(format!(
                "source domain {} is not served by ledger {} ({})",
                transfer.source_domain,
                self.source.name(),
                self.source.domain()
            ));
        }
        if transfer.destination_domain != self.destination.domain() {
            return Err(format!(
                "destination domain {} is not served by ledger {} ({})",
                transfer.destination_domain,
                self.destination.name(),
                self.destination.domain()
            ));
        }
        Ok(())
    }

    /// Confirm an accepted transaction.
    ///
    /// The first attempt waits on the ledger; later attempts only re-query the receipt.
    async fn confirm(&self, ledger: &dyn LedgerClient, tx: TxRef) -> Result<TransactionReceipt, LedgerError> {
        let receipt = retry_with_backoff(
            &self.config.confirmation_retry,
            self.clock.as_ref(),
            "confirm",
            move |attempt| async move {
                if attempt == 1 {
                    ledger.await_confirmation(&tx).await
                } else {
                    ledger.get_receipt(&tx).await?.ok_or(LedgerError::Unconfirmed(tx))
                }
            },
        )
        .await?;

        if matches!(receipt.status, Some(status) if status.is_zero()) {
            log::error!("[{}] {} reverted", ledger.name(), tx);
            return Err(LedgerError::Reverted(tx));
        }
        Ok(receipt)
    }

    async fn fetch_receipt(&self, ledger: &dyn LedgerClient, tx: TxRef) -> Result<TransactionReceipt, LedgerError> {
        retry_with_backoff(
            &self.config.confirmation_retry,
            self.clock.as_ref(),
            "get_receipt",
            move |_| async move { ledger.get_receipt(&tx).await?.ok_or(LedgerError::Unconfirmed(tx)) },
        )
        .await
    }

    /// Recorded message and hash, checked against each other
    fn recorded_message(&self, transfer: &mut Transfer) -> Result<(Bytes, H256), TransferError> {
        let Some((bytes, hash)) = transfer.message_bytes.clone().zip(transfer.message_hash) else {
            return Err(self.fail(
                transfer,
                FailureReason::ProtocolViolation(format!("no message recorded in state {}", transfer.state)),
            ));
        };

        if message_hash(&bytes) != hash {
            return Err(self.fail(
                transfer,
                FailureReason::ProtocolViolation(format!("recorded hash {:?} does not match message bytes", hash)),
            ));
        }
        Ok((bytes, hash))
    }

    fn advance(&self, transfer: &mut Transfer, event: TransferEvent) -> Result<(), TransferError> {
        let from = transfer.state;
        match transfer.apply(event) {
            Ok(_) => {
                log::info!("{}", transition_event(transfer, from));
                self.journal.record(transfer);
                Ok(())
            }
            Err(e) => Err(self.fail(transfer, FailureReason::ProtocolViolation(e.to_string()))),
        }
    }

    /// Record a newly accepted transaction before waiting on it
    fn checkpoint(&self, transfer: &mut Transfer) {
        transfer.touch();
        self.journal.record(transfer);
    }

    fn fail(&self, transfer: &mut Transfer, reason: FailureReason) -> TransferError {
        let err = transfer.fail(reason);
        log::error!("{}", failure_event(&err));
        self.journal.record(transfer);
        err
    }
}

/// Check a decoded burn message against the transfer that produced it
fn verify_burn_message(transfer: &Transfer, bytes: &[u8]) -> Result<ProtocolMessage, String> {
    let message = ProtocolMessage::decode(bytes).map_err(|e| e.to_string())?;
    if message.source_domain != transfer.source_domain {
        return Err(format!(
            "message source domain {} does not match {}",
            message.source_domain, transfer.source_domain
        ));
    }
    if message.destination_domain != transfer.destination_domain {
        return Err(format!(
            "message destination domain {} does not match {}",
            message.destination_domain, transfer.destination_domain
        ));
    }

    let burn = BurnMessage::decode(&message.body).map_err(|e| e.to_string())?;
    if Some(burn.mint_recipient) != transfer.recipient_canonical {
        return Err(format!("mint recipient {:?} does not match {}", burn.mint_recipient, transfer.recipient));
    }
    if burn.amount != transfer.amount {
        return Err(format!("burned amount {} does not match {}", burn.amount, transfer.amount));
    }
    if burn.burn_token != address_to_bytes32(transfer.asset) {
        return Err(format!("burn token {:?} does not match {:?}", burn.burn_token, transfer.asset));
    }
    Ok(message)
}

//! Attestation poller
//!
//! Fixed-interval polling of the attestation oracle until the proof is available.

use ethers::types::{Bytes, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::transfer::adapters::{AttestationOracle, AttestationStatus};
use crate::transfer::clock::Clock;
use crate::transfer::error::PollError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Transient failures tolerated in a row before giving up
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(30 * 60),
            max_consecutive_failures: 5,
        }
    }
}

pub struct AttestationPoller {
    oracle: Arc<dyn AttestationOracle>,
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl AttestationPoller {
    pub fn new(oracle: Arc<dyn AttestationOracle>, clock: Arc<dyn Clock>, config: PollConfig) -> Self {
        Self { oracle, clock, config }
    }

    /// Poll until the attestation for `message_hash` is complete.
    ///
    /// One request per `poll_interval`; never sleeps after the final answer.
    pub async fn wait_for_attestation(
        &self,
        message_hash: H256,
        cancel: &CancellationToken,
    ) -> Result<Bytes, PollError> {
        let started = self.clock.now();
        let mut attempts: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                log::warn!("Attestation polling for {:?} cancelled after {} requests", message_hash, attempts);
                return Err(PollError::Cancelled);
            }

            attempts += 1;
            match self.oracle.fetch_attestation(message_hash).await {
                Ok(AttestationStatus::Complete(attestation)) => {
                    log::info!(
                        "Attestation for {:?} complete after {} requests ({:?})",
                        message_hash,
                        attempts,
                        self.clock.now().duration_since(started)
                    );
                    return Ok(attestation);
                }
                Ok(AttestationStatus::Rejected(status)) => {
                    log::error!("Attestation for {:?} rejected: {}", message_hash, status);
                    return Err(PollError::Rejected(status));
                }
                Ok(AttestationStatus::Pending) => {
                    consecutive_failures = 0;
                    log::debug!("Attestation for {:?} pending (request {})", message_hash, attempts);
                }
                Err(e) if !e.is_transient() => {
                    log::error!("Attestation request for {:?} failed: {}", message_hash, e);
                    return Err(PollError::Unavailable(e.to_string()));
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures > self.config.max_consecutive_failures {
                        log::error!(
                            "Attestation service failed {} times in a row: {}",
                            consecutive_failures,
                            e
                        );
                        return Err(PollError::Unavailable(e.to_string()));
                    }
                    log::warn!(
                        "Attestation request {} for {:?} failed ({}/{}): {}",
                        attempts,
                        message_hash,
                        consecutive_failures,
                        self.config.max_consecutive_failures,
                        e
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::warn!("Attestation polling for {:?} cancelled while waiting", message_hash);
                    return Err(PollError::Cancelled);
                }
                _ = self.clock.sleep(self.config.poll_interval) => {}
            }

            if self.clock.now().duration_since(started) >= self.config.max_wait {
                log::error!(
                    "Attestation for {:?} not ready after {:?} ({} requests)",
                    message_hash,
                    self.config.max_wait,
                    attempts
                );
                return Err(PollError::Timeout(self.config.max_wait));
            }
        }
    }
}

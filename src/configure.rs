use anyhow::{bail, Context, Result};
use config::{Config, ConfigError, Environment, File};
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::message::MESSAGE_SENT_EVENT;
use crate::transfer::adapters::EvmChainSettings;
use crate::transfer::coordinator::{OrchestratorConfig, DEFAULT_COMPLETION_REGISTRY_CAPACITY};
use crate::transfer::poller::PollConfig;
use crate::transfer::retry::{Backoff, RetryPolicy};
use crate::transfer::types::{DomainId, TransferRequest};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Plain variable names accepted in place of built-in defaults
const LEGACY_ENV: &[(&str, &str)] = &[
    ("source.rpc_url", "ETH_TESTNET_RPC"),
    ("source.private_key", "ETH_PRIVATE_KEY"),
    ("destination.rpc_url", "BASE_TESTNET_RPC"),
    ("destination.private_key", "BASE_PRIVATE_KEY"),
    ("transfer.recipient", "RECIPIENT_ADDRESS"),
    ("transfer.amount", "AMOUNT"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub to_file: bool,
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub name: String,
    pub domain: u32,
    pub rpc_url: String,
    pub private_key: String,
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Required on the source chain
    #[serde(default)]
    pub token_messenger: String,
    /// Required on the destination chain
    #[serde(default)]
    pub message_transmitter: String,
    /// Burn token, required on the source chain
    #[serde(default)]
    pub usdc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationSettings {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    pub max_consecutive_failures: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
}

impl RetrySettings {
    fn to_policy(&self, key: &str) -> Result<RetryPolicy> {
        if self.max_attempts == 0 {
            bail!("retry.{}.max_attempts must be at least 1", key);
        }
        let initial = Duration::from_millis(self.initial_delay_ms);
        let policy = match self.backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.max_attempts, initial),
            Backoff::Exponential => {
                RetryPolicy::exponential(self.max_attempts, initial, Duration::from_millis(self.max_delay_ms))
            }
        };
        Ok(match self.max_elapsed_secs {
            Some(secs) => policy.with_max_elapsed(Duration::from_secs(secs)),
            None => policy,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryTable {
    pub approval: RetrySettings,
    pub burn: RetrySettings,
    pub confirmation: RetrySettings,
    pub completion: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferSettings {
    pub recipient: String,
    /// Smallest units, decimal
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log: LogSettings,
    pub source: ChainSettings,
    pub destination: ChainSettings,
    pub attestation: AttestationSettings,
    pub retry: RetryTable,
    pub transfer: TransferSettings,
    pub burn_event_signature: String,
}

/// Everything the binary needs, parsed and checked
pub struct RelayConfig {
    pub source: EvmChainSettings,
    pub source_wallet: LocalWallet,
    pub destination: EvmChainSettings,
    pub destination_wallet: LocalWallet,
    pub attestation_url: Url,
    pub attestation_timeout: Duration,
    pub orchestrator: OrchestratorConfig,
    pub request: TransferRequest,
}

pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        // Set defaults: Ethereum Sepolia -> Base Sepolia
        .set_default("log.level", "info")?
        .set_default("log.to_file", false)?
        .set_default("log.file", "log/cctp_transfer.log")?
        .set_default("source.name", "ethereum-sepolia")?
        .set_default("source.domain", 0)?
        .set_default("source.rpc_url", "https://ethereum-sepolia-rpc.publicnode.com")?
        .set_default("source.private_key", "")?
        .set_default("source.confirmations", 1)?
        .set_default("source.confirmation_timeout_secs", 180)?
        .set_default("source.poll_interval_ms", 2000)?
        .set_default("source.token_messenger", "0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5")?
        .set_default("source.usdc", "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")?
        .set_default("destination.name", "base-sepolia")?
        .set_default("destination.domain", 6)?
        .set_default("destination.rpc_url", "https://sepolia.base.org")?
        .set_default("destination.private_key", "")?
        .set_default("destination.confirmations", 1)?
        .set_default("destination.confirmation_timeout_secs", 120)?
        .set_default("destination.poll_interval_ms", 1000)?
        .set_default("destination.message_transmitter", "0x7865fAfC2db2093669d92c0F33AeEF291086BEFD")?
        .set_default("attestation.base_url", "https://iris-api-sandbox.circle.com")?
        .set_default("attestation.poll_interval_ms", 2000)?
        .set_default("attestation.max_wait_secs", 1800)?
        .set_default("attestation.max_consecutive_failures", 5)?
        .set_default("attestation.request_timeout_secs", 10)?
        .set_default("transfer.recipient", "")?
        .set_default("transfer.amount", "1000000")?
        .set_default("burn_event_signature", MESSAGE_SENT_EVENT)?;

    for (key, max_attempts, initial_ms, max_ms, backoff) in [
        ("approval", 3, 1000, 10_000, "exponential"),
        ("burn", 3, 1000, 10_000, "exponential"),
        ("confirmation", 5, 3000, 3000, "fixed"),
        ("completion", 5, 1000, 30_000, "exponential"),
    ] {
        builder = builder
            .set_default(format!("retry.{}.max_attempts", key), max_attempts)?
            .set_default(format!("retry.{}.initial_delay_ms", key), initial_ms)?
            .set_default(format!("retry.{}.max_delay_ms", key), max_ms)?
            .set_default(format!("retry.{}.backoff", key), backoff)?;
    }

    // Still below the config file and APP_ variables
    for (key, var) in LEGACY_ENV {
        if let Ok(value) = std::env::var(var) {
            builder = builder.set_default(*key, value)?;
        }
    }

    builder
        // Add configuration from a file
        .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(false))
        // Add configuration from environment variables, e.g. APP_SOURCE__RPC_URL
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}

fn parse_address(value: &str, key: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .with_context(|| format!("{} is not a valid address: {:?}", key, value))
}

fn parse_url(value: &str, key: &str) -> Result<Url> {
    Url::parse(value.trim()).with_context(|| format!("{} is not a valid URL: {:?}", key, value))
}

fn parse_wallet(value: &str, key: &str) -> Result<LocalWallet> {
    if value.trim().is_empty() {
        bail!("{} is not set", key);
    }
    value
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .with_context(|| format!("{} is not a valid private key", key))
}

impl ChainSettings {
    fn to_evm(&self, key: &str, token_messenger: Address, message_transmitter: Address) -> Result<EvmChainSettings> {
        if self.confirmation_timeout_secs == 0 {
            bail!("{}.confirmation_timeout_secs must be positive", key);
        }
        Ok(EvmChainSettings {
            name: self.name.clone(),
            domain: DomainId::new(self.domain),
            rpc_url: parse_url(&self.rpc_url, &format!("{}.rpc_url", key))?,
            token_messenger,
            message_transmitter,
            confirmations: self.confirmations.max(1),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(100)),
        })
    }
}

impl AppConfig {
    /// Check every value and convert it into the typed form the orchestrator takes
    pub fn validate(&self) -> Result<RelayConfig> {
        if self.source.domain == self.destination.domain {
            bail!("source.domain and destination.domain must differ (both {})", self.source.domain);
        }

        let token_messenger = parse_address(&self.source.token_messenger, "source.token_messenger")?;
        let usdc = parse_address(&self.source.usdc, "source.usdc")?;
        let message_transmitter =
            parse_address(&self.destination.message_transmitter, "destination.message_transmitter")?;

        let amount = U256::from_dec_str(self.transfer.amount.trim())
            .with_context(|| format!("transfer.amount is not a decimal integer: {:?}", self.transfer.amount))?;
        if amount.is_zero() {
            bail!("transfer.amount must be greater than 0");
        }
        if self.transfer.recipient.trim().is_empty() {
            bail!("transfer.recipient is not set");
        }
        if self.burn_event_signature.trim().is_empty() {
            bail!("burn_event_signature is empty");
        }
        if self.attestation.poll_interval_ms == 0 {
            bail!("attestation.poll_interval_ms must be positive");
        }

        let orchestrator = OrchestratorConfig {
            token_messenger,
            burn_event_signature: self.burn_event_signature.trim().to_string(),
            approval_retry: self.retry.approval.to_policy("approval")?,
            burn_retry: self.retry.burn.to_policy("burn")?,
            confirmation_retry: self.retry.confirmation.to_policy("confirmation")?,
            completion_retry: self.retry.completion.to_policy("completion")?,
            poll: PollConfig {
                poll_interval: Duration::from_millis(self.attestation.poll_interval_ms),
                max_wait: Duration::from_secs(self.attestation.max_wait_secs),
                max_consecutive_failures: self.attestation.max_consecutive_failures,
            },
            completion_registry_capacity: DEFAULT_COMPLETION_REGISTRY_CAPACITY,
        };

        let source = self.source.to_evm("source", token_messenger, message_transmitter)?;
        let destination = self.destination.to_evm("destination", token_messenger, message_transmitter)?;

        Ok(RelayConfig {
            request: TransferRequest {
                source_domain: source.domain,
                destination_domain: destination.domain,
                asset: usdc,
                amount,
                recipient: self.transfer.recipient.trim().to_string(),
            },
            source,
            source_wallet: parse_wallet(&self.source.private_key, "source.private_key")?,
            destination,
            destination_wallet: parse_wallet(&self.destination.private_key, "destination.private_key")?,
            attestation_url: parse_url(&self.attestation.base_url, "attestation.base_url")?,
            attestation_timeout: Duration::from_secs(self.attestation.request_timeout_secs.max(1)),
            orchestrator,
        })
    }
}

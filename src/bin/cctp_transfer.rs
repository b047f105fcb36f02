use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use dotenv::dotenv;
use eyre::{eyre, Result, WrapErr};
use log::info;

use cctp_relay::configure::{load_config, DEFAULT_CONFIG_PATH};
use cctp_relay::logger;
use cctp_relay::transfer::adapters::{EvmLedgerClient, IrisOracleClient};
use cctp_relay::transfer::{TokioClock, TransferOrchestrator};

/// Move USDC from the source chain to the destination chain by burn and mint
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Amount in smallest units (1000000 = 1 USDC)
    #[arg(long)]
    amount: Option<String>,
    /// Destination-chain recipient address
    #[arg(long)]
    recipient: Option<String>,
    /// Give up waiting for the attestation after this many seconds
    #[arg(long)]
    max_wait_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut app_config = load_config(Some(&args.config)).wrap_err("failed to load configuration")?;
    if let Some(amount) = args.amount {
        app_config.transfer.amount = amount;
    }
    if let Some(recipient) = args.recipient {
        app_config.transfer.recipient = recipient;
    }
    if let Some(secs) = args.max_wait_secs {
        app_config.attestation.max_wait_secs = secs;
    }

    logger::setup_logger(&app_config.log).map_err(|e| eyre!("failed to set up logger: {:#}", e))?;
    let relay = app_config.validate().map_err(|e| eyre!("invalid configuration: {:#}", e))?;

    let source = EvmLedgerClient::connect(relay.source, relay.source_wallet).await?;
    let destination = EvmLedgerClient::connect(relay.destination, relay.destination_wallet).await?;
    let oracle = IrisOracleClient::new(relay.attestation_url, relay.attestation_timeout)?;

    let orchestrator = TransferOrchestrator::new(
        Arc::new(source),
        Arc::new(destination),
        Arc::new(oracle),
        Arc::new(TokioClock::new()),
        relay.orchestrator,
    );

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling attestation polling");
            cancel.cancel();
        }
    });

    let request = relay.request;
    info!(
        "Transferring {} USDC units ({} -> {}) to {}",
        request.amount,
        request.source_domain,
        request.destination_domain,
        request.recipient
    );

    let started = Instant::now();
    let receipt = orchestrator.execute(request).await?;
    info!("Transfer finished in {}s", started.elapsed().as_secs());

    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

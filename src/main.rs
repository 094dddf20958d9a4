//! Command line client for listing purchases
//!
//! ```text
//! listing-purchase --config purchase.toml create-listing --name "Super Sword" --image img.png --price 100
//! listing-purchase --config purchase.toml buy --seller <PUBKEY> --name "Super Sword"
//! listing-purchase --config purchase.toml lookup <SIGNATURE>
//! ```

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use listing_purchase::{
    observability::init_logging,
    oracle::HermesClient,
    submit::RpcLedger,
    wallet::Wallet,
    AppConfig, FailureKind, PurchaseOrchestrator, SignatureLookup,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "purchase.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a listing owned by the configured wallet
    CreateListing {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        image: String,
        /// Price in minor units of the listing currency
        #[arg(long)]
        price: u64,
    },

    /// Buy a listing
    Buy {
        /// Seller (listing creator) public key
        #[arg(long)]
        seller: Pubkey,
        #[arg(long)]
        name: String,
        /// Run a single attempt even on a receipt address collision
        #[arg(long)]
        no_retry: bool,
    },

    /// Look up a transaction signature on the ledger
    Lookup { signature: Signature },

    /// Print the listing address for a seller and product name
    ListingAddress {
        #[arg(long)]
        seller: Pubkey,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    let config = AppConfig::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    let orchestrator = build_orchestrator(&config)?;
    info!(wallet = %orchestrator.buyer(), rpc = %config.ledger.rpc_url, "Client ready");

    let result = run(&orchestrator, args.command).await;

    if args.print_metrics {
        print!("{}", listing_purchase::metrics::metrics().render());
    }
    result
}

fn build_orchestrator(config: &AppConfig) -> Result<PurchaseOrchestrator> {
    let wallet = Wallet::from_file(&config.wallet.keypair_path).context("Failed to load wallet")?;

    let oracle = HermesClient::new(
        config.oracle.hermes_url.clone(),
        Duration::from_secs(config.oracle.request_timeout_secs),
    )?
    .with_retry(
        config.oracle.max_retries,
        Duration::from_millis(config.oracle.retry_base_delay_ms),
    );

    let ledger = RpcLedger::new(
        config.ledger.rpc_url.clone(),
        config.submission.commitment,
        Duration::from_secs(config.ledger.request_timeout_secs),
    );

    Ok(PurchaseOrchestrator::new(
        config,
        Arc::new(oracle),
        Arc::new(ledger),
        Arc::new(wallet.signer()),
    ))
}

async fn run(orchestrator: &PurchaseOrchestrator, command: Command) -> Result<()> {
    match command {
        Command::CreateListing { name, image, price } => {
            let created = orchestrator.create_listing(&name, &image, price).await?;
            println!("listing:   {}", created.listing);
            println!("signature: {}", created.signature);
        }

        Command::Buy {
            seller,
            name,
            no_retry,
        } => {
            let outcome = if no_retry {
                orchestrator.purchase(&seller, &name).await
            } else {
                orchestrator.purchase_with_retry(&seller, &name).await
            };

            match outcome {
                Ok(receipt) => {
                    println!("Succeeded");
                    println!("signature: {}", receipt.signature);
                    println!("receipt:   {}", receipt.receipt);
                    println!("listing:   {}", receipt.listing);
                }
                Err(failure) => {
                    println!("Failed({}): {}", failure.kind, failure.message);
                    if failure.kind == FailureKind::ConfirmationTimeout {
                        if let Some(signature) = failure.signature {
                            println!("outcome unknown; check with: lookup {}", signature);
                        }
                    }
                    bail!("purchase failed: {}", failure.kind);
                }
            }
        }

        Command::Lookup { signature } => match orchestrator.lookup(&signature).await? {
            SignatureLookup::Confirmed(level) => println!("Succeeded ({:?})", level),
            SignatureLookup::Pending(level) => println!("Pending ({:?})", level),
            SignatureLookup::Failed(message) => println!("Failed: {}", message),
            SignatureLookup::NotFound => println!("NotFound"),
        },

        Command::ListingAddress { seller, name } => {
            println!("{}", orchestrator.listing_address(&seller, &name)?);
        }
    }
    Ok(())
}

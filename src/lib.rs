//! Atomic listing purchase client
//!
//! Buys a listing from an on-chain listing program in a single atomic
//! operation: a fresh signed price attestation is posted, consumed by the
//! program's `buy` instruction and closed again, all inside one transaction
//! the purchaser signs.
//!
//! The main entry point is [`orchestrator::PurchaseOrchestrator`].

pub mod compat;
pub mod config;
pub mod derive;
pub mod metrics;
pub mod observability;
pub mod oracle;
pub mod orchestrator;
pub mod program;
pub mod submit;
pub mod test_utils;
pub mod tx_builder;
pub mod wallet;

pub use config::AppConfig;
pub use orchestrator::{
    FailureKind, ListingReceipt, PurchaseEvent, PurchaseFailure, PurchaseOrchestrator,
    PurchaseOutcome, PurchaseReceipt, PurchaseState,
};
pub use submit::SignatureLookup;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};

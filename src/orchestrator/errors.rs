//! Failure taxonomy surfaced at the purchase boundary
//!
//! Every lower-level error maps to exactly one [`FailureKind`]. The
//! orchestrator never turns a failure into a partial success.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use std::fmt;
use thiserror::Error;

use crate::derive::DeriveError;
use crate::oracle::OracleError;
use crate::submit::SubmitError;
use crate::tx_builder::AssemblerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Oracle unreachable or answered with garbage
    OracleUnavailable,
    /// Oracle has no payload for a configured feed
    NoPriceForFeed,
    /// A derivation seed is empty or over the ledger's limit
    SeedTooLong,
    /// Operator declined to sign
    SignerRejected,
    /// Signer failed for a reason other than refusal
    Signing,
    /// Preflight predicted failure; nothing landed
    SimulationFailed,
    /// Could not hand the transaction to the ledger
    BroadcastFailed,
    /// Polling gave up; outcome unknown until looked up by signature
    ConfirmationTimeout,
    /// Receipt address collision
    AccountAlreadyExists,
    /// An atomic instruction group cannot fit into one envelope
    PayloadTooLarge,
    /// The business instruction builder failed
    BusinessInstruction,
    /// Landed and rejected by the ledger
    TransactionFailed,
    /// Another attempt for the same buyer and listing is in flight
    AttemptInProgress,
    /// Assembly produced something the ledger cannot accept; a bug
    Internal,
}

impl FailureKind {
    /// Whether an automatic retry can ever help.
    ///
    /// `AccountAlreadyExists` is only retryable with a fresh disambiguator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable | Self::BroadcastFailed | Self::AccountAlreadyExists
        )
    }

    /// Stable label for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::OracleUnavailable => "oracle_unavailable",
            Self::NoPriceForFeed => "no_price",
            Self::SeedTooLong => "seed_too_long",
            Self::SignerRejected => "signer_rejected",
            Self::Signing => "signing",
            Self::SimulationFailed => "simulation_failed",
            Self::BroadcastFailed => "broadcast_failed",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::AccountAlreadyExists => "account_already_exists",
            Self::PayloadTooLarge => "payload_too_large",
            Self::BusinessInstruction => "business",
            Self::TransactionFailed => "transaction_failed",
            Self::AttemptInProgress => "attempt_in_progress",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminal failure of one attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PurchaseFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Signature involved, for `ConfirmationTimeout` and `TransactionFailed`
    pub signature: Option<Signature>,
}

impl PurchaseFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            signature: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<OracleError> for PurchaseFailure {
    fn from(err: OracleError) -> Self {
        let kind = match err {
            OracleError::Unavailable { .. } | OracleError::Malformed(_) => {
                FailureKind::OracleUnavailable
            }
            OracleError::NoPrice { .. } | OracleError::InvalidFeedId(_) => {
                FailureKind::NoPriceForFeed
            }
        };
        Self::new(kind, err.to_string())
    }
}

impl From<DeriveError> for PurchaseFailure {
    fn from(err: DeriveError) -> Self {
        let kind = match err {
            DeriveError::SeedTooLong { .. }
            | DeriveError::EmptySeed { .. }
            | DeriveError::TooManySeeds { .. } => FailureKind::SeedTooLong,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<AssemblerError> for PurchaseFailure {
    fn from(err: AssemblerError) -> Self {
        let kind = match err {
            AssemblerError::PayloadTooLarge { .. } => FailureKind::PayloadTooLarge,
            AssemblerError::Business(_) => FailureKind::BusinessInstruction,
            AssemblerError::InvalidInstructionOrder(_)
            | AssemblerError::Compile(_)
            | AssemblerError::Configuration(_) => FailureKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<SubmitError> for PurchaseFailure {
    fn from(err: SubmitError) -> Self {
        let signature = err.signature();
        let kind = match &err {
            SubmitError::SignerRejected(_) => FailureKind::SignerRejected,
            SubmitError::Signing(_) => FailureKind::Signing,
            SubmitError::SimulationFailed { .. } => FailureKind::SimulationFailed,
            SubmitError::AccountAlreadyExists { .. } => FailureKind::AccountAlreadyExists,
            SubmitError::BroadcastFailed(_) => FailureKind::BroadcastFailed,
            SubmitError::TransactionFailed { .. } => FailureKind::TransactionFailed,
            SubmitError::ConfirmationTimeout { .. } => FailureKind::ConfirmationTimeout,
            SubmitError::Assembly(_) => FailureKind::Internal,
        };
        let message = match err {
            SubmitError::Assembly(inner) => return Self::from(inner),
            other => other.to_string(),
        };
        Self {
            kind,
            message,
            signature,
        }
    }
}

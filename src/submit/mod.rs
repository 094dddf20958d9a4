//! Submission controller
//!
//! Drives one envelope from unsigned to confirmed:
//! fresh blockhash → compile → signature from the external signer →
//! broadcast → poll until the configured commitment or a timeout.
//!
//! Success is only reported after the ledger itself reports the exact
//! signature at the target level. Broadcast acceptance alone proves nothing.
//! A timeout is reported as an unknown outcome carrying the signature; the
//! transaction may still land and must be looked up before any retry.
//!
//! A broadcast transaction cannot be recalled. Dropping the future after
//! `broadcast` returns does not stop the transaction from landing.

use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod errors;
pub mod ledger;
pub mod signer;

pub use errors::SubmitError;
pub use ledger::{ConfirmationLevel, LedgerError, LedgerRpc, LedgerStatus, RpcLedger};
pub use signer::{KeypairSigner, SignerError, TransactionSigner};

use crate::compat;
use crate::config::SubmissionConfig;
use crate::metrics::{metrics, Timer};
use crate::tx_builder::Envelope;

/// Result of looking up a signature after the fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureLookup {
    /// Landed without error at `level`
    Confirmed(ConfirmationLevel),
    /// Landed and failed on-chain
    Failed(String),
    /// Known to the ledger but below the configured commitment
    Pending(ConfirmationLevel),
    NotFound,
}

/// Signs, broadcasts and confirms envelopes
#[derive(Clone)]
pub struct SubmissionController {
    ledger: Arc<dyn LedgerRpc>,
    signer: Arc<dyn TransactionSigner>,
    config: SubmissionConfig,
}

impl SubmissionController {
    pub fn new(
        ledger: Arc<dyn LedgerRpc>,
        signer: Arc<dyn TransactionSigner>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            ledger,
            signer,
            config,
        }
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub fn signer(&self) -> &Arc<dyn TransactionSigner> {
        &self.signer
    }

    /// Compile an envelope against a fresh blockhash
    pub async fn prepare(&self, envelope: &Envelope) -> Result<VersionedTransaction, SubmitError> {
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| SubmitError::BroadcastFailed(format!("blockhash unavailable: {}", e)))?;
        Ok(envelope.compile(&self.signer.pubkey(), blockhash)?)
    }

    /// Ask the external signer for a signature; a refusal ends the attempt
    /// before anything reaches the ledger
    pub async fn request_signature(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SubmitError> {
        let signed = self.signer.sign(tx).await?;
        if !compat::is_fully_signed(&signed) {
            return Err(SubmitError::Signing(
                "signer returned a transaction with empty signature slots".to_string(),
            ));
        }
        Ok(signed)
    }

    /// Hand a signed transaction to the ledger
    pub async fn broadcast(&self, tx: &VersionedTransaction) -> Result<Signature, SubmitError> {
        let skip_preflight = self.config.preflight.skip_preflight();
        let signature = self
            .ledger
            .send_transaction(tx, skip_preflight)
            .await
            .map_err(SubmitError::from_send_error)?;

        if let Some(local) = compat::fee_payer_signature(tx) {
            if local != signature {
                warn!(%local, returned = %signature, "Ledger returned an unexpected signature");
            }
        }

        metrics().envelopes_sent.inc();
        debug!(%signature, skip_preflight, "Transaction broadcast");
        Ok(signature)
    }

    /// Poll until `signature`, sent for `envelope`, reaches the configured
    /// commitment.
    ///
    /// RPC errors while polling are logged and polling continues; only the
    /// timeout ends an unresolved wait. A landed failure is classified
    /// against the envelope's instructions.
    pub async fn confirm(
        &self,
        signature: &Signature,
        envelope: &Envelope,
    ) -> Result<ConfirmationLevel, SubmitError> {
        let timeout = self.config.confirmation_timeout();
        let target = self.config.commitment;
        let started = Instant::now();
        let timer = Timer::new();
        let mut interval = tokio::time::interval(self.config.poll_interval());
        let mut attempts: u32 = 0;

        loop {
            interval.tick().await;
            attempts += 1;

            match self.ledger.signature_status(signature, false).await {
                Ok(Some(LedgerStatus::Landed(level))) if level >= target => {
                    timer.observe_duration(&metrics().confirmation_latency);
                    info!(%signature, ?level, attempts, "Transaction confirmed");
                    return Ok(level);
                }
                Ok(Some(LedgerStatus::Failed(err))) => {
                    warn!(%signature, error = %err, "Transaction failed on-chain");
                    return Err(SubmitError::from_landed_error(
                        *signature,
                        err,
                        envelope.instructions(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%signature, error = %e, attempts, "Status poll failed");
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    %signature,
                    attempts,
                    timeout_sec = timeout.as_secs(),
                    "Confirmation polling timed out"
                );
                return Err(SubmitError::ConfirmationTimeout {
                    signature: *signature,
                    waited,
                });
            }
        }
    }

    /// Prepare, sign, broadcast and confirm one envelope
    pub async fn submit(&self, envelope: &Envelope) -> Result<Signature, SubmitError> {
        let tx = self.prepare(envelope).await?;
        let signed = self.request_signature(tx).await?;
        let signature = self.broadcast(&signed).await?;
        self.confirm(&signature, envelope).await?;
        Ok(signature)
    }

    /// Look up a signature once, searching past the recent status cache.
    ///
    /// Independent of any earlier confirmation wait; after a timeout this
    /// may well report the transaction as confirmed.
    pub async fn lookup(&self, signature: &Signature) -> Result<SignatureLookup, LedgerError> {
        let status = self.ledger.signature_status(signature, true).await?;
        Ok(match status {
            None => SignatureLookup::NotFound,
            Some(LedgerStatus::Failed(err)) => SignatureLookup::Failed(err.to_string()),
            Some(LedgerStatus::Landed(level)) if level >= self.config.commitment => {
                SignatureLookup::Confirmed(level)
            }
            Some(LedgerStatus::Landed(level)) => SignatureLookup::Pending(level),
        })
    }
}

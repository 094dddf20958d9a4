//! Purchase orchestrator
//!
//! Runs one purchase attempt end to end: fetch price attestations, derive
//! listing and receipt addresses, assemble envelopes, then sign, broadcast
//! and confirm each envelope in order. Every state the attempt enters is
//! published as a [`PurchaseEvent`].
//!
//! ## Concurrency
//!
//! Steps of one attempt never overlap. Independent attempts may run
//! concurrently; a second attempt for the same buyer and listing is refused
//! with `AttemptInProgress` while the first is in flight.
//!
//! ## Cancellation
//!
//! Dropping a purchase future abandons the attempt at its current await
//! point. Nothing is sent to the ledger on cancellation, so an envelope that
//! was already broadcast may still land.
//!
//! ## Multi-envelope purchases
//!
//! When attestation staging spills into extra envelopes, those land
//! independently of the final one. A failure after some envelopes landed is
//! reported with the count in its message; nothing is rolled back.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

pub mod errors;
pub mod inflight;
pub mod state;

pub use errors::{FailureKind, PurchaseFailure};
pub use inflight::{AttemptKey, InFlightGuard, InFlightRegistry};
pub use state::{PurchaseEvent, PurchaseState};

use self::state::StateTracker;
use crate::config::AppConfig;
use crate::derive::{derive_listing_address, fresh_disambiguator, validate_product_name};
use crate::metrics::{metrics, Timer};
use crate::observability::AttemptId;
use crate::oracle::{FeedId, PriceSource};
use crate::program::{create_listing_instruction, PurchaseAccounts, PurchaseInstructionBuilder};
use crate::submit::{LedgerError, LedgerRpc, SignatureLookup, SubmissionController, TransactionSigner};
use crate::tx_builder::{Envelope, TransactionAssembler};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A confirmed purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub attempt_id: AttemptId,
    /// Signature of the envelope carrying the `buy` instruction
    pub signature: Signature,
    /// Every confirmed envelope, in submission order
    pub signatures: Vec<Signature>,
    pub listing: Pubkey,
    pub receipt: Pubkey,
    pub disambiguator: Pubkey,
}

/// Outcome surfaced at the purchase boundary
pub type PurchaseOutcome = Result<PurchaseReceipt, PurchaseFailure>;

/// A confirmed listing creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingReceipt {
    pub signature: Signature,
    pub listing: Pubkey,
}

pub struct PurchaseOrchestrator {
    oracle: Arc<dyn PriceSource>,
    submitter: SubmissionController,
    assembler: TransactionAssembler,
    program_id: Pubkey,
    price_feeds: Vec<FeedId>,
    max_disambiguator_retries: u32,
    events: broadcast::Sender<PurchaseEvent>,
    inflight: InFlightRegistry,
}

impl PurchaseOrchestrator {
    pub fn new(
        config: &AppConfig,
        oracle: Arc<dyn PriceSource>,
        ledger: Arc<dyn LedgerRpc>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            oracle,
            submitter: SubmissionController::new(ledger, signer, config.submission.clone()),
            assembler: TransactionAssembler::new(
                config.assembler.clone(),
                config.program.receiver_program_id,
            ),
            program_id: config.program.listing_program_id,
            price_feeds: config.oracle.feeds.clone(),
            max_disambiguator_retries: config.submission.max_disambiguator_retries,
            events,
            inflight: InFlightRegistry::new(),
        }
    }

    /// Receive every state transition of every attempt from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PurchaseEvent> {
        self.events.subscribe()
    }

    pub fn buyer(&self) -> Pubkey {
        self.submitter.signer().pubkey()
    }

    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    /// Run exactly one purchase attempt with a fresh disambiguator
    pub async fn purchase(&self, seller: &Pubkey, product_name: &str) -> PurchaseOutcome {
        let attempt_id = AttemptId::new();
        let mut tracker = StateTracker::new(attempt_id.clone(), self.events.clone());
        let key = AttemptKey {
            buyer: self.buyer(),
            seller: *seller,
            product_name: product_name.to_string(),
        };

        let _guard = match self.inflight.try_acquire(key, &attempt_id) {
            Ok(guard) => guard,
            Err(holder) => {
                let failure = PurchaseFailure::new(
                    FailureKind::AttemptInProgress,
                    format!("attempt {} is already in flight for this listing", holder),
                );
                warn!(%attempt_id, %holder, "Duplicate purchase request rejected");
                metrics().record_failure(failure.kind.category());
                tracker.fail(failure.kind);
                return Err(failure);
            }
        };

        metrics().purchases_started.inc();
        let timer = Timer::new();
        let mut landed = Vec::new();

        let outcome = self
            .run_attempt(&mut tracker, &attempt_id, seller, product_name, &mut landed)
            .await;
        timer.observe_duration(&metrics().purchase_latency);

        match outcome {
            Ok(receipt) => {
                tracker.enter(PurchaseState::Succeeded);
                metrics().purchases_succeeded.inc();
                info!(
                    %attempt_id,
                    signature = %receipt.signature,
                    receipt = %receipt.receipt,
                    envelopes = receipt.signatures.len(),
                    "Purchase confirmed"
                );
                Ok(receipt)
            }
            Err(mut failure) => {
                if !landed.is_empty() {
                    failure.message = format!(
                        "{} ({} earlier envelope(s) already landed: {})",
                        failure.message,
                        landed.len(),
                        landed
                            .iter()
                            .map(|s: &Signature| s.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                warn!(
                    %attempt_id,
                    kind = %failure.kind,
                    state = %tracker.state(),
                    error = %failure.message,
                    "Purchase failed"
                );
                metrics().record_failure(failure.kind.category());
                tracker.fail(failure.kind);
                Err(failure)
            }
        }
    }

    #[instrument(skip_all, fields(attempt_id = %attempt_id, product = product_name))]
    async fn run_attempt(
        &self,
        tracker: &mut StateTracker,
        attempt_id: &AttemptId,
        seller: &Pubkey,
        product_name: &str,
        landed: &mut Vec<Signature>,
    ) -> PurchaseOutcome {
        let buyer = self.buyer();

        tracker.enter(PurchaseState::FetchingPrice);
        let attestations = self.oracle.fetch_latest(&self.price_feeds).await?;

        tracker.enter(PurchaseState::DerivingAddresses);
        let disambiguator = fresh_disambiguator();
        let accounts =
            PurchaseAccounts::derive(&self.program_id, &buyer, seller, product_name, &disambiguator)?;

        tracker.enter(PurchaseState::Assembling);
        // The program reads the first configured feed
        let price_feed = *self.price_feeds.first().ok_or_else(|| {
            PurchaseFailure::new(FailureKind::NoPriceForFeed, "no price feed configured")
        })?;
        let plan = self.assembler.plan_attestations(&buyer, &attestations)?;
        let builder = PurchaseInstructionBuilder {
            program_id: self.program_id,
            accounts: &accounts,
            product_name,
            price_feed,
        };
        let envelopes = self.assembler.assemble(&buyer, &plan, &builder)?;

        for envelope in &envelopes {
            let signature = self.submit_envelope(tracker, envelope).await?;
            landed.push(signature);
        }

        let signatures = std::mem::take(landed);
        let signature = *signatures
            .last()
            .ok_or_else(|| PurchaseFailure::new(FailureKind::Internal, "no envelopes assembled"))?;

        Ok(PurchaseReceipt {
            attempt_id: attempt_id.clone(),
            signature,
            signatures,
            listing: accounts.listing.address,
            receipt: accounts.receipt.address,
            disambiguator,
        })
    }

    async fn submit_envelope(
        &self,
        tracker: &mut StateTracker,
        envelope: &Envelope,
    ) -> Result<Signature, PurchaseFailure> {
        tracker.enter(PurchaseState::AwaitingSignature);
        let tx = self.submitter.prepare(envelope).await?;
        let signed = self.submitter.request_signature(tx).await?;

        tracker.enter(PurchaseState::Broadcasting);
        let signature = self.submitter.broadcast(&signed).await?;

        tracker.enter(PurchaseState::Confirming);
        self.submitter.confirm(&signature, envelope).await?;
        info!(
            %signature,
            envelope = envelope.index + 1,
            total = envelope.total,
            "Envelope confirmed"
        );
        Ok(signature)
    }

    /// Run attempts until one succeeds or fails for a reason other than a
    /// receipt collision. Each retry is a new attempt with a new
    /// disambiguator. No other failure kind is retried here; a
    /// `ConfirmationTimeout` in particular must be looked up first.
    pub async fn purchase_with_retry(&self, seller: &Pubkey, product_name: &str) -> PurchaseOutcome {
        let mut retries = 0;
        loop {
            match self.purchase(seller, product_name).await {
                Err(failure)
                    if failure.kind == FailureKind::AccountAlreadyExists
                        && retries < self.max_disambiguator_retries =>
                {
                    retries += 1;
                    warn!(
                        retry = retries,
                        max = self.max_disambiguator_retries,
                        "Receipt address collision, retrying with a fresh disambiguator"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    /// Create a listing owned by the signer, who is also the payout account
    pub async fn create_listing(
        &self,
        product_name: &str,
        image_ref: &str,
        price_minor_units: u64,
    ) -> Result<ListingReceipt, PurchaseFailure> {
        validate_product_name(product_name)?;
        let creator = self.buyer();
        let built = create_listing_instruction(
            &self.program_id,
            &creator,
            product_name,
            image_ref,
            price_minor_units,
        )?;

        let envelopes = self
            .assembler
            .assemble_plain(&creator, vec![built.instruction])?;
        let mut signature = None;
        for envelope in &envelopes {
            signature = Some(self.submitter.submit(envelope).await?);
        }
        let signature = signature
            .ok_or_else(|| PurchaseFailure::new(FailureKind::Internal, "no envelopes assembled"))?;

        metrics().listings_created.inc();
        info!(%signature, listing = %built.listing.address, product = product_name, "Listing created");
        Ok(ListingReceipt {
            signature,
            listing: built.listing.address,
        })
    }

    /// Listing address for `(seller, product_name)`, without touching the
    /// ledger
    pub fn listing_address(&self, seller: &Pubkey, product_name: &str) -> Result<Pubkey, PurchaseFailure> {
        Ok(derive_listing_address(&self.program_id, seller, product_name)?.address)
    }

    /// Look up a signature independently of any earlier attempt outcome
    pub async fn lookup(&self, signature: &Signature) -> Result<SignatureLookup, LedgerError> {
        self.submitter.lookup(signature).await
    }
}

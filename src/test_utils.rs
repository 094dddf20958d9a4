//! Test Utilities Module
//!
//! In-memory stand-ins for the ledger, the signer and the price oracle, so
//! the orchestrator and submission paths can be tested without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::{TransactionError, VersionedTransaction},
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::oracle::{FeedId, OracleError, PriceAttestation, PriceSnapshot, PriceSource};
use crate::submit::ledger::{ConfirmationLevel, LedgerError, LedgerRpc, LedgerStatus};
use crate::submit::signer::{SignerError, TransactionSigner};

/// What the mock ledger reports for transactions it accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingBehavior {
    /// Reported at `Confirmed` on the first poll
    Confirm,
    /// Never seen by polling or lookup
    Never,
    /// Invisible while polling, `Finalized` on a history lookup
    LandLate,
    /// Landed with the given on-chain error
    FailOnChain(TransactionError),
}

/// Mock ledger RPC
///
/// Records every transaction it is sent. Send failures can be queued with
/// [`MockLedger::fail_next_send`]; each queued error is consumed by one send.
/// On-chain failures for single accepted transactions are queued with
/// [`MockLedger::fail_next_landing`].
pub struct MockLedger {
    behavior: LandingBehavior,
    send_failures: Mutex<VecDeque<LedgerError>>,
    scripted_failures: Mutex<HashMap<usize, LedgerError>>,
    send_calls: AtomicUsize,
    landing_failures: Mutex<VecDeque<TransactionError>>,
    sent: Mutex<Vec<(VersionedTransaction, bool)>>,
    statuses: DashMap<Signature, LedgerStatus>,
    blockhash_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            behavior: LandingBehavior::Confirm,
            send_failures: Mutex::new(VecDeque::new()),
            scripted_failures: Mutex::new(HashMap::new()),
            send_calls: AtomicUsize::new(0),
            landing_failures: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            statuses: DashMap::new(),
            blockhash_calls: AtomicUsize::new(0),
        }
    }

    pub fn never_confirm(mut self) -> Self {
        self.behavior = LandingBehavior::Never;
        self
    }

    pub fn land_late(mut self) -> Self {
        self.behavior = LandingBehavior::LandLate;
        self
    }

    pub fn fail_on_chain(mut self, err: TransactionError) -> Self {
        self.behavior = LandingBehavior::FailOnChain(err);
        self
    }

    /// Land the next accepted transaction with `err`, then resume the
    /// configured behavior
    pub fn fail_next_landing(&self, err: TransactionError) {
        self.landing_failures.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `send_transaction` call
    pub fn fail_next_send(&self, err: LedgerError) {
        self.send_failures
            .lock()
            .unwrap()
            .push_back(err);
    }

    /// Fail the `n`th `send_transaction` call (1-based) with `err`
    pub fn fail_send_attempt(&self, n: usize, err: LedgerError) {
        self.scripted_failures.lock().unwrap().insert(n, err);
    }

    /// Number of transactions accepted
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_transactions(&self) -> Vec<VersionedTransaction> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(tx, _)| tx.clone())
            .collect()
    }

    pub fn skip_preflight_flags(&self) -> Vec<bool> {
        self.sent.lock().unwrap().iter().map(|(_, skip)| *skip).collect()
    }

    pub fn blockhash_calls(&self) -> usize {
        self.blockhash_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash::new_unique())
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, LedgerError> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.scripted_failures.lock().unwrap().remove(&call) {
            return Err(err);
        }
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let signature = tx.signatures.first().copied().unwrap_or_default();
        self.sent.lock().unwrap().push((tx.clone(), skip_preflight));

        if let Some(err) = self.landing_failures.lock().unwrap().pop_front() {
            self.statuses.insert(signature, LedgerStatus::Failed(err));
            return Ok(signature);
        }

        match &self.behavior {
            LandingBehavior::Confirm => {
                self.statuses.insert(
                    signature,
                    LedgerStatus::Landed(ConfirmationLevel::Confirmed),
                );
            }
            LandingBehavior::FailOnChain(err) => {
                self.statuses
                    .insert(signature, LedgerStatus::Failed(err.clone()));
            }
            LandingBehavior::Never | LandingBehavior::LandLate => {}
        }
        Ok(signature)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> Result<Option<LedgerStatus>, LedgerError> {
        if let Some(status) = self.statuses.get(signature) {
            return Ok(Some(status.clone()));
        }
        let was_sent = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|(tx, _)| tx.signatures.first() == Some(signature));
        if search_history && was_sent && self.behavior == LandingBehavior::LandLate {
            return Ok(Some(LedgerStatus::Landed(ConfirmationLevel::Finalized)));
        }
        Ok(None)
    }
}

/// Mock signer backed by a throwaway keypair
pub struct MockSigner {
    keypair: Keypair,
    reject: bool,
    sign_count: AtomicUsize,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            keypair: Keypair::new(),
            reject: false,
            sign_count: AtomicUsize::new(0),
        }
    }

    /// A signer whose operator declines every request
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SignerError> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(SignerError::Rejected("operator declined".to_string()));
        }
        VersionedTransaction::try_new(tx.message, &[&self.keypair])
            .map_err(|e| SignerError::Signing(e.to_string()))
    }
}

/// Mock price source with a fixed answer per feed
pub struct MockPriceSource {
    payloads: HashMap<FeedId, Vec<u8>>,
    failure: Option<OracleError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockPriceSource {
    /// Every requested feed gets `payload_len` bytes of payload
    pub fn with_payload(feed_id: FeedId, payload_len: usize) -> Self {
        Self {
            payloads: HashMap::from([(feed_id, vec![0x5a; payload_len])]),
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`, so concurrent attempts overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The oracle answers but has no payload for `feed_id`
    pub fn empty(feed_id: FeedId) -> Self {
        Self::with_payload(feed_id, 0)
    }

    pub fn failing(err: OracleError) -> Self {
        Self {
            payloads: HashMap::new(),
            failure: Some(err),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn fetch_latest(&self, feed_ids: &[FeedId]) -> Result<Vec<PriceAttestation>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        feed_ids
            .iter()
            .map(|feed_id| match self.payloads.get(feed_id) {
                Some(payload) if !payload.is_empty() => Ok(PriceAttestation {
                    feed_id: *feed_id,
                    payload: payload.clone(),
                    snapshot: Some(PriceSnapshot {
                        price: 15_000_000_000,
                        conf: 10_000,
                        expo: -8,
                        publish_time: 1_700_000_000,
                    }),
                }),
                _ => Err(OracleError::NoPrice {
                    feed: feed_id.to_string(),
                }),
            })
            .collect()
    }
}

/// Shorthand for tests that need shared mocks
pub fn mocks() -> (Arc<MockLedger>, Arc<MockSigner>) {
    (Arc::new(MockLedger::new()), Arc::new(MockSigner::new()))
}

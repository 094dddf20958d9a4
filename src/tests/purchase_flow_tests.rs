//! End-to-end purchase flows against in-memory ledger, signer and oracle

use std::sync::Arc;

use solana_sdk::{
    compute_budget,
    instruction::InstructionError,
    pubkey::Pubkey,
    transaction::{TransactionError, VersionedTransaction},
};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::{AppConfig, PreflightPolicy};
use crate::derive::{derive_listing_address, derive_receipt_address};
use crate::oracle::{FeedId, OracleError};
use crate::orchestrator::{AttemptKey, FailureKind, PurchaseEvent, PurchaseOrchestrator, PurchaseState};
use crate::program::instruction_discriminator;
use crate::submit::{ConfirmationLevel, LedgerError, SignatureLookup, TransactionSigner};
use crate::observability::AttemptId;
use crate::test_utils::{MockLedger, MockPriceSource, MockSigner};

const PRODUCT: &str = "Super Sword";

fn config() -> AppConfig {
    AppConfig::default()
}

fn feed() -> FeedId {
    config().oracle.feeds[0]
}

fn orchestrator(
    oracle: Arc<MockPriceSource>,
    ledger: Arc<MockLedger>,
    signer: Arc<MockSigner>,
) -> PurchaseOrchestrator {
    PurchaseOrchestrator::new(&config(), oracle, ledger, signer)
}

fn drain(rx: &mut broadcast::Receiver<PurchaseEvent>) -> Vec<PurchaseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[PurchaseEvent]) -> Vec<PurchaseState> {
    events.iter().map(|e| e.state).collect()
}

fn account_in_use() -> LedgerError {
    LedgerError::Preflight {
        message: "custom program error: 0x0".to_string(),
        logs: vec!["Allocate: account Address { address: rcpt } already in use".to_string()],
    }
}

/// Discriminators of every non compute-budget instruction in `tx`, in order
fn discriminators(tx: &VersionedTransaction) -> Vec<[u8; 8]> {
    let keys = tx.message.static_account_keys();
    tx.message
        .instructions()
        .iter()
        .filter(|ix| *ix.program_id(keys) != compute_budget::id() && ix.data.len() >= 8)
        .map(|ix| {
            let mut d = [0u8; 8];
            d.copy_from_slice(&ix.data[..8]);
            d
        })
        .collect()
}

#[tokio::test]
async fn test_purchase_happy_path() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 200));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle.clone(), ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();
    let seller = Pubkey::new_unique();

    let receipt = orch.purchase(&seller, PRODUCT).await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        states(&events),
        vec![
            PurchaseState::FetchingPrice,
            PurchaseState::DerivingAddresses,
            PurchaseState::Assembling,
            PurchaseState::AwaitingSignature,
            PurchaseState::Broadcasting,
            PurchaseState::Confirming,
            PurchaseState::Succeeded,
        ]
    );
    assert!(events.iter().all(|e| e.attempt_id == receipt.attempt_id));
    assert!(events.iter().all(|e| e.failure.is_none()));

    let program_id = config().program.listing_program_id;
    let listing = derive_listing_address(&program_id, &seller, PRODUCT).unwrap();
    let expected_receipt =
        derive_receipt_address(&program_id, &signer.pubkey(), &listing.address, &receipt.disambiguator)
            .unwrap();
    assert_eq!(receipt.listing, listing.address);
    assert_eq!(receipt.receipt, expected_receipt.address);
    assert_eq!(receipt.signatures, vec![receipt.signature]);

    assert_eq!(oracle.calls(), 1);
    assert_eq!(signer.sign_count(), 1);
    assert_eq!(ledger.sent_count(), 1);
    assert_eq!(ledger.skip_preflight_flags(), vec![false]);
    assert!(!orch.inflight().is_in_flight(&AttemptKey {
        buyer: signer.pubkey(),
        seller,
        product_name: PRODUCT.to_string(),
    }));
}

#[tokio::test]
async fn test_buy_sits_between_post_and_close() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 120));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle, ledger.clone(), signer);

    orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap();

    let sent = ledger.sent_transactions();
    let order = discriminators(&sent[0]);
    let at = |name: &str| {
        order
            .iter()
            .position(|d| *d == instruction_discriminator(name))
            .unwrap_or_else(|| panic!("{name} missing"))
    };
    assert!(at("write_update") < at("post_update"));
    assert!(at("post_update") < at("buy"));
    assert!(at("buy") < at("close_update"));
}

#[tokio::test]
async fn test_missing_price_stops_before_ledger() {
    let oracle = Arc::new(MockPriceSource::empty(feed()));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle, ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoPriceForFeed);

    let events = drain(&mut rx);
    assert_eq!(
        states(&events),
        vec![PurchaseState::FetchingPrice, PurchaseState::Failed]
    );
    assert_eq!(events[1].failure, Some(FailureKind::NoPriceForFeed));
    assert_eq!(ledger.blockhash_calls(), 0);
    assert_eq!(ledger.sent_count(), 0);
    assert_eq!(signer.sign_count(), 0);
}

#[tokio::test]
async fn test_oracle_outage_is_retryable() {
    let oracle = Arc::new(MockPriceSource::failing(OracleError::Unavailable {
        endpoint: "https://hermes.test".to_string(),
        message: "HTTP 503".to_string(),
    }));
    let ledger = Arc::new(MockLedger::new());
    let orch = orchestrator(oracle, ledger.clone(), Arc::new(MockSigner::new()));

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::OracleUnavailable);
    assert!(failure.is_retryable());
    assert_eq!(ledger.sent_count(), 0);
}

#[tokio::test]
async fn test_long_product_name_rejected() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let orch = orchestrator(oracle, ledger.clone(), Arc::new(MockSigner::new()));
    let mut rx = orch.subscribe();

    let name = "x".repeat(33);
    let failure = orch.purchase(&Pubkey::new_unique(), &name).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::SeedTooLong);
    assert_eq!(
        states(&drain(&mut rx)),
        vec![
            PurchaseState::FetchingPrice,
            PurchaseState::DerivingAddresses,
            PurchaseState::Failed,
        ]
    );
    assert_eq!(ledger.sent_count(), 0);
}

#[tokio::test]
async fn test_signer_rejection_never_broadcasts() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::rejecting());
    let orch = orchestrator(oracle, ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::SignerRejected);
    assert!(!failure.is_retryable());

    let events = states(&drain(&mut rx));
    assert_eq!(events.last(), Some(&PurchaseState::Failed));
    assert!(!events.contains(&PurchaseState::Broadcasting));
    assert_eq!(signer.sign_count(), 1);
    assert_eq!(ledger.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_lookup_finds_landed_purchase() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new().land_late());
    let orch = orchestrator(oracle, ledger.clone(), Arc::new(MockSigner::new()));
    let mut rx = orch.subscribe();

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::ConfirmationTimeout);
    assert!(!failure.is_retryable());
    let signature = failure.signature.expect("timeout carries the signature");

    let events = drain(&mut rx);
    let n = events.len();
    assert_eq!(events[n - 2].state, PurchaseState::Confirming);
    assert_eq!(events[n - 1].state, PurchaseState::Failed);

    assert_eq!(
        orch.lookup(&signature).await.unwrap(),
        SignatureLookup::Confirmed(ConfirmationLevel::Finalized)
    );
    assert_eq!(ledger.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_lookup_not_found() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new().never_confirm());
    let orch = orchestrator(oracle, ledger, Arc::new(MockSigner::new()));

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    let signature = failure.signature.unwrap();
    assert_eq!(orch.lookup(&signature).await.unwrap(), SignatureLookup::NotFound);
}

#[tokio::test]
async fn test_on_chain_failure_reports_signature() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new().fail_on_chain(TransactionError::InstructionError(
        3,
        InstructionError::Custom(0x1771),
    )));
    let orch = orchestrator(oracle, ledger, Arc::new(MockSigner::new()));

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::TransactionFailed);
    assert!(failure.signature.is_some());
    assert!(failure.message.contains("0x1771"));
}

#[tokio::test]
async fn test_receipt_collision_retried_with_fresh_disambiguator() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    ledger.fail_next_send(account_in_use());
    let orch = orchestrator(oracle.clone(), ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();

    let receipt = orch
        .purchase_with_retry(&Pubkey::new_unique(), PRODUCT)
        .await
        .unwrap();

    let events = drain(&mut rx);
    let failed: Vec<&PurchaseEvent> = events
        .iter()
        .filter(|e| e.state == PurchaseState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure, Some(FailureKind::AccountAlreadyExists));
    assert_ne!(failed[0].attempt_id, receipt.attempt_id);

    assert_eq!(oracle.calls(), 2);
    assert_eq!(signer.sign_count(), 2);
    assert_eq!(ledger.sent_count(), 1);
}

#[tokio::test]
async fn test_landed_receipt_collision_retried_without_preflight() {
    // Without preflight the collision surfaces as the system program's
    // AccountAlreadyInUse on the buy instruction of the landed transaction
    const BUY_INDEX: u8 = 3;
    let mut cfg = config();
    cfg.submission.preflight = PreflightPolicy::Skip;
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    ledger.fail_next_landing(TransactionError::InstructionError(
        BUY_INDEX,
        InstructionError::Custom(0),
    ));
    let orch = PurchaseOrchestrator::new(&cfg, oracle.clone(), ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();

    let receipt = orch
        .purchase_with_retry(&Pubkey::new_unique(), PRODUCT)
        .await
        .unwrap();

    let sent = ledger.sent_transactions();
    assert_eq!(sent.len(), 2);
    let first = &sent[0];
    let buy = &first.message.instructions()[BUY_INDEX as usize];
    assert_eq!(&buy.data[..8], &instruction_discriminator("buy")[..]);
    assert_eq!(ledger.skip_preflight_flags(), vec![true, true]);

    let failed: Vec<PurchaseEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.state == PurchaseState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure, Some(FailureKind::AccountAlreadyExists));
    assert_ne!(failed[0].attempt_id, receipt.attempt_id);
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test]
async fn test_receipt_collision_retries_are_bounded() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    for _ in 0..5 {
        ledger.fail_next_send(account_in_use());
    }
    let orch = orchestrator(oracle, ledger.clone(), signer.clone());

    let failure = orch
        .purchase_with_retry(&Pubkey::new_unique(), PRODUCT)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::AccountAlreadyExists);

    let attempts = 1 + config().submission.max_disambiguator_retries as usize;
    assert_eq!(signer.sign_count(), attempts);
    assert_eq!(ledger.sent_count(), 0);
}

#[tokio::test]
async fn test_single_attempt_does_not_retry_collision() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    ledger.fail_next_send(account_in_use());
    let orch = orchestrator(oracle, ledger, signer.clone());

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::AccountAlreadyExists);
    assert!(failure.is_retryable());
    assert_eq!(signer.sign_count(), 1);
}

#[tokio::test]
async fn test_duplicate_attempt_refused_while_in_flight() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle.clone(), ledger.clone(), signer.clone());
    let seller = Pubkey::new_unique();
    let mut rx = orch.subscribe();

    let holder = AttemptId::new();
    let key = AttemptKey {
        buyer: signer.pubkey(),
        seller,
        product_name: PRODUCT.to_string(),
    };
    let guard = orch.inflight().try_acquire(key, &holder).unwrap();

    let failure = orch.purchase(&seller, PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::AttemptInProgress);
    assert!(failure.message.contains(&holder.to_string()));
    assert_eq!(states(&drain(&mut rx)), vec![PurchaseState::Failed]);
    assert_eq!(oracle.calls(), 0);
    assert_eq!(ledger.sent_count(), 0);

    // A different listing is independent
    orch.purchase(&seller, "Other Item").await.unwrap();

    drop(guard);
    orch.purchase(&seller, PRODUCT).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_purchases_of_same_listing_broadcast_once() {
    let oracle = Arc::new(
        MockPriceSource::with_payload(feed(), 100).with_delay(Duration::from_millis(50)),
    );
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle.clone(), ledger.clone(), signer.clone());
    let seller = Pubkey::new_unique();

    let (a, b) = tokio::join!(
        orch.purchase(&seller, PRODUCT),
        orch.purchase(&seller, PRODUCT)
    );

    let outcomes = [a, b];
    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    let refused: Vec<_> = outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .collect();
    assert_eq!(succeeded, 1);
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].kind, FailureKind::AttemptInProgress);

    assert_eq!(oracle.calls(), 1);
    assert_eq!(signer.sign_count(), 1);
    assert_eq!(ledger.sent_count(), 1);
    assert!(orch.inflight().is_empty());
}

#[tokio::test]
async fn test_large_attestation_spans_envelopes() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 2_000));
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let orch = orchestrator(oracle, ledger.clone(), signer.clone());
    let mut rx = orch.subscribe();

    let receipt = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap();

    let sent = ledger.sent_transactions();
    assert!(sent.len() > 1);
    assert_eq!(receipt.signatures.len(), sent.len());
    assert_eq!(receipt.signature, *receipt.signatures.last().unwrap());
    assert_eq!(signer.sign_count(), sent.len());

    // Only the final envelope carries the buy instruction
    let buy = instruction_discriminator("buy");
    for tx in &sent[..sent.len() - 1] {
        assert!(!discriminators(tx).contains(&buy));
    }
    assert!(discriminators(&sent[sent.len() - 1]).contains(&buy));

    let awaiting = states(&drain(&mut rx))
        .into_iter()
        .filter(|s| *s == PurchaseState::AwaitingSignature)
        .count();
    assert_eq!(awaiting, sent.len());
}

#[tokio::test]
async fn test_failure_after_partial_landing_reports_landed_envelopes() {
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 2_000));
    let ledger = Arc::new(MockLedger::new());
    ledger.fail_send_attempt(
        2,
        LedgerError::Transport {
            endpoint: "http://ledger.test".to_string(),
            message: "connection reset".to_string(),
        },
    );
    let orch = orchestrator(oracle, ledger.clone(), Arc::new(MockSigner::new()));

    let failure = orch.purchase(&Pubkey::new_unique(), PRODUCT).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::BroadcastFailed);
    assert!(failure.message.contains("1 earlier envelope(s) already landed"));
    assert_eq!(ledger.sent_count(), 1);
}

#[tokio::test]
async fn test_create_listing() {
    let ledger = Arc::new(MockLedger::new());
    let signer = Arc::new(MockSigner::new());
    let oracle = Arc::new(MockPriceSource::with_payload(feed(), 100));
    let orch = orchestrator(oracle.clone(), ledger.clone(), signer.clone());

    let created = orch.create_listing(PRODUCT, "ipfs://sword.png", 100).await.unwrap();

    let expected = orch.listing_address(&signer.pubkey(), PRODUCT).unwrap();
    assert_eq!(created.listing, expected);
    assert_eq!(ledger.sent_count(), 1);
    assert_eq!(
        discriminators(&ledger.sent_transactions()[0]),
        vec![instruction_discriminator("initialize")]
    );
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_create_listing_rejects_long_name() {
    let ledger = Arc::new(MockLedger::new());
    let orch = orchestrator(
        Arc::new(MockPriceSource::with_payload(feed(), 100)),
        ledger.clone(),
        Arc::new(MockSigner::new()),
    );

    let failure = orch
        .create_listing(&"y".repeat(40), "", 1)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::SeedTooLong);
    assert_eq!(ledger.sent_count(), 0);
}

#[tokio::test]
async fn test_empty_product_name_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let orch = orchestrator(
        Arc::new(MockPriceSource::with_payload(feed(), 100)),
        ledger.clone(),
        Arc::new(MockSigner::new()),
    );

    let failure = orch.purchase(&Pubkey::new_unique(), "").await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::SeedTooLong);
    assert_eq!(ledger.sent_count(), 0);
}

//! Purchase attempt state machine and its events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::errors::FailureKind;
use crate::observability::AttemptId;

/// States of one purchase attempt
///
/// ```text
/// Idle → FetchingPrice → DerivingAddresses → Assembling
///      → AwaitingSignature → Broadcasting → Confirming → Succeeded
/// ```
///
/// Every non-terminal state may move to `Failed`. `Confirming` loops back to
/// `AwaitingSignature` while envelopes remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseState {
    Idle,
    FetchingPrice,
    DerivingAddresses,
    Assembling,
    AwaitingSignature,
    Broadcasting,
    Confirming,
    Succeeded,
    Failed,
}

impl PurchaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(&self, next: PurchaseState) -> bool {
        use PurchaseState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, FetchingPrice)
            | (FetchingPrice, DerivingAddresses)
            | (DerivingAddresses, Assembling)
            | (Assembling, AwaitingSignature)
            | (AwaitingSignature, Broadcasting)
            | (Broadcasting, Confirming)
            | (Confirming, AwaitingSignature)
            | (Confirming, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Published on every state an attempt enters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub attempt_id: AttemptId,
    pub state: PurchaseState,
    /// Set only on the terminal `Failed` event
    pub failure: Option<FailureKind>,
    pub at: DateTime<Utc>,
}

/// Tracks the current state of one attempt and publishes transitions
pub(crate) struct StateTracker {
    attempt_id: AttemptId,
    state: PurchaseState,
    events: broadcast::Sender<PurchaseEvent>,
}

impl StateTracker {
    pub(crate) fn new(attempt_id: AttemptId, events: broadcast::Sender<PurchaseEvent>) -> Self {
        Self {
            attempt_id,
            state: PurchaseState::Idle,
            events,
        }
    }

    pub(crate) fn state(&self) -> PurchaseState {
        self.state
    }

    pub(crate) fn enter(&mut self, next: PurchaseState) {
        self.transition(next, None);
    }

    pub(crate) fn fail(&mut self, kind: FailureKind) {
        self.transition(PurchaseState::Failed, Some(kind));
    }

    fn transition(&mut self, next: PurchaseState, failure: Option<FailureKind>) {
        if !self.state.can_transition_to(next) {
            // Programming error; keep the attempt's terminal state intact
            error!(
                attempt_id = %self.attempt_id,
                from = %self.state,
                to = %next,
                "Illegal purchase state transition"
            );
            debug_assert!(false, "illegal transition {} -> {}", self.state, next);
            return;
        }

        debug!(attempt_id = %self.attempt_id, from = %self.state, to = %next, "State transition");
        self.state = next;

        // No subscribers is fine
        let _ = self.events.send(PurchaseEvent {
            attempt_id: self.attempt_id.clone(),
            state: next,
            failure,
            at: Utc::now(),
        });
    }
}

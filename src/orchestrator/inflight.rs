//! In-flight attempt registry
//!
//! At most one attempt per (buyer, seller, product name) runs at a time. A
//! listing address is a pure function of (seller, product name), so this is
//! the same as one attempt per (buyer, listing).
//!
//! Slots are held by an RAII guard and released when it drops, including
//! when the attempt's future is cancelled.

use dashmap::{mapref::entry::Entry, DashMap};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

use crate::metrics::metrics;
use crate::observability::AttemptId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub buyer: Pubkey,
    pub seller: Pubkey,
    pub product_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    attempts: Arc<DashMap<AttemptKey, AttemptId>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`, or report the attempt already holding it
    pub fn try_acquire(
        &self,
        key: AttemptKey,
        attempt_id: &AttemptId,
    ) -> Result<InFlightGuard, AttemptId> {
        match self.attempts.entry(key.clone()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(attempt_id.clone());
                metrics().active_attempts.inc();
                Ok(InFlightGuard {
                    attempts: Arc::clone(&self.attempts),
                    key,
                    attempt_id: attempt_id.clone(),
                })
            }
        }
    }

    pub fn is_in_flight(&self, key: &AttemptKey) -> bool {
        self.attempts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Holds an in-flight slot until dropped
#[derive(Debug)]
pub struct InFlightGuard {
    attempts: Arc<DashMap<AttemptKey, AttemptId>>,
    key: AttemptKey,
    attempt_id: AttemptId,
}

impl InFlightGuard {
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let removed = self
            .attempts
            .remove_if(&self.key, |_, holder| *holder == self.attempt_id);
        if removed.is_some() {
            metrics().active_attempts.dec();
            debug!(attempt_id = %self.attempt_id, "Released in-flight slot");
        }
    }
}

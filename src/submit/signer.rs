//! Signer abstraction for purchase transactions
//!
//! The purchaser's signer is an external party: a local keypair here, but
//! the trait leaves room for wallets that can refuse a request.

use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use thiserror::Error;

use crate::compat;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The signer declined to sign
    #[error("Signer rejected the request: {0}")]
    Rejected(String),

    /// Signing was attempted and failed
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Async signer for compiled transactions
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Public key of the paying and signing account
    fn pubkey(&self) -> Pubkey;

    /// Sign every required slot of `tx` and return it
    async fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SignerError>;
}

/// Local keypair signer
pub struct KeypairSigner {
    keypair: Arc<Keypair>,
}

impl KeypairSigner {
    pub fn new(keypair: Arc<Keypair>) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SignerError> {
        let required = compat::get_required_signers(&tx.message);
        if required != [self.keypair.pubkey()].as_slice() {
            return Err(SignerError::Signing(format!(
                "transaction requires signers {:?}, this signer holds only {}",
                required,
                self.keypair.pubkey()
            )));
        }

        VersionedTransaction::try_new(tx.message, &[self.keypair.as_ref()])
            .map_err(|e| SignerError::Signing(e.to_string()))
    }
}

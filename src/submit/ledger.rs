//! Ledger RPC seam
//!
//! [`LedgerRpc`] is the only way the submission controller talks to the
//! ledger. [`RpcLedger`] implements it over the nonblocking Solana RPC
//! client; tests substitute an in-memory ledger.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
    rpc_request::{RpcError, RpcResponseErrorData},
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    signature::Signature,
    transaction::{TransactionError, VersionedTransaction},
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How far a landed transaction has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    Processed,
    Confirmed,
    Finalized,
}

impl ConfirmationLevel {
    pub fn as_commitment(&self) -> CommitmentConfig {
        let commitment = match self {
            Self::Processed => CommitmentLevel::Processed,
            Self::Confirmed => CommitmentLevel::Confirmed,
            Self::Finalized => CommitmentLevel::Finalized,
        };
        CommitmentConfig { commitment }
    }
}

impl From<TransactionConfirmationStatus> for ConfirmationLevel {
    fn from(status: TransactionConfirmationStatus) -> Self {
        match status {
            TransactionConfirmationStatus::Processed => Self::Processed,
            TransactionConfirmationStatus::Confirmed => Self::Confirmed,
            TransactionConfirmationStatus::Finalized => Self::Finalized,
        }
    }
}

/// Status of a signature the ledger knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Landed without error at the given level
    Landed(ConfirmationLevel),
    /// Landed and failed on-chain
    Failed(TransactionError),
}

/// Errors raised by a ledger RPC call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The node simulated the transaction and it failed
    #[error("Preflight simulation failed: {message}")]
    Preflight { message: String, logs: Vec<String> },

    /// Network or connection failure; the request may not have arrived
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// The node answered with an error
    #[error("RPC response error: {message} (endpoint: {endpoint})")]
    Rpc { endpoint: String, message: String },
}

impl LedgerError {
    /// True when the failure says an account the transaction creates exists
    /// already (a receipt collision, for purchases)
    pub fn is_account_in_use(&self) -> bool {
        let mentions = |s: &str| s.to_lowercase().contains("already in use");
        match self {
            Self::Preflight { message, logs } => {
                mentions(message) || logs.iter().any(|l| mentions(l))
            }
            Self::Rpc { message, .. } => mentions(message),
            Self::Transport { .. } => false,
        }
    }

    pub fn from_client_error(err: &ClientError, endpoint: &str) -> Self {
        match err.kind() {
            ClientErrorKind::RpcError(RpcError::RpcResponseError {
                message,
                data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
                ..
            }) => {
                let detail = result
                    .err
                    .as_ref()
                    .map(|e| format!("{}: {:?}", message, e))
                    .unwrap_or_else(|| message.clone());
                Self::Preflight {
                    message: detail,
                    logs: result.logs.clone().unwrap_or_default(),
                }
            }
            ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => Self::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            },
            _ => Self::Rpc {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Minimal ledger surface the submission controller needs
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Send a signed transaction; with `skip_preflight` the node forwards it
    /// without simulating first
    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, LedgerError>;

    /// `Ok(None)` means the ledger has no record of the signature.
    /// `search_history` extends the search past the recent status cache.
    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> Result<Option<LedgerStatus>, LedgerError>;
}

/// [`LedgerRpc`] over the nonblocking Solana RPC client
pub struct RpcLedger {
    client: Arc<RpcClient>,
    endpoint: String,
    preflight_commitment: CommitmentLevel,
}

impl RpcLedger {
    pub fn new(endpoint: impl Into<String>, commitment: ConfirmationLevel, timeout: Duration) -> Self {
        let endpoint = endpoint.into();
        let client = RpcClient::new_with_timeout_and_commitment(
            endpoint.clone(),
            timeout,
            commitment.as_commitment(),
        );
        Self {
            client: Arc::new(client),
            endpoint,
            preflight_commitment: commitment.as_commitment().commitment,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LedgerRpc for RpcLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| LedgerError::from_client_error(&e, &self.endpoint))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, LedgerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.preflight_commitment),
            max_retries: Some(0),
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| LedgerError::from_client_error(&e, &self.endpoint))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> Result<Option<LedgerStatus>, LedgerError> {
        let signatures = [*signature];
        let response = if search_history {
            self.client
                .get_signature_statuses_with_history(&signatures)
                .await
        } else {
            self.client.get_signature_statuses(&signatures).await
        }
        .map_err(|e| LedgerError::from_client_error(&e, &self.endpoint))?;

        Ok(response
            .value
            .into_iter()
            .next()
            .flatten()
            .map(|status| match status.err {
                Some(err) => LedgerStatus::Failed(err),
                None => LedgerStatus::Landed(status.confirmation_status().into()),
            }))
    }
}

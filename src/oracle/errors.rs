//! Error types for price attestation retrieval

use thiserror::Error;

/// Failure modes of the attestation fetcher
///
/// `Unavailable` is transient. `NoPrice` points at a feed configuration
/// problem and does not clear up by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Network failure, timeout or non-success HTTP status
    #[error("Oracle unreachable ({endpoint}): {message}")]
    Unavailable { endpoint: String, message: String },

    /// The oracle answered but had no payload for a requested feed
    #[error("No price available for feed {feed}")]
    NoPrice { feed: String },

    /// The oracle answered with something that is not a valid attestation
    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    /// Feed identifier could not be parsed
    #[error("Invalid feed id '{0}': expected 32 bytes of hex")]
    InvalidFeedId(String),
}

impl OracleError {
    /// Check if retrying the same request might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Error category for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "oracle_unavailable",
            Self::NoPrice { .. } => "no_price",
            Self::Malformed(_) => "malformed",
            Self::InvalidFeedId(_) => "invalid_feed",
        }
    }
}

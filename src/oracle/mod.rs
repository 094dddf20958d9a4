//! Price attestation retrieval
//!
//! A [`PriceSource`] returns the latest signed price payload for each
//! requested feed. Reads are idempotent and side-effect free; staleness is
//! enforced by the consuming program, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod errors;
pub mod hermes;

pub use errors::OracleError;
pub use hermes::HermesClient;

/// SOL/USD feed on the Pyth network
pub const SOL_USD_FEED: &str = "0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d";

/// 32-byte price feed identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedId([u8; 32]);

impl FeedId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix, as the oracle reports it
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for FeedId {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|_| OracleError::InvalidFeedId(s.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| OracleError::InvalidFeedId(s.to_string()))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for FeedId {
    type Error = OracleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedId> for String {
    fn from(value: FeedId) -> Self {
        format!("0x{}", value.to_hex())
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId(0x{})", self.to_hex())
    }
}

/// Human-readable view of the attested price, when the oracle provides one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: i64,
}

impl PriceSnapshot {
    /// Price as a float, for logging only
    pub fn as_f64(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.expo)
    }
}

/// A signed price payload for one feed, as fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceAttestation {
    pub feed_id: FeedId,

    /// Opaque signed payload, already base64-decoded
    pub payload: Vec<u8>,

    /// Parsed view of the payload (publish time is the freshness timestamp)
    pub snapshot: Option<PriceSnapshot>,
}

impl PriceAttestation {
    pub fn publish_time(&self) -> Option<i64> {
        self.snapshot.map(|s| s.publish_time)
    }

    /// Seconds between the attestation's publish time and `now_unix`
    pub fn age_secs(&self, now_unix: i64) -> Option<i64> {
        self.publish_time().map(|t| now_unix - t)
    }
}

/// Source of signed price attestations
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest attestation for each requested feed, in request order
    async fn fetch_latest(&self, feed_ids: &[FeedId]) -> Result<Vec<PriceAttestation>, OracleError>;
}

//! HTTP client for the Pyth Hermes price service
//!
//! Queries `GET /v2/updates/price/latest?ids[]=<feed>&encoding=base64&parsed=true`
//! once per feed. Transport failures are retried with exponential backoff;
//! an answer without a payload is reported as [`OracleError::NoPrice`] and is
//! never retried.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use futures::future::try_join_all;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

use super::{FeedId, OracleError, PriceAttestation, PriceSnapshot, PriceSource};
use crate::metrics::metrics;

/// Default public Hermes endpoint
pub const DEFAULT_HERMES_URL: &str = "https://hermes.pyth.network";

const LATEST_UPDATES_PATH: &str = "/v2/updates/price/latest";

#[derive(Debug, Deserialize)]
struct LatestUpdatesResponse {
    binary: BinaryUpdate,
    #[serde(default)]
    parsed: Option<Vec<ParsedUpdate>>,
}

#[derive(Debug, Deserialize)]
struct BinaryUpdate {
    encoding: String,
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ParsedUpdate {
    id: String,
    price: ParsedPrice,
}

// Hermes renders price and conf as decimal strings
#[derive(Debug, Deserialize)]
struct ParsedPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

impl ParsedPrice {
    fn to_snapshot(&self) -> Option<PriceSnapshot> {
        Some(PriceSnapshot {
            price: self.price.parse().ok()?,
            conf: self.conf.parse().ok()?,
            expo: self.expo,
            publish_time: self.publish_time,
        })
    }
}

/// Hermes client implementing [`PriceSource`]
#[derive(Debug, Clone)]
pub struct HermesClient {
    http: Client,
    base_url: String,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl HermesClient {
    /// Create a client with a per-request timeout
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, OracleError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OracleError::Unavailable {
                endpoint: base_url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        })
    }

    /// Override the transient-failure retry policy
    pub fn with_retry(mut self, max_retries: usize, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, LATEST_UPDATES_PATH)
    }

    async fn fetch_feed(&self, feed_id: FeedId) -> Result<PriceAttestation, OracleError> {
        let base = self.retry_base_delay.as_millis().max(1) as u64;
        let strategy = ExponentialBackoff::from_millis(base)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.fetch_feed_once(feed_id),
            |err: &OracleError| {
                let retry = err.is_retryable();
                if retry {
                    warn!(feed = %feed_id, error = %err, "Oracle request failed, retrying");
                }
                retry
            },
        )
        .await
    }

    async fn fetch_feed_once(&self, feed_id: FeedId) -> Result<PriceAttestation, OracleError> {
        let endpoint = self.endpoint();
        let started = Instant::now();

        let response = self
            .http
            .get(&endpoint)
            .query(&[
                ("ids[]", feed_id.to_hex()),
                ("encoding", "base64".to_string()),
                ("parsed", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| OracleError::Unavailable {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        metrics()
            .oracle_latency
            .observe(started.elapsed().as_secs_f64());

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::Unavailable {
                endpoint,
                message: format!("HTTP {}", status),
            });
        }
        // Hermes answers 400/404 for feed ids it does not serve
        if status.is_client_error() {
            debug!(feed = %feed_id, %status, "Oracle refused the feed");
            return Err(OracleError::NoPrice {
                feed: feed_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(OracleError::Malformed(format!("unexpected HTTP {}", status)));
        }

        let body: LatestUpdatesResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(format!("JSON parse error: {}", e)))?;

        parse_latest_update(feed_id, body)
    }
}

fn parse_latest_update(
    feed_id: FeedId,
    body: LatestUpdatesResponse,
) -> Result<PriceAttestation, OracleError> {
    if body.binary.encoding != "base64" {
        return Err(OracleError::Malformed(format!(
            "unexpected encoding '{}'",
            body.binary.encoding
        )));
    }

    let encoded = match body.binary.data.first() {
        Some(data) if !data.is_empty() => data,
        _ => {
            return Err(OracleError::NoPrice {
                feed: feed_id.to_string(),
            })
        }
    };

    let payload = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| OracleError::Malformed(format!("payload is not base64: {}", e)))?;
    if payload.is_empty() {
        return Err(OracleError::NoPrice {
            feed: feed_id.to_string(),
        });
    }

    let wanted = feed_id.to_hex();
    let snapshot = body
        .parsed
        .unwrap_or_default()
        .iter()
        .find(|p| p.id.trim_start_matches("0x").eq_ignore_ascii_case(&wanted))
        .and_then(|p| p.price.to_snapshot());

    debug!(
        feed = %feed_id,
        payload_len = payload.len(),
        publish_time = ?snapshot.map(|s| s.publish_time),
        "Fetched price attestation"
    );

    Ok(PriceAttestation {
        feed_id,
        payload,
        snapshot,
    })
}

#[async_trait]
impl PriceSource for HermesClient {
    async fn fetch_latest(
        &self,
        feed_ids: &[FeedId],
    ) -> Result<Vec<PriceAttestation>, OracleError> {
        try_join_all(feed_ids.iter().map(|id| self.fetch_feed(*id))).await
    }
}

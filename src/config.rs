//! Configuration module for the purchase client
//!
//! Configuration is loaded from a TOML file, with `.env` support and a few
//! environment overrides for the values that differ per deployment.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::oracle::{hermes::DEFAULT_HERMES_URL, FeedId, SOL_USD_FEED};
use crate::submit::ledger::ConfirmationLevel;
use crate::tx_builder::receiver::DEFAULT_RECEIVER_PROGRAM_ID;

/// Listing program deployed on devnet
pub const DEFAULT_LISTING_PROGRAM_ID: &str = "6wuLk2iZ7gca4t3nbNiZYjspFEr8L9xGDwWeMAhojPMw";

pub const ENV_RPC_URL: &str = "PURCHASE_RPC_URL";
pub const ENV_HERMES_URL: &str = "PURCHASE_HERMES_URL";
pub const ENV_KEYPAIR: &str = "PURCHASE_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub program: ProgramConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    /// Required: the preflight policy must be chosen explicitly
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_hermes_url")]
    pub hermes_url: String,

    #[serde(default = "default_oracle_timeout")]
    pub request_timeout_secs: u64,

    /// Transient-failure retries per feed
    #[serde(default = "default_oracle_retries")]
    pub max_retries: usize,

    #[serde(default = "default_oracle_retry_delay")]
    pub retry_base_delay_ms: u64,

    /// Feeds the listing program reads during a purchase
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    #[serde(with = "pubkey_string", default = "default_listing_program")]
    pub listing_program_id: Pubkey,

    #[serde(with = "pubkey_string", default = "default_receiver_program")]
    pub receiver_program_id: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Compute unit limit per envelope (0 = leave at the runtime default)
    #[serde(default)]
    pub compute_unit_limit: u32,

    /// Compute unit price in micro-lamports (0 = no priority fee)
    #[serde(default = "default_unit_price")]
    pub compute_unit_price_micro_lamports: u64,

    /// Payload bytes per `write_update` instruction
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
}

/// Whether the RPC node simulates a transaction before forwarding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightPolicy {
    Simulate,
    Skip,
}

impl PreflightPolicy {
    pub fn skip_preflight(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub preflight: PreflightPolicy,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_commitment")]
    pub commitment: ConfirmationLevel,

    /// Fresh-disambiguator retries after a receipt collision
    #[serde(default = "default_disambiguator_retries")]
    pub max_disambiguator_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.devnet.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_hermes_url() -> String { DEFAULT_HERMES_URL.to_string() }
fn default_oracle_timeout() -> u64 { 10 }
fn default_oracle_retries() -> usize { 3 }
fn default_oracle_retry_delay() -> u64 { 100 }
fn default_feeds() -> Vec<FeedId> {
    FeedId::from_str(SOL_USD_FEED).into_iter().collect()
}
fn default_listing_program() -> Pubkey { Pubkey::from_str(DEFAULT_LISTING_PROGRAM_ID).unwrap_or_default() }
fn default_receiver_program() -> Pubkey { Pubkey::from_str(DEFAULT_RECEIVER_PROGRAM_ID).unwrap_or_default() }
fn default_unit_price() -> u64 { 50_000 }
fn default_write_chunk_size() -> usize { 512 }
fn default_poll_interval() -> u64 { 500 }
fn default_confirmation_timeout() -> u64 { 60 }
fn default_commitment() -> ConfirmationLevel { ConfirmationLevel::Confirmed }
fn default_disambiguator_retries() -> u32 { 2 }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            request_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            hermes_url: default_hermes_url(),
            request_timeout_secs: default_oracle_timeout(),
            max_retries: default_oracle_retries(),
            retry_base_delay_ms: default_oracle_retry_delay(),
            feeds: default_feeds(),
        }
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            listing_program_id: default_listing_program(),
            receiver_program_id: default_receiver_program(),
        }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            compute_unit_limit: 0,
            compute_unit_price_micro_lamports: default_unit_price(),
            write_chunk_size: default_write_chunk_size(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            preflight: PreflightPolicy::Simulate,
            poll_interval_ms: default_poll_interval(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            commitment: default_commitment(),
            max_disambiguator_retries: default_disambiguator_retries(),
        }
    }
}

impl SubmissionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            oracle: OracleConfig::default(),
            program: ProgramConfig::default(),
            assembler: AssemblerConfig::default(),
            submission: SubmissionConfig::default(),
            wallet: WalletConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.ledger.rpc_url = url;
        }
        if let Some(url) = lookup(ENV_HERMES_URL) {
            self.oracle.hermes_url = url;
        }
        if let Some(path) = lookup(ENV_KEYPAIR) {
            self.wallet.keypair_path = path;
        }
    }

    /// Reject values that would make the client misbehave at runtime
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.rpc_url.trim().is_empty() {
            bail!("ledger.rpc_url must not be empty");
        }
        if self.oracle.hermes_url.trim().is_empty() {
            bail!("oracle.hermes_url must not be empty");
        }
        if self.ledger.request_timeout_secs == 0 || self.oracle.request_timeout_secs == 0 {
            bail!("request timeouts must be greater than zero");
        }
        if self.oracle.feeds.is_empty() {
            bail!("oracle.feeds must name at least one feed");
        }
        if self.assembler.write_chunk_size == 0 {
            bail!("assembler.write_chunk_size must be greater than zero");
        }
        if self.submission.poll_interval_ms == 0 {
            bail!("submission.poll_interval_ms must be greater than zero");
        }
        if self.submission.confirmation_timeout_secs == 0 {
            bail!("submission.confirmation_timeout_secs must be greater than zero");
        }
        if self.program.listing_program_id == Pubkey::default() {
            bail!("program.listing_program_id must be set");
        }
        Ok(())
    }
}

/// Base58 string form for `Pubkey` fields
mod pubkey_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(|e| D::Error::custom(format!("invalid pubkey '{}': {}", s, e)))
    }
}

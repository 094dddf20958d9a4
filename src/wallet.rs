//! Wallet loading

use anyhow::{Context, Result};
use solana_sdk::signature::{Keypair, Signer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::submit::KeypairSigner;

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Load a keypair from a Solana CLI JSON file or a raw 64-byte file
pub fn load_keypair(path: &str) -> Result<Keypair> {
    let resolved = expand_home(path);
    let bytes = std::fs::read(&resolved)
        .with_context(|| format!("Failed to read keypair file: {}", resolved.display()))?;

    let secret: Vec<u8> = if bytes.len() == 64 {
        bytes
    } else {
        serde_json::from_slice(&bytes).context("Failed to parse keypair JSON")?
    };

    if secret.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", secret.len());
    }
    if secret.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(secret.as_slice()).context("Invalid keypair bytes")
}

/// Buyer/creator wallet
#[derive(Clone)]
pub struct Wallet {
    keypair: Arc<Keypair>,
}

impl Wallet {
    pub fn from_file(path: &str) -> Result<Self> {
        Ok(Self::from_keypair(load_keypair(path)?))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> solana_sdk::pubkey::Pubkey {
        self.keypair.pubkey()
    }

    /// Signer for the submission controller
    pub fn signer(&self) -> KeypairSigner {
        KeypairSigner::new(Arc::clone(&self.keypair))
    }
}

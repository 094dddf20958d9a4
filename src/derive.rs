//! Deterministic account addresses for listings and receipts
//!
//! Both the creating party and any purchasing party recompute the listing
//! address independently, so the seed layout below is frozen:
//!
//! - listing: `LISTING_SEED ‖ seller ‖ utf8(product_name)`
//! - receipt: `RECEIPT_SEED ‖ buyer ‖ listing ‖ disambiguator`
//!
//! Changing a tag, the seed order, or the byte form of the product name
//! makes every existing listing unaddressable.

use solana_sdk::{
    pubkey::{Pubkey, MAX_SEEDS, MAX_SEED_LEN},
    signature::{Keypair, Signer},
};
use thiserror::Error;

/// Seed tag for listing accounts
pub const LISTING_SEED: &[u8] = b"LISTING_SEED";

/// Seed tag for receipt accounts
pub const RECEIPT_SEED: &[u8] = b"RECEIPT_SEED";

/// Caller-side seed validation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeriveError {
    /// A single seed exceeds the ledger's per-seed limit
    #[error("seed '{label}' is {len} bytes, limit is {max}")]
    SeedTooLong {
        label: &'static str,
        len: usize,
        max: usize,
    },

    /// Empty product names would collide with the bare (tag, owner) prefix
    #[error("seed '{label}' must not be empty")]
    EmptySeed { label: &'static str },

    /// More seeds than a single derivation accepts
    #[error("{count} seeds supplied, limit is {max}")]
    TooManySeeds { count: usize, max: usize },
}

/// A derived address together with its bump byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

impl From<(Pubkey, u8)> for DerivedAddress {
    fn from((address, bump): (Pubkey, u8)) -> Self {
        Self { address, bump }
    }
}

/// Validate a product name for use as a derivation seed.
///
/// The limit applies to the UTF-8 byte length, not the character count.
pub fn validate_product_name(product_name: &str) -> Result<(), DeriveError> {
    let len = product_name.len();
    if len == 0 {
        return Err(DeriveError::EmptySeed {
            label: "product_name",
        });
    }
    if len > MAX_SEED_LEN {
        return Err(DeriveError::SeedTooLong {
            label: "product_name",
            len,
            max: MAX_SEED_LEN,
        });
    }
    Ok(())
}

/// Derive an address from an ordered list of seeds.
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<DerivedAddress, DeriveError> {
    if seeds.len() > MAX_SEEDS {
        return Err(DeriveError::TooManySeeds {
            count: seeds.len(),
            max: MAX_SEEDS,
        });
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(DeriveError::SeedTooLong {
            label: "seed",
            len: seed.len(),
            max: MAX_SEED_LEN,
        });
    }
    Ok(Pubkey::find_program_address(seeds, program_id).into())
}

/// Listing address for `(seller, product_name)`.
pub fn derive_listing_address(
    program_id: &Pubkey,
    seller: &Pubkey,
    product_name: &str,
) -> Result<DerivedAddress, DeriveError> {
    validate_product_name(product_name)?;
    derive(
        &[LISTING_SEED, seller.as_ref(), product_name.as_bytes()],
        program_id,
    )
}

/// Receipt address for `(buyer, listing, disambiguator)`.
pub fn derive_receipt_address(
    program_id: &Pubkey,
    buyer: &Pubkey,
    listing: &Pubkey,
    disambiguator: &Pubkey,
) -> Result<DerivedAddress, DeriveError> {
    derive(
        &[
            RECEIPT_SEED,
            buyer.as_ref(),
            listing.as_ref(),
            disambiguator.as_ref(),
        ],
        program_id,
    )
}

/// Fresh single-use receipt disambiguator.
///
/// Only the public half of a throwaway keypair is kept; the secret is dropped
/// immediately and never signs anything.
pub fn fresh_disambiguator() -> Pubkey {
    Keypair::new().pubkey()
}

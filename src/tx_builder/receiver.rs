//! Instructions for the price attestation receiver program
//!
//! An attestation lands on-chain in three steps, all signed and paid for by
//! the purchaser:
//!
//! 1. `write_update(offset, chunk)` stages the payload in a buffer account,
//!    one chunk per instruction so large payloads can span envelopes
//! 2. `post_update(feed_id)` verifies the staged payload and writes the
//!    price-update account the business instruction reads
//! 3. `close_update()` closes both accounts and refunds rent
//!
//! Buffer and price-update addresses are derived from
//! `(payer, feed_id, sha256(payload))`, so they are known before anything is
//! posted and never depend on fresh randomness.

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};
use std::collections::BTreeMap;

use crate::derive::{derive, DeriveError, DerivedAddress};
use crate::oracle::{FeedId, PriceAttestation};
use crate::program::{instruction_discriminator, ArgWriter};

/// Receiver program on Solana devnet and mainnet
pub const DEFAULT_RECEIVER_PROGRAM_ID: &str = "rec5EKMGg6MxZYaMdyBfgwp4d5rB9T1VQH5pJv5Cc59";

pub const BUFFER_SEED: &[u8] = b"attestation_buffer";
pub const PRICE_UPDATE_SEED: &[u8] = b"price_update";

/// Everything needed to post and later close one feed's attestation
#[derive(Debug, Clone)]
pub struct FeedPlan {
    pub feed_id: FeedId,
    pub buffer: DerivedAddress,
    pub price_update: DerivedAddress,
    /// `write_update` instructions, in offset order
    pub staging: Vec<Instruction>,
    pub post: Instruction,
    pub close: Instruction,
}

/// Resolved on-chain addresses of just-posted attestations, by feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAttestations(BTreeMap<FeedId, Pubkey>);

impl ResolvedAttestations {
    pub fn get(&self, feed_id: &FeedId) -> Option<Pubkey> {
        self.0.get(feed_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeedId, &Pubkey)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// First phase of assembly: attestation instructions plus their addresses
#[derive(Debug, Clone, Default)]
pub struct AttestationPlan {
    pub feeds: Vec<FeedPlan>,
}

impl AttestationPlan {
    /// Map each planned feed to the address its attestation will land at
    pub fn resolved(&self) -> ResolvedAttestations {
        ResolvedAttestations(
            self.feeds
                .iter()
                .map(|f| (f.feed_id, f.price_update.address))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

fn payload_digest(payload: &[u8]) -> [u8; 32] {
    Sha256::digest(payload).into()
}

/// Plan the receiver instructions for a set of attestations.
///
/// Duplicate feeds keep their first attestation only.
pub fn plan_attestations(
    receiver_program_id: &Pubkey,
    payer: &Pubkey,
    attestations: &[PriceAttestation],
    chunk_size: usize,
) -> Result<AttestationPlan, DeriveError> {
    let chunk_size = chunk_size.max(1);
    let mut feeds: Vec<FeedPlan> = Vec::with_capacity(attestations.len());

    for attestation in attestations {
        if feeds.iter().any(|f| f.feed_id == attestation.feed_id) {
            continue;
        }
        let digest = payload_digest(&attestation.payload);
        let feed_bytes = attestation.feed_id.as_bytes();

        let buffer = derive(
            &[BUFFER_SEED, payer.as_ref(), feed_bytes, &digest],
            receiver_program_id,
        )?;
        let price_update = derive(
            &[PRICE_UPDATE_SEED, payer.as_ref(), feed_bytes, &digest],
            receiver_program_id,
        )?;

        let staging = attestation
            .payload
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                write_update_instruction(
                    receiver_program_id,
                    payer,
                    &buffer.address,
                    (i * chunk_size) as u32,
                    chunk,
                )
            })
            .collect();

        feeds.push(FeedPlan {
            feed_id: attestation.feed_id,
            buffer,
            price_update,
            staging,
            post: post_update_instruction(
                receiver_program_id,
                payer,
                &buffer.address,
                &price_update.address,
                &attestation.feed_id,
            ),
            close: close_update_instruction(
                receiver_program_id,
                payer,
                &buffer.address,
                &price_update.address,
            ),
        });
    }

    Ok(AttestationPlan { feeds })
}

pub fn write_update_instruction(
    receiver_program_id: &Pubkey,
    payer: &Pubkey,
    buffer: &Pubkey,
    offset: u32,
    chunk: &[u8],
) -> Instruction {
    Instruction {
        program_id: *receiver_program_id,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*buffer, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: ArgWriter::new(instruction_discriminator("write_update"))
            .u32(offset)
            .bytes(chunk)
            .finish(),
    }
}

pub fn post_update_instruction(
    receiver_program_id: &Pubkey,
    payer: &Pubkey,
    buffer: &Pubkey,
    price_update: &Pubkey,
    feed_id: &FeedId,
) -> Instruction {
    Instruction {
        program_id: *receiver_program_id,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*buffer, false),
            AccountMeta::new(*price_update, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: ArgWriter::new(instruction_discriminator("post_update"))
            .fixed(feed_id.as_bytes())
            .finish(),
    }
}

pub fn close_update_instruction(
    receiver_program_id: &Pubkey,
    payer: &Pubkey,
    buffer: &Pubkey,
    price_update: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *receiver_program_id,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*buffer, false),
            AccountMeta::new(*price_update, false),
        ],
        data: ArgWriter::new(instruction_discriminator("close_update")).finish(),
    }
}

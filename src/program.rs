//! Instruction interface of the listing program
//!
//! The on-chain program is consumed as a black box through two instructions:
//! `initialize` (create a listing) and `buy` (purchase against a listing).
//! Instruction data follows the Anchor convention: an 8-byte discriminator
//! `sha256("global:<name>")[..8]` followed by Borsh-encoded arguments.

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::derive::{derive_listing_address, derive_receipt_address, DeriveError, DerivedAddress};
use crate::oracle::FeedId;
use crate::tx_builder::{BusinessInstructionBuilder, ResolvedAttestations};

/// Compute the Anchor instruction discriminator for `name`
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Minimal Borsh writer for the argument types these instructions use
#[derive(Debug, Default)]
pub(crate) struct ArgWriter {
    buf: Vec<u8>,
}

impl ArgWriter {
    pub(crate) fn new(discriminator: [u8; 8]) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&discriminator);
        Self { buf }
    }

    pub(crate) fn string(mut self, value: &str) -> Self {
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub(crate) fn bytes(mut self, value: &[u8]) -> Self {
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub(crate) fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn fixed(mut self, value: &[u8]) -> Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub(crate) fn pubkey(self, value: &Pubkey) -> Self {
        self.fixed(value.as_ref())
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Accounts and data for a `createListing` call
#[derive(Debug, Clone)]
pub struct CreateListingInstruction {
    pub listing: DerivedAddress,
    pub instruction: Instruction,
}

/// Build the program's `initialize` instruction.
///
/// The creator is also the payout destination.
pub fn create_listing_instruction(
    program_id: &Pubkey,
    creator: &Pubkey,
    product_name: &str,
    image_ref: &str,
    price_minor_units: u64,
) -> Result<CreateListingInstruction, DeriveError> {
    let listing = derive_listing_address(program_id, creator, product_name)?;

    let data = ArgWriter::new(instruction_discriminator("initialize"))
        .string(product_name)
        .string(image_ref)
        .u64(price_minor_units)
        .finish();

    let instruction = Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*creator, true),
            AccountMeta::new(*creator, false),
            AccountMeta::new(listing.address, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data,
    };

    Ok(CreateListingInstruction {
        listing,
        instruction,
    })
}

/// Every address a purchase instruction references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseAccounts {
    pub buyer: Pubkey,
    pub seller: Pubkey,
    pub listing: DerivedAddress,
    pub receipt: DerivedAddress,
    pub disambiguator: Pubkey,
}

impl PurchaseAccounts {
    /// Derive listing and receipt addresses for one purchase attempt
    pub fn derive(
        program_id: &Pubkey,
        buyer: &Pubkey,
        seller: &Pubkey,
        product_name: &str,
        disambiguator: &Pubkey,
    ) -> Result<Self, DeriveError> {
        let listing = derive_listing_address(program_id, seller, product_name)?;
        let receipt =
            derive_receipt_address(program_id, buyer, &listing.address, disambiguator)?;
        Ok(Self {
            buyer: *buyer,
            seller: *seller,
            listing,
            receipt,
            disambiguator: *disambiguator,
        })
    }
}

/// Build the program's `buy` instruction against a posted price attestation
pub fn purchase_instruction(
    program_id: &Pubkey,
    accounts: &PurchaseAccounts,
    product_name: &str,
    price_update: &Pubkey,
) -> Instruction {
    let data = ArgWriter::new(instruction_discriminator("buy"))
        .pubkey(&accounts.seller)
        .string(product_name)
        .pubkey(&accounts.disambiguator)
        .finish();

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.buyer, true),
            AccountMeta::new(accounts.seller, false),
            AccountMeta::new(accounts.listing.address, false),
            AccountMeta::new(accounts.receipt.address, false),
            AccountMeta::new_readonly(*price_update, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data,
    }
}

/// Business instructions of a purchase: one `buy` reading the price
/// attestation posted for `price_feed`
#[derive(Debug, Clone)]
pub struct PurchaseInstructionBuilder<'a> {
    pub program_id: Pubkey,
    pub accounts: &'a PurchaseAccounts,
    pub product_name: &'a str,
    pub price_feed: FeedId,
}

impl BusinessInstructionBuilder for PurchaseInstructionBuilder<'_> {
    fn build(&self, resolved: &ResolvedAttestations) -> anyhow::Result<Vec<Instruction>> {
        let price_update = resolved.get(&self.price_feed).ok_or_else(|| {
            anyhow::anyhow!("no price attestation planned for feed {}", self.price_feed)
        })?;
        Ok(vec![purchase_instruction(
            &self.program_id,
            self.accounts,
            self.product_name,
            &price_update,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_is_stable() {
        let d = instruction_discriminator("buy");
        let digest = Sha256::digest(b"global:buy");
        assert_eq!(&d[..], &digest[..8]);
        assert_ne!(d, instruction_discriminator("initialize"));
    }

    #[test]
    fn test_create_listing_layout() {
        let program_id = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let built =
            create_listing_instruction(&program_id, &creator, "Super Sword", "img", 100).unwrap();

        let ix = &built.instruction;
        assert_eq!(ix.accounts.len(), 4);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, creator);
        assert_eq!(ix.accounts[2].pubkey, built.listing.address);
        assert_eq!(ix.accounts[3].pubkey, system_program::id());

        // discriminator | len("Super Sword") | "Super Sword" | len("img") | "img" | 100u64
        let mut expected = instruction_discriminator("initialize").to_vec();
        expected.extend_from_slice(&11u32.to_le_bytes());
        expected.extend_from_slice(b"Super Sword");
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(b"img");
        expected.extend_from_slice(&100u64.to_le_bytes());
        assert_eq!(ix.data, expected);
    }

    #[test]
    fn test_purchase_references_price_update_read_only() {
        let program_id = Pubkey::new_unique();
        let accounts = PurchaseAccounts::derive(
            &program_id,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            "Super Sword",
            &Pubkey::new_unique(),
        )
        .unwrap();
        let price_update = Pubkey::new_unique();

        let ix = purchase_instruction(&program_id, &accounts, "Super Sword", &price_update);
        assert_eq!(ix.accounts.len(), 6);
        assert_eq!(ix.accounts[4].pubkey, price_update);
        assert!(!ix.accounts[4].is_writable);
        assert_eq!(ix.accounts[3].pubkey, accounts.receipt.address);
        assert_eq!(&ix.data[..8], &instruction_discriminator("buy"));
        assert_eq!(&ix.data[8..40], accounts.seller.as_ref());
    }

    #[test]
    fn test_builder_requires_planned_feed() {
        let program_id = Pubkey::new_unique();
        let accounts = PurchaseAccounts::derive(
            &program_id,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            "Super Sword",
            &Pubkey::new_unique(),
        )
        .unwrap();
        let builder = PurchaseInstructionBuilder {
            program_id,
            accounts: &accounts,
            product_name: "Super Sword",
            price_feed: FeedId::new([7; 32]),
        };
        let err = builder.build(&ResolvedAttestations::default()).unwrap_err();
        assert!(err.to_string().contains("no price attestation"));
    }

    #[test]
    fn test_purchase_accounts_reject_long_name() {
        let name = "x".repeat(33);
        let result = PurchaseAccounts::derive(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &name,
            &Pubkey::new_unique(),
        );
        assert!(matches!(result, Err(DeriveError::SeedTooLong { .. })));
    }
}

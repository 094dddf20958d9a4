//! Envelope packing
//!
//! An envelope is one ledger transaction. Its limits are the serialized size
//! of a fully signed v0 transaction (`PACKET_DATA_SIZE`) and the number of
//! accounts a single transaction may lock. Sizes are measured on the real
//! wire encoding with placeholder signatures, so the numbers here match what
//! the RPC node will see.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

use std::collections::HashSet;

use super::errors::AssemblerError;
use super::instructions::InstructionGroup;

/// Accounts a single transaction may reference
pub const MAX_ACCOUNT_LOCKS: usize = 64;

/// Measured size of a candidate envelope
///
/// Past [`MAX_ACCOUNT_LOCKS`] the message is not compiled (account indices
/// are a single byte) and `bytes` counts the account keys alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeSize {
    pub bytes: usize,
    pub accounts: usize,
}

impl EnvelopeSize {
    pub fn fits(&self) -> bool {
        self.bytes <= PACKET_DATA_SIZE && self.accounts <= MAX_ACCOUNT_LOCKS
    }
}

/// One transaction's worth of ordered instructions, not yet bound to a
/// blockhash
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Position in submission order, starting at 0
    pub index: usize,
    /// Number of envelopes in the attempt
    pub total: usize,
    instructions: Vec<Instruction>,
}

impl Envelope {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// True for the envelope carrying the final, price-consuming group
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    /// Compile into an unsigned transaction.
    ///
    /// Signature slots are filled with placeholders; the signer replaces
    /// them. Compilation happens as late as possible so the blockhash is
    /// fresh when the envelope is broadcast.
    pub fn compile(
        &self,
        payer: &Pubkey,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, AssemblerError> {
        compile_unsigned(payer, &self.instructions, recent_blockhash)
    }
}

fn compile_unsigned(
    payer: &Pubkey,
    instructions: &[Instruction],
    recent_blockhash: Hash,
) -> Result<VersionedTransaction, AssemblerError> {
    let message = v0::Message::try_compile(payer, instructions, &[], recent_blockhash)
        .map_err(|e| AssemblerError::Compile(e.to_string()))?;
    let num_signatures = message.header.num_required_signatures as usize;

    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); num_signatures],
        message: VersionedMessage::V0(message),
    })
}

fn distinct_accounts(payer: &Pubkey, instructions: &[Instruction]) -> usize {
    let mut keys: HashSet<&Pubkey> = HashSet::from([payer]);
    for ix in instructions {
        keys.insert(&ix.program_id);
        keys.extend(ix.accounts.iter().map(|meta| &meta.pubkey));
    }
    keys.len()
}

/// Measure the signed wire size and account count of `instructions`
pub fn measure(payer: &Pubkey, instructions: &[Instruction]) -> Result<EnvelopeSize, AssemblerError> {
    let accounts = distinct_accounts(payer, instructions);
    if accounts > MAX_ACCOUNT_LOCKS {
        return Ok(EnvelopeSize {
            bytes: accounts * std::mem::size_of::<Pubkey>(),
            accounts,
        });
    }

    let tx = compile_unsigned(payer, instructions, Hash::default())?;
    let bytes = bincode::serialize(&tx)
        .map_err(|e| AssemblerError::Compile(format!("serialization failed: {}", e)))?
        .len();
    Ok(EnvelopeSize {
        bytes,
        accounts: tx.message.static_account_keys().len(),
    })
}

fn too_large(group: &InstructionGroup, size: EnvelopeSize) -> AssemblerError {
    if size.accounts > MAX_ACCOUNT_LOCKS {
        AssemblerError::PayloadTooLarge {
            what: group.label.clone(),
            size: size.accounts,
            limit: MAX_ACCOUNT_LOCKS,
            unit: "accounts",
        }
    } else {
        AssemblerError::PayloadTooLarge {
            what: group.label.clone(),
            size: size.bytes,
            limit: PACKET_DATA_SIZE,
            unit: "bytes",
        }
    }
}

/// Greedily pack ordered groups into as few envelopes as possible.
///
/// Groups are never reordered or split. Every envelope starts with `prefix`.
/// A group that does not fit next to the prefix alone fails the whole
/// assembly.
pub fn partition(
    payer: &Pubkey,
    prefix: &[Instruction],
    groups: Vec<InstructionGroup>,
) -> Result<Vec<Envelope>, AssemblerError> {
    let mut packed: Vec<Vec<Instruction>> = Vec::new();
    let mut current: Vec<Instruction> = prefix.to_vec();
    let mut current_has_groups = false;

    for group in groups {
        let mut candidate = current.clone();
        candidate.extend(group.instructions.iter().cloned());
        let size = measure(payer, &candidate)?;
        if size.fits() {
            current = candidate;
            current_has_groups = true;
            continue;
        }

        if !current_has_groups {
            return Err(too_large(&group, size));
        }

        packed.push(std::mem::replace(&mut current, prefix.to_vec()));
        current.extend(group.instructions.iter().cloned());
        let size = measure(payer, &current)?;
        if !size.fits() {
            return Err(too_large(&group, size));
        }
    }

    if current_has_groups {
        packed.push(current);
    }

    let total = packed.len();
    Ok(packed
        .into_iter()
        .enumerate()
        .map(|(index, instructions)| Envelope {
            index,
            total,
            instructions,
        })
        .collect())
}

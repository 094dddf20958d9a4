//! Uniform accessors over `VersionedMessage` / `VersionedTransaction`
//!
//! Envelopes are compiled as v0 messages, but signers and the ledger seam
//! accept any `VersionedTransaction`. These helpers read headers, signer
//! lists and signature slots the same way for both message versions.

use solana_sdk::{
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

/// Message header for Legacy and V0 messages alike
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Account keys embedded in the message, excluding lookup-table addresses
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Accounts that must sign, always the first `num_required_signatures` keys
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let account_keys = get_static_account_keys(message);
    let num_signers = get_message_header(message).num_required_signatures as usize;
    &account_keys[..num_signers.min(account_keys.len())]
}

/// The transaction's identifying signature, once the fee payer has signed.
///
/// Placeholder (all-zero) signatures count as unsigned.
pub fn fee_payer_signature(tx: &VersionedTransaction) -> Option<Signature> {
    tx.signatures
        .first()
        .copied()
        .filter(|sig| *sig != Signature::default())
}

/// True when every required signature slot holds a real signature
pub fn is_fully_signed(tx: &VersionedTransaction) -> bool {
    let required = get_message_header(&tx.message).num_required_signatures as usize;
    tx.signatures.len() == required && tx.signatures.iter().all(|s| *s != Signature::default())
}

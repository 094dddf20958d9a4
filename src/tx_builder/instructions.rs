//! Instruction grouping and ordering validation
//!
//! Every envelope is laid out as:
//! 1. Compute budget instructions (CU limit, unit price)
//! 2. Attestation staging (`write_update`), possibly spilling into earlier
//!    envelopes
//! 3. The atomic group: every `post_update`, then the business
//!    instructions, then every `close_update`
//!
//! The atomic group is never split across envelopes, so an attestation is
//! posted, consumed and closed inside one all-or-nothing unit.

use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

use super::errors::AssemblerError;
use super::receiver::AttestationPlan;

/// Instructions that must land in the same envelope, in order
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionGroup {
    /// Short description for size errors and logs
    pub label: String,
    pub instructions: Vec<Instruction>,
}

impl InstructionGroup {
    pub fn new(label: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            label: label.into(),
            instructions,
        }
    }
}

/// Compute budget prefix placed at the start of every envelope
///
/// * `cu_limit` - Compute unit limit (0 = skip this instruction)
/// * `cu_price` - Unit price in micro-lamports (0 = skip this instruction)
pub fn compute_budget_instructions(cu_limit: u32, cu_price: u64) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if cu_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    }
    if cu_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(cu_price));
    }
    instructions
}

/// Split a plan plus business instructions into packing groups.
///
/// Each staging instruction is its own group so large payloads can spread
/// over several envelopes; the last group is the atomic one.
pub fn order_groups(plan: &AttestationPlan, business: Vec<Instruction>) -> Vec<InstructionGroup> {
    let mut groups: Vec<InstructionGroup> = plan
        .feeds
        .iter()
        .flat_map(|feed| {
            feed.staging.iter().enumerate().map(move |(i, ix)| {
                InstructionGroup::new(
                    format!("write_update {} chunk {}", feed.feed_id, i),
                    vec![ix.clone()],
                )
            })
        })
        .collect();

    let mut atomic =
        Vec::with_capacity(plan.feeds.len() * 2 + business.len());
    atomic.extend(plan.feeds.iter().map(|f| f.post.clone()));
    atomic.extend(business);
    atomic.extend(plan.feeds.iter().map(|f| f.close.clone()));
    groups.push(InstructionGroup::new("post/business/close group", atomic));

    groups
}

#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn is_compute_budget(ix: &Instruction) -> bool {
    ix.program_id == solana_sdk::compute_budget::id()
}

/// Validate instruction ordering within one envelope (debug/test only)
///
/// Checks that:
/// - Compute budget instructions only appear as a prefix
/// - A feed's staging writes never follow its `post_update`
/// - If anything touches a feed's price account, the envelope carries both
///   its `post_update` and `close_update`, with every reader in between
///
/// Staging instructions of a feed may live in an earlier envelope.
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    plan: &AttestationPlan,
) -> Result<(), AssemblerError> {
    if instructions.is_empty() {
        return Err(AssemblerError::invalid_order("Instruction list is empty"));
    }

    let budget_prefix = instructions
        .iter()
        .take_while(|ix| is_compute_budget(ix))
        .count();
    if let Some(idx) = instructions[budget_prefix..]
        .iter()
        .position(is_compute_budget)
    {
        return Err(AssemblerError::invalid_order(format!(
            "Compute budget instruction at position {} after program instructions",
            budget_prefix + idx
        )));
    }

    for feed in &plan.feeds {
        let post_idx = instructions.iter().position(|ix| *ix == feed.post);
        let close_idx = instructions.iter().position(|ix| *ix == feed.close);
        let price = feed.price_update.address;

        let readers: Vec<usize> = instructions
            .iter()
            .enumerate()
            .filter(|(_, ix)| **ix != feed.post && **ix != feed.close)
            .filter(|(_, ix)| ix.accounts.iter().any(|m| m.pubkey == price))
            .map(|(i, _)| i)
            .collect();

        if let Some(post) = post_idx {
            if let Some(late) = instructions[post..]
                .iter()
                .position(|ix| feed.staging.contains(ix))
            {
                return Err(AssemblerError::invalid_order(format!(
                    "write_update for feed {} at position {} follows its post_update",
                    feed.feed_id,
                    post + late
                )));
            }
        }

        match (post_idx, close_idx) {
            (None, None) if readers.is_empty() => {}
            (Some(post), Some(close)) => {
                if close < post {
                    return Err(AssemblerError::invalid_order(format!(
                        "close_update for feed {} precedes its post_update",
                        feed.feed_id
                    )));
                }
                if let Some(bad) = readers.iter().find(|&&i| i < post || i > close) {
                    return Err(AssemblerError::invalid_order(format!(
                        "Instruction at position {} reads price account {} outside its post/close window",
                        bad, price
                    )));
                }
            }
            _ => {
                return Err(AssemblerError::invalid_order(format!(
                    "Envelope touches price account {} for feed {} without both post_update and close_update",
                    price, feed.feed_id
                )));
            }
        }
    }

    Ok(())
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _plan: &AttestationPlan,
) -> Result<(), AssemblerError> {
    Ok(())
}

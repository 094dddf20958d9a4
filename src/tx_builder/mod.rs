//! Transaction assembler
//!
//! Turns price attestations plus caller-supplied business instructions into
//! an ordered list of size-bounded envelopes. Assembly happens in two phases:
//!
//! 1. [`TransactionAssembler::plan_attestations`] builds the receiver
//!    instructions and reports where each attestation will land
//! 2. [`TransactionAssembler::assemble`] hands those addresses to a
//!    [`BusinessInstructionBuilder`], then orders and packs everything
//!
//! ## Layout guarantees
//!
//! - Every envelope starts with the compute budget instructions
//! - `post_update` → business instructions → `close_update` always share one
//!   envelope (the atomic group)
//! - Staging writes may be spread over earlier envelopes when the payload is
//!   large
//!
//! Envelopes before the last are not atomic with it. If a later envelope
//! fails, staged buffers stay behind until closed by hand; no compensating
//! transaction is issued.
//!
//! Assembly is pure: no I/O, no signing, no blockhash.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::debug;

pub mod envelope;
pub mod errors;
pub mod instructions;
pub mod receiver;

pub use envelope::{Envelope, EnvelopeSize, MAX_ACCOUNT_LOCKS};
pub use errors::AssemblerError;
pub use instructions::{compute_budget_instructions, sanity_check_ix_order, InstructionGroup};
pub use receiver::{AttestationPlan, FeedPlan, ResolvedAttestations};

use crate::config::AssemblerConfig;
use crate::oracle::PriceAttestation;

/// Produces the business instructions of one attempt, given the resolved
/// addresses of the attestations posted ahead of them
///
/// Errors are surfaced by the assembler unchanged as
/// [`AssemblerError::Business`].
pub trait BusinessInstructionBuilder: Send + Sync {
    fn build(&self, resolved: &ResolvedAttestations) -> anyhow::Result<Vec<Instruction>>;
}

impl<F> BusinessInstructionBuilder for F
where
    F: Fn(&ResolvedAttestations) -> anyhow::Result<Vec<Instruction>> + Send + Sync,
{
    fn build(&self, resolved: &ResolvedAttestations) -> anyhow::Result<Vec<Instruction>> {
        self(resolved)
    }
}

/// Stateless envelope assembler
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    config: AssemblerConfig,
    receiver_program_id: Pubkey,
}

impl TransactionAssembler {
    pub fn new(config: AssemblerConfig, receiver_program_id: Pubkey) -> Self {
        Self {
            config,
            receiver_program_id,
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn receiver_program_id(&self) -> &Pubkey {
        &self.receiver_program_id
    }

    fn prefix(&self) -> Vec<Instruction> {
        compute_budget_instructions(
            self.config.compute_unit_limit,
            self.config.compute_unit_price_micro_lamports,
        )
    }

    /// First phase: receiver instructions and resolved addresses
    pub fn plan_attestations(
        &self,
        payer: &Pubkey,
        attestations: &[PriceAttestation],
    ) -> Result<AttestationPlan, AssemblerError> {
        receiver::plan_attestations(
            &self.receiver_program_id,
            payer,
            attestations,
            self.config.write_chunk_size,
        )
        .map_err(|e| AssemblerError::Configuration(format!("attestation address: {}", e)))
    }

    /// Second phase: build business instructions and pack everything
    pub fn assemble(
        &self,
        payer: &Pubkey,
        plan: &AttestationPlan,
        builder: &dyn BusinessInstructionBuilder,
    ) -> Result<Vec<Envelope>, AssemblerError> {
        let business = builder
            .build(&plan.resolved())
            .map_err(AssemblerError::Business)?;
        if business.is_empty() {
            return Err(AssemblerError::Configuration(
                "business instruction builder returned no instructions".to_string(),
            ));
        }

        let groups = instructions::order_groups(plan, business);
        let envelopes = envelope::partition(payer, &self.prefix(), groups)?;

        for env in &envelopes {
            sanity_check_ix_order(env.instructions(), plan)?;
        }

        debug!(
            feeds = plan.feeds.len(),
            envelopes = envelopes.len(),
            "Assembled purchase envelopes"
        );
        Ok(envelopes)
    }

    /// Pack instructions that need no attestation as one atomic group
    pub fn assemble_plain(
        &self,
        payer: &Pubkey,
        instructions: Vec<Instruction>,
    ) -> Result<Vec<Envelope>, AssemblerError> {
        if instructions.is_empty() {
            return Err(AssemblerError::Configuration(
                "no instructions to assemble".to_string(),
            ));
        }
        let groups = vec![InstructionGroup::new("instructions", instructions)];
        envelope::partition(payer, &self.prefix(), groups)
    }
}

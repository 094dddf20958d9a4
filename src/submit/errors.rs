//! Error types for signing, broadcast and confirmation

use solana_sdk::{
    instruction::{Instruction, InstructionError},
    signature::Signature,
    system_program,
    transaction::TransactionError,
};
use std::time::Duration;
use thiserror::Error;

use super::ledger::LedgerError;
use super::signer::SignerError;
use crate::tx_builder::AssemblerError;

/// System program `AccountAlreadyInUse`, surfaced as `Custom(0)` on the
/// outer instruction that invoked it
const SYSTEM_ACCOUNT_ALREADY_IN_USE: u32 = 0;

#[derive(Error, Debug)]
pub enum SubmitError {
    /// The signer declined; nothing was broadcast
    #[error("Signer rejected the transaction: {0}")]
    SignerRejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// Preflight simulation predicted failure; nothing landed
    #[error("Simulation failed: {message}")]
    SimulationFailed { message: String, logs: Vec<String> },

    /// An account the transaction creates already exists
    #[error("Account already exists: {message}")]
    AccountAlreadyExists { message: String },

    /// The transaction could not be handed to the ledger
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    /// The transaction landed and the ledger rejected it
    #[error("Transaction {signature} failed on-chain: {message}")]
    TransactionFailed { signature: Signature, message: String },

    /// Polling gave up; the transaction may still land
    #[error("Confirmation of {signature} timed out after {waited:?}; outcome unknown")]
    ConfirmationTimeout {
        signature: Signature,
        waited: Duration,
    },

    #[error(transparent)]
    Assembly(#[from] AssemblerError),
}

impl SubmitError {
    /// Check if resubmitting the same signed transaction might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BroadcastFailed(_))
    }

    /// Error category for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::SignerRejected(_) => "signer_rejected",
            Self::Signing(_) => "signing",
            Self::SimulationFailed { .. } => "simulation_failed",
            Self::AccountAlreadyExists { .. } => "account_already_exists",
            Self::BroadcastFailed(_) => "broadcast_failed",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::Assembly(e) => e.category(),
        }
    }

    /// Signature of the transaction involved, when one exists
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::TransactionFailed { signature, .. }
            | Self::ConfirmationTimeout { signature, .. } => Some(*signature),
            _ => None,
        }
    }

    /// Classify a failed `send_transaction` call
    pub fn from_send_error(err: LedgerError) -> Self {
        if err.is_account_in_use() {
            return Self::AccountAlreadyExists {
                message: err.to_string(),
            };
        }
        match err {
            LedgerError::Preflight { message, logs } => Self::SimulationFailed { message, logs },
            other => Self::BroadcastFailed(other.to_string()),
        }
    }

    /// Classify a transaction that landed with an error.
    ///
    /// `instructions` are the ones the transaction was compiled from, in
    /// order, so the failing index can be resolved. A system-program
    /// "already in use" error counts as a collision only when the failing
    /// instruction is the system program or passes it on for a CPI.
    pub fn from_landed_error(
        signature: Signature,
        err: TransactionError,
        instructions: &[Instruction],
    ) -> Self {
        if let TransactionError::InstructionError(index, ref ix_err) = err {
            let creates_accounts = instructions
                .get(index as usize)
                .is_some_and(invokes_system_program);
            if creates_accounts && is_account_in_use(ix_err) {
                return Self::AccountAlreadyExists {
                    message: format!("{} (transaction {})", err, signature),
                };
            }
        }
        Self::TransactionFailed {
            signature,
            message: err.to_string(),
        }
    }
}

fn invokes_system_program(ix: &Instruction) -> bool {
    ix.program_id == system_program::id()
        || ix.accounts.iter().any(|meta| meta.pubkey == system_program::id())
}

fn is_account_in_use(err: &InstructionError) -> bool {
    matches!(
        err,
        InstructionError::Custom(SYSTEM_ACCOUNT_ALREADY_IN_USE)
            | InstructionError::AccountAlreadyInitialized
    )
}

impl From<SignerError> for SubmitError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Rejected(msg) => Self::SignerRejected(msg),
            SignerError::Signing(msg) => Self::Signing(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_classification() {
        let in_use = LedgerError::Preflight {
            message: "custom program error: 0x0".into(),
            logs: vec!["Allocate: account already in use".into()],
        };
        assert!(matches!(
            SubmitError::from_send_error(in_use),
            SubmitError::AccountAlreadyExists { .. }
        ));

        let sim = LedgerError::Preflight {
            message: "insufficient lamports".into(),
            logs: vec![],
        };
        assert!(matches!(
            SubmitError::from_send_error(sim),
            SubmitError::SimulationFailed { .. }
        ));

        let net = LedgerError::Transport {
            endpoint: "http://x".into(),
            message: "connection reset".into(),
        };
        let err = SubmitError::from_send_error(net);
        assert!(matches!(err, SubmitError::BroadcastFailed(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_carries_signature() {
        let signature = Signature::new_unique();
        let err = SubmitError::ConfirmationTimeout {
            signature,
            waited: Duration::from_secs(60),
        };
        assert_eq!(err.signature(), Some(signature));
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "confirmation_timeout");
    }

    fn buy_like_instructions() -> Vec<Instruction> {
        use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::AccountMeta, pubkey::Pubkey};
        vec![
            ComputeBudgetInstruction::set_compute_unit_price(50_000),
            Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[7; 8],
                vec![
                    AccountMeta::new(Pubkey::new_unique(), true),
                    AccountMeta::new(Pubkey::new_unique(), false),
                    AccountMeta::new_readonly(system_program::id(), false),
                ],
            ),
            Instruction::new_with_bytes(Pubkey::new_unique(), &[9; 8], vec![]),
        ]
    }

    #[test]
    fn test_landed_receipt_collision_is_account_already_exists() {
        let instructions = buy_like_instructions();
        let signature = Signature::new_unique();
        let err = TransactionError::InstructionError(1, InstructionError::Custom(0));
        assert!(!err.to_string().contains("already in use"));

        let classified = SubmitError::from_landed_error(signature, err, &instructions);
        assert!(matches!(classified, SubmitError::AccountAlreadyExists { .. }));
        assert_eq!(classified.category(), "account_already_exists");
    }

    #[test]
    fn test_custom_zero_without_system_program_is_transaction_failed() {
        let instructions = buy_like_instructions();
        let signature = Signature::new_unique();

        let err = TransactionError::InstructionError(2, InstructionError::Custom(0));
        let classified = SubmitError::from_landed_error(signature, err, &instructions);
        assert!(matches!(classified, SubmitError::TransactionFailed { .. }));
        assert_eq!(classified.signature(), Some(signature));

        // Index past the compiled instructions
        let err = TransactionError::InstructionError(9, InstructionError::Custom(0));
        assert!(matches!(
            SubmitError::from_landed_error(signature, err, &instructions),
            SubmitError::TransactionFailed { .. }
        ));
    }

    #[test]
    fn test_program_error_on_creating_instruction_is_transaction_failed() {
        let err = TransactionError::InstructionError(1, InstructionError::Custom(6001));
        let classified =
            SubmitError::from_landed_error(Signature::new_unique(), err, &buy_like_instructions());
        match classified {
            SubmitError::TransactionFailed { message, .. } => assert!(message.contains("0x1771")),
            other => panic!("expected TransactionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_signer_error_conversion() {
        let err: SubmitError = SignerError::Rejected("user declined".into()).into();
        assert!(matches!(err, SubmitError::SignerRejected(_)));
    }
}

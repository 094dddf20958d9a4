//! Error types for transaction assembly
//!
//! Assembly is pure: no network I/O happens here, so none of these errors is
//! transient. A caller either fixes its input or gives up.

use thiserror::Error;

/// Error type for all assembler operations
#[derive(Error, Debug)]
pub enum AssemblerError {
    /// A group of instructions that must share an envelope does not fit into
    /// an empty one
    ///
    /// `size` is the serialized transaction size (or account count when
    /// `unit` is "accounts") of the smallest envelope that could carry it.
    #[error("Payload too large: {what} needs {size} {unit}, limit is {limit}")]
    PayloadTooLarge {
        what: String,
        size: usize,
        limit: usize,
        unit: &'static str,
    },

    /// The caller-supplied business instruction builder failed
    ///
    /// Propagated unchanged; this is a business-logic failure, not an
    /// assembler failure.
    #[error(transparent)]
    Business(anyhow::Error),

    /// Invalid instruction order or structure
    ///
    /// Every envelope must satisfy:
    /// 1. Compute budget instructions first
    /// 2. post_update before any instruction reading the price account
    /// 3. close_update after every such instruction
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Message compilation failed
    #[error("Message compile error: {0}")]
    Compile(String),

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AssemblerError {
    /// Error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Business(_) => "business",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Compile(_) => "compile",
            Self::Configuration(_) => "config",
        }
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

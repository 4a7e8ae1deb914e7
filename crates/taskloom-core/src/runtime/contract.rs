// crates/taskloom-core/src/runtime/contract.rs
// ============================================================================
// Module: Task Loom Contract Extraction
// Description: Boundary for reducing a stage's raw output to a structured
//              summary the engine and gates can reason about.
// Purpose: Keep the engine's condition/gate logic independent of how a given
//          stage kind's output happens to be shaped.
// Dependencies: crate::core::structured, thiserror
// ============================================================================

//! ## Overview
//! A `ContractExtractor` is consulted once per stage completion. Concrete
//! implementations live in `taskloom-contract`, one per stage kind (parse,
//! spec, code, test, review, smoke, doc, signoff, approve) plus a default
//! that degrades to a bare pass/fail summary when no kind-specific rule
//! matches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::StageKind;
use crate::core::StructuredOutput;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while extracting a structured output.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The raw output did not match the expected shape for its stage kind.
    #[error("malformed output for stage kind {kind:?}: {reason}")]
    Malformed {
        /// The stage kind extraction was attempted for.
        kind: StageKind,
        /// Human-readable reason the output did not parse.
        reason: String,
    },
}

// ============================================================================
// SECTION: ContractExtractor
// ============================================================================

/// Reduces a stage's raw output text to a [`StructuredOutput`].
pub trait ContractExtractor: Send + Sync {
    /// Extracts a structured output from `output_text` for the given stage
    /// kind. Implementations should prefer returning a low-confidence
    /// `Partial` result over failing outright, reserving `Err` for output
    /// that cannot be interpreted at all.
    fn extract(&self, kind: StageKind, output_text: &str) -> Result<StructuredOutput, ContractError>;
}

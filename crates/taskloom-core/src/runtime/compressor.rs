// crates/taskloom-core/src/runtime/compressor.rs
// ============================================================================
// Module: Task Loom Context Compressor
// Description: Sliding-window compression of prior stage output into context
//              for later stages.
// Purpose: Keep executor prompts bounded as a task accumulates stages.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every stage after the first receives compressed context drawn from the
//! stages that precede it, rather than their full raw output. Compression
//! has three levels, chosen by distance from the consuming stage:
//! - distance 0 (the immediately preceding stage): L2, full output.
//! - distance 1: L1, a short bullet brief prefixed `[摘要]`.
//! - distance 2 or more: L0, a one-line summary prefixed `[概要]`.
//!
//! A stage named in the consumer's `context_from` always receives L2
//! regardless of distance.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Compression Level
// ============================================================================

/// The level of detail retained for one prior stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// One-line summary.
    L0,
    /// Short bullet brief.
    L1,
    /// Full, uncompressed output.
    L2,
}

impl CompressionLevel {
    /// Chooses a level from a stage's distance (in stage count) from the
    /// consumer, and whether it was explicitly requested via
    /// `context_from`.
    #[must_use]
    pub const fn for_distance(distance: u32, explicitly_requested: bool) -> Self {
        if explicitly_requested {
            return Self::L2;
        }
        match distance {
            0 => Self::L2,
            1 => Self::L1,
            _ => Self::L0,
        }
    }
}

// ============================================================================
// SECTION: Compressor
// ============================================================================

/// Errors raised while compressing stage output.
#[derive(Debug, Error)]
pub enum CompressorError {
    /// The underlying summarization backend failed.
    #[error("summarization backend error: {0}")]
    Backend(String),
}

/// The compressed context assembled for one stage's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    /// The rendered context text, ready to splice into an instruction.
    pub text: String,
    /// Whether any stage fell back to raw truncation instead of a proper
    /// L0/L1 summary (e.g. the summarization backend was disabled or
    /// errored).
    pub used_fallback: bool,
}

/// Produces compressed context for a downstream stage from its predecessors.
///
/// Implementations may call out to an LLM for L0/L1 summarization; a
/// non-LLM fallback (truncation) must still be available so context
/// assembly never blocks on that backend being unavailable.
pub trait Compressor: Send + Sync {
    /// Compresses one prior stage's raw output to the requested level.
    fn compress(&self, stage_name: &str, output_text: &str, level: CompressionLevel) -> Result<String, CompressorError>;
}

/// A dependency-free fallback compressor: L0 takes the first line up to a
/// character budget, L1 takes the first chunk of the text up to a larger
/// character budget, L2 passes output through unchanged. Used when no
/// LLM-backed compressor is configured, or when one errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackCompressor;

const L0_CHAR_BUDGET: usize = 200;
const L1_CHAR_BUDGET: usize = 1500;

impl Compressor for FallbackCompressor {
    fn compress(&self, _stage_name: &str, output_text: &str, level: CompressionLevel) -> Result<String, CompressorError> {
        Ok(match level {
            CompressionLevel::L0 => truncate_chars(output_text.lines().next().unwrap_or(""), L0_CHAR_BUDGET),
            CompressionLevel::L1 => truncate_chars(output_text, L1_CHAR_BUDGET),
            CompressionLevel::L2 => output_text.to_string(),
        })
    }
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}...")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

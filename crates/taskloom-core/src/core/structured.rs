// crates/taskloom-core/src/core/structured.rs
// ============================================================================
// Module: Task Loom Structured Output
// Description: Typed summary extracted from a stage's free-text output.
// Purpose: Give the engine, gates, and conditions a stable shape to inspect.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A `ContractExtractor` reduces a stage's raw `output_text` into a
//! `StructuredOutput`: a common envelope (summary, status, confidence,
//! artifacts) plus kind-specific fields carried as an open JSON map so new
//! stage kinds do not require a schema migration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Stage Kind
// ============================================================================

/// The kind of stage a `StructuredOutput` was extracted from, used to select
/// extraction rules and downstream condition fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Parse,
    Spec,
    Code,
    Test,
    Review,
    Smoke,
    Doc,
    Signoff,
    Approve,
}

// ============================================================================
// SECTION: Output Status
// ============================================================================

/// Coarse pass/fail signal carried by every structured output, independent
/// of kind-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Pass,
    Fail,
    Partial,
}

// ============================================================================
// SECTION: Artifact Reference
// ============================================================================

/// A reference to a file or resource produced by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path or URI of the artifact.
    pub path: String,
    /// Free-text description of the artifact's role.
    pub description: Option<String>,
}

// ============================================================================
// SECTION: Structured Output
// ============================================================================

/// A stage's extracted, typed summary.
///
/// # Invariants
/// - `confidence` is within `[0.0, 1.0]` when present.
/// - `fields` carries kind-specific data keyed by field name; consumers
///   should treat unknown keys as absent rather than erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// The stage kind this output was extracted from.
    pub kind: StageKind,
    /// One or two sentence summary.
    pub summary: String,
    /// Coarse pass/fail/partial status.
    pub status: OutputStatus,
    /// Confidence in `[0.0, 1.0]`, if the extractor or agent reported one.
    pub confidence: Option<f64>,
    /// Artifacts produced by the stage.
    pub artifacts: Vec<ArtifactRef>,
    /// Kind-specific fields, e.g. `"tests_passed"`, `"files_changed"`.
    pub fields: BTreeMap<String, Value>,
}

impl StructuredOutput {
    /// Looks up a field path within `fields`, returning `None` when the path
    /// does not resolve to a leaf value. Supports `.`-separated nested
    /// object traversal for condition evaluation.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

// crates/taskloom-core/src/core/stage.rs
// ============================================================================
// Module: Task Loom Stage
// Description: The stage entity: per-execution status, output, and failure detail.
// Purpose: Track one unit of delegated agent work within a task.
// Dependencies: crate::core::{ids, time, structured}, serde
// ============================================================================

//! ## Overview
//! A stage is the engine's unit of delegation to an `Executor`. Stages are
//! created from a `Template`'s `StageDef` list when a task starts, and are
//! re-created (new row, incremented `execution_count`) on retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::StageId;
use crate::core::ids::TaskId;
use crate::core::structured::StructuredOutput;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Stage Status
// ============================================================================

/// Stage lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting on dependencies or scheduling.
    Pending,
    /// Currently delegated to an executor.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed; see `failure_category` for classification.
    Failed,
    /// Skipped due to an unmet condition.
    Skipped,
}

// ============================================================================
// SECTION: Failure Category
// ============================================================================

/// Classification of a stage failure, used to decide retry eligibility and
/// circuit breaker escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Likely to succeed on retry without changes (timeouts, rate limits).
    Transient,
    /// A tool invocation failed in a way attributable to the tool call itself.
    ToolError,
    /// Resource exhaustion (memory, disk, sandbox capacity).
    Resource,
    /// The agent's output failed semantic/contract validation.
    Semantic,
    /// A human gate rejected the stage's output.
    GateRejected,
    /// Uncategorized failure.
    Unknown,
}

// ============================================================================
// SECTION: Stage
// ============================================================================

/// One delegated unit of agent work belonging to a task.
///
/// # Invariants
/// - `execution_count` increases by one on each retry; `retry_count` mirrors
///   it for operator-facing display.
/// - `structured_output` is populated only after `status` becomes
///   `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Opaque stage identifier.
    pub id: StageId,
    /// Parent task.
    pub task_id: TaskId,
    /// Stage name, unique within a task (matches `StageDef::name`).
    pub name: String,
    /// Agent role delegated to (e.g. "implementer", "reviewer").
    pub agent_role: String,
    /// Current status.
    pub status: StageStatus,
    /// Raw free-text output from the executor, if any.
    pub output_text: Option<String>,
    /// Typed summary extracted from `output_text` by a `ContractExtractor`.
    pub structured_output: Option<StructuredOutput>,
    /// Human-readable error message, set when `status == Failed`.
    pub error_message: Option<String>,
    /// Failure classification, set when `status == Failed`.
    pub failure_category: Option<FailureCategory>,
    /// Confidence reported by the executor or extractor, in `[0.0, 1.0]`.
    pub confidence: Option<f64>,
    /// Number of retries attempted so far.
    pub retry_count: u32,
    /// Number of times this stage has been executed, including the first.
    pub execution_count: u32,
    /// Tokens consumed by this execution.
    pub tokens_used: u64,
    /// Agent turns consumed by this execution.
    pub turns_used: u32,
    /// When this stage started running.
    pub started_at: Option<Timestamp>,
    /// When this stage reached a terminal status.
    pub finished_at: Option<Timestamp>,
}

impl Stage {
    /// Returns the stage's wall-clock duration in seconds, if it has finished.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<i64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some(started.elapsed_seconds(finished))
    }

    /// Returns true when the stage may still be retried under `max_retries`.
    #[must_use]
    pub const fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }
}

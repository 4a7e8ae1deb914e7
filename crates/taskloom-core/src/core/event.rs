// crates/taskloom-core/src/core/event.rs
// ============================================================================
// Module: Task Loom Event Log
// Description: Append-only audit record of every tool call and system action.
// Purpose: Provide a per-task, sequence-ordered trace for observability and replay.
// Dependencies: crate::core::{ids, time}, serde
// ============================================================================

//! ## Overview
//! Every tool invocation, executor call, and system-originated action within
//! a task is appended to the event log with a monotonic per-task sequence
//! number assigned by the `Store`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::CorrelationId;
use crate::core::ids::EventLogId;
use crate::core::ids::TaskId;
use crate::core::time::Timestamp;

/// Output payloads longer than this are truncated before being persisted,
/// with `output_truncated` set on the record.
pub const OUTPUT_TRUNCATION_BYTES: usize = 50 * 1024;

// ============================================================================
// SECTION: Event Source / Status
// ============================================================================

/// Origin of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Emitted by the engine itself.
    System,
    /// Emitted by an LLM turn.
    Llm,
    /// Emitted by a tool invocation.
    Tool,
}

/// Execution status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Still in flight.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

// ============================================================================
// SECTION: Event Log Entry
// ============================================================================

/// One append-only row in a task's event log.
///
/// # Invariants
/// - `sequence` is assigned by the `Store` at append time and is strictly
///   increasing per `task_id`.
/// - `output_text` is truncated to [`OUTPUT_TRUNCATION_BYTES`] with
///   `output_truncated` set when truncation occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Opaque row identifier.
    pub id: EventLogId,
    /// Parent task.
    pub task_id: TaskId,
    /// Per-task monotonic sequence number.
    pub sequence: u64,
    /// Correlation id threading a sub-operation's related events together.
    pub correlation_id: CorrelationId,
    /// Event type, e.g. `"tool_call"`, `"stage_start"`, `"gate_resolved"`.
    pub event_type: String,
    /// Origin of the event.
    pub source: EventSource,
    /// Execution status.
    pub status: EventStatus,
    /// Request body, if applicable (e.g. tool call arguments).
    pub request_body: Option<String>,
    /// Response body, if applicable.
    pub response_body: Option<String>,
    /// Command name, for tool/system actions.
    pub command: Option<String>,
    /// Command arguments, for tool/system actions.
    pub args: Vec<String>,
    /// Workspace path the action executed in, if any.
    pub workspace: Option<String>,
    /// Execution mode, e.g. `"sandbox"`, `"in_process"`.
    pub execution_mode: Option<String>,
    /// Wall-clock duration of the action, in milliseconds.
    pub duration_ms: Option<u64>,
    /// Free-text result summary.
    pub result_text: Option<String>,
    /// Output text, possibly truncated.
    pub output_summary: Option<String>,
    /// Whether `output_summary` was truncated from a larger payload.
    pub output_truncated: bool,
    /// When the event was recorded.
    pub recorded_at: Timestamp,
}

/// Truncates `text` to [`OUTPUT_TRUNCATION_BYTES`], returning the possibly
/// shortened text and whether truncation occurred.
#[must_use]
pub fn truncate_output(text: &str) -> (String, bool) {
    if text.len() <= OUTPUT_TRUNCATION_BYTES {
        return (text.to_string(), false);
    }
    let mut end = OUTPUT_TRUNCATION_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

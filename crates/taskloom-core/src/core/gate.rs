// crates/taskloom-core/src/core/gate.rs
// ============================================================================
// Module: Task Loom Gate
// Description: Human-approval gate state and outcome sum-type.
// Purpose: Model a pending approval point and the possible human decisions.
// Dependencies: crate::core::{ids, template, time}, serde
// ============================================================================

//! ## Overview
//! A gate pauses the engine's graph/linear driver after a named stage until a
//! human approves, rejects, revises, or the gate times out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::GateId;
use crate::core::ids::TaskId;
use crate::core::template::GateKind;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Gate Status
// ============================================================================

/// Gate lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved; the driver may continue.
    Approved,
    /// Rejected; the driver retries the preceding stage if eligible.
    Rejected,
    /// Revised with replacement content; the driver re-runs with it.
    Revised,
}

// ============================================================================
// SECTION: Gate Outcome
// ============================================================================

/// The result of resolving a gate, as recorded by the engine.
///
/// # Invariants
/// - `Rejected` and `Revised` carry an optional human comment for audit.
/// - `Timeout`, `Cancelled`, and `ShutdownAborted` are engine-originated
///   outcomes, not human decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateOutcome {
    /// The human approved the stage's output as-is.
    Approved,
    /// The human rejected the output.
    Rejected {
        /// Optional human-authored comment.
        comment: Option<String>,
        /// Retry count observed at the time of rejection.
        retry_count: u32,
    },
    /// The human supplied replacement content to re-run with.
    Revised {
        /// Optional human-authored comment.
        comment: Option<String>,
        /// Raw replacement content, stored opaquely and substituted for the
        /// stage's prior output on the next scheduling round.
        content: String,
    },
    /// The gate's wait deadline elapsed with no human decision.
    Timeout,
    /// The task was cancelled while the gate was pending.
    Cancelled,
    /// The engine process was shutting down while the gate was pending.
    ShutdownAborted,
}

impl GateOutcome {
    /// Returns true when the outcome allows the driver to continue forward.
    #[must_use]
    pub const fn advances(&self) -> bool {
        matches!(self, Self::Approved | Self::Revised { .. })
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// A pending or resolved approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    /// Opaque gate identifier.
    pub id: GateId,
    /// Parent task.
    pub task_id: TaskId,
    /// Stage this gate follows.
    pub after_stage: String,
    /// Gate kind.
    pub kind: GateKind,
    /// Current status.
    pub status: GateStatus,
    /// Recorded outcome, set once the gate leaves `Pending`.
    pub outcome: Option<GateOutcome>,
    /// Number of reject-then-retry cycles observed so far.
    pub retry_count: u32,
    /// Maximum retries before the task fails outright.
    pub max_retries: u32,
    /// When the gate was created.
    pub created_at: Timestamp,
    /// Wall-clock deadline after which the gate times out.
    pub deadline: Timestamp,
    /// When the gate was resolved, if it has been.
    pub resolved_at: Option<Timestamp>,
}

impl Gate {
    /// Returns true when the gate's deadline has passed as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.deadline <= now
    }

    /// Returns true when another reject-then-retry cycle is still allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

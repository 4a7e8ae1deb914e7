// crates/taskloom-core/src/core/task.rs
// ============================================================================
// Module: Task Loom Task
// Description: The task entity: identity, status, cost accumulators, routing trail.
// Purpose: Capture the unit of work the engine claims and drives to completion.
// Dependencies: crate::core::{ids, time}, serde
// ============================================================================

//! ## Overview
//! A task is created by an external collaborator (outside this crate's scope)
//! in `pending` status and mutated only by the engine after a successful
//! claim: a task is in `running` only after a successful claim from
//! `pending`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::ids::ProjectId;
use crate::core::ids::TaskId;
use crate::core::ids::TemplateId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Task Status
// ============================================================================

/// Task lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - Transitions follow `pending -> claimed -> running|planning ->
///   {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Awaiting claim by an engine worker.
    Pending,
    /// Claimed by an engine worker, not yet transitioned to running.
    Claimed,
    /// Actively executing stages.
    Running,
    /// Paused for interactive plan review.
    Planning,
    /// Completed successfully.
    Completed,
    /// Failed terminally.
    Failed,
    /// Cancelled by an external actor.
    Cancelled,
}

impl TaskStatus {
    /// Returns true when the status is a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// SECTION: Routing Decisions
// ============================================================================

/// One recorded dynamic-routing decision.
///
/// # Invariants
/// - `stage_name` identifies the stage whose routing config produced this
///   decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Name of the stage that triggered routing.
    pub stage_name: String,
    /// Chosen target stage name.
    pub target: String,
    /// Free-text rationale captured from the routing model, if any.
    pub rationale: Option<String>,
    /// When the decision was recorded.
    pub decided_at: Timestamp,
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// A unit of work claimed and driven by the engine.
///
/// # Invariants
/// - `total_tokens` and `total_cost_cents` are monotonically non-decreasing
///   for the lifetime of a successful run.
/// - Mutations originate from the engine only after `status` has moved past
///   `Pending` via a successful conditional claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque task identifier.
    pub id: TaskId,
    /// Optional external correlation id supplied by the task's creator.
    pub external_correlation_id: Option<String>,
    /// Human-readable title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Cumulative tokens consumed across all stage executions.
    pub total_tokens: u64,
    /// Cumulative cost in fractional-cent integer units (avoids floats).
    pub total_cost_cents: u64,
    /// Template this task was instantiated from.
    pub template_id: TemplateId,
    /// Template version pinned at task creation.
    pub template_version: u32,
    /// Project this task belongs to.
    pub project_id: ProjectId,
    /// Current plan payload, opaque to the engine and interpreted only by
    /// the executor and plan-review gate.
    pub current_plan: Option<Value>,
    /// Ordered dynamic-routing audit trail.
    pub routing_decisions: Vec<RoutingDecision>,
    /// Branch name, populated once a worktree has been pushed.
    pub branch_name: Option<String>,
    /// Pull request URL, populated once one has been opened.
    pub pr_url: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Completion timestamp, set once status becomes terminal.
    pub completed_at: Option<Timestamp>,
    /// Terminal failure reason, set only when `status == Failed`.
    pub failure_reason: Option<String>,
}

impl Task {
    /// Credits tokens and cost to the running total.
    ///
    /// # Invariants
    /// Never decreases either accumulator.
    pub fn credit_usage(&mut self, tokens: u64, cost_cents: u64) {
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        self.total_cost_cents = self.total_cost_cents.saturating_add(cost_cents);
    }
}

// crates/taskloom-core/src/interfaces/mod.rs
// ============================================================================
// Module: Task Loom Interfaces
// Description: Trait boundaries between the engine and its backing systems.
// Purpose: Decouple the engine from storage, event delivery, execution, and
//          workspace lifecycle so each can be swapped or faked in tests.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The engine never talks to SQLite, an HTTP executor, or `git` directly; it
//! talks to `Store`, `EventSink`, `Executor`, and `WorkspaceManager`. Concrete
//! implementations live in sibling crates (`taskloom-store-sqlite`,
//! `taskloom-broker`, `taskloom-providers`, `taskloom-workspace`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::CircuitBreakerRecord;
use crate::core::EventLogEntry;
use crate::core::Gate;
use crate::core::GateOutcome;
use crate::core::MemoryBucket;
use crate::core::MemoryEntry;
use crate::core::ProjectId;
use crate::core::Stage;
use crate::core::StageStatus;
use crate::core::StructuredOutput;
use crate::core::Task;
use crate::core::TaskId;
use crate::core::TaskStatus;

// ============================================================================
// SECTION: Priority
// ============================================================================

/// Delivery priority for an `EventSink` emission.
///
/// # Invariants
/// Higher-priority emissions are never starved indefinitely by lower
/// priority ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Gate-related and failure notifications.
    High,
    /// Ordinary stage and task status changes.
    Normal,
    /// Verbose tool-call telemetry.
    Low,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Errors returned by a `Store` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The target row did not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A compare-and-swap update lost the race to a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backing storage medium returned an error.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Durable storage boundary for tasks, stages, gates, event log, memory, and
/// circuit breaker records.
///
/// # Invariants
/// - `claim_oldest_pending` performs an atomic compare-and-swap from
///   `Pending` to `Claimed`; two concurrent callers never claim the same
///   task.
/// - `append_event_log` assigns a strictly increasing `sequence` per task.
pub trait Store: Send + Sync {
    /// Atomically claims the oldest pending task, if one exists.
    fn claim_oldest_pending(&self) -> Result<Option<Task>, StoreError>;

    /// Recovers tasks stuck in `Claimed` or `Running` past a staleness
    /// threshold back to `Pending`, returning their ids.
    fn recover_stale(&self, stale_after_secs: i64) -> Result<Vec<TaskId>, StoreError>;

    /// Updates a task's status with a compare-and-swap on the expected
    /// current status.
    fn update_task_status(
        &self,
        task_id: &TaskId,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> Result<(), StoreError>;

    /// Persists a task's usage, plan, or routing-decision mutations.
    fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Inserts or replaces a stage row.
    fn upsert_stage(&self, stage: &Stage) -> Result<(), StoreError>;

    /// Updates a stage's status in place.
    fn update_stage_status(&self, stage_id: &crate::core::StageId, status: StageStatus) -> Result<(), StoreError>;

    /// Sets a stage's raw output text.
    fn set_stage_output(&self, stage_id: &crate::core::StageId, output_text: &str) -> Result<(), StoreError>;

    /// Sets a stage's extracted structured output.
    fn set_stage_structured(
        &self,
        stage_id: &crate::core::StageId,
        structured: &StructuredOutput,
    ) -> Result<(), StoreError>;

    /// Creates a new pending gate.
    fn create_gate(&self, gate: &Gate) -> Result<(), StoreError>;

    /// Resolves a pending gate with the given outcome.
    fn refresh_gate(&self, gate_id: &crate::core::GateId, outcome: GateOutcome) -> Result<Gate, StoreError>;

    /// Lists all gates still awaiting a human decision.
    fn list_pending_gates(&self) -> Result<Vec<Gate>, StoreError>;

    /// Appends an event log entry, assigning its sequence number.
    fn append_event_log(&self, entry: EventLogEntry) -> Result<EventLogEntry, StoreError>;

    /// Inserts a circuit breaker trip record.
    fn insert_circuit_breaker(&self, record: &CircuitBreakerRecord) -> Result<(), StoreError>;

    /// Loads all memory entries for a project, grouped by bucket.
    fn load_memories(&self, project_id: &ProjectId) -> Result<BTreeMap<MemoryBucket, Vec<MemoryEntry>>, StoreError>;

    /// Appends memory entries, applying bounded oldest-drop capacity.
    fn append_memories(&self, project_id: &ProjectId, entries: Vec<MemoryEntry>) -> Result<(), StoreError>;

    /// Reads a single task by id, reflecting the latest committed state.
    ///
    /// Used by the gate poll loop to notice out-of-band cancellation while a
    /// task is blocked waiting on a human decision.
    fn get_task(&self, task_id: &TaskId) -> Result<Task, StoreError>;

    /// Reads a single gate by id, reflecting the latest committed state.
    fn get_gate(&self, gate_id: &crate::core::GateId) -> Result<Gate, StoreError>;
}

// ============================================================================
// SECTION: EventSink
// ============================================================================

/// Errors returned by an `EventSink` implementation.
#[derive(Debug, Error)]
pub enum EventSinkError {
    /// The sink's internal queue is full and the emission was dropped.
    #[error("queue full, dropped emission")]
    QueueFull,
    /// The underlying delivery channel failed.
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Best-effort broadcast boundary for task/stage/gate state changes to
/// external observers.
///
/// # Invariants
/// - Delivery is best-effort: a dropped or failed emission never blocks the
///   engine's own state transitions.
/// - `drain` flushes any buffered emissions before returning.
pub trait EventSink: Send + Sync {
    /// Emits a creation event, e.g. a new task or stage.
    fn emit_create(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError>;

    /// Emits an update event, e.g. a status transition.
    fn emit_update(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError>;

    /// Flushes any buffered emissions.
    fn drain(&self) -> Result<(), EventSinkError>;
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Errors returned by an `Executor` implementation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The execution exceeded its configured wall-clock timeout.
    #[error("execution timed out after {0}s")]
    Timeout(u64),
    /// A tool invocation failed during execution.
    #[error("tool call failed: {0}")]
    ToolFailure(String),
    /// The executor's backend (process, sandbox, remote API) is unavailable.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    /// The agent exceeded its configured turn budget without terminating.
    #[error("max turns exceeded")]
    MaxTurnsExceeded,
}

/// Prior failure carried into a stage's retry attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RetryContext {
    /// The error message from the prior attempt.
    pub prior_error: String,
    /// A preview of the prior attempt's output, if one was produced.
    pub prior_output_preview: Option<String>,
}

/// Reviewer feedback carried into a stage's re-execution after a gate
/// revision or rejection.
#[derive(Debug, Clone, Serialize)]
pub struct GateRejectionContext {
    /// The reviewer's comment, if one was given.
    pub comment: Option<String>,
    /// Reviewer-supplied replacement content, present only for a revision.
    pub revised_content: Option<String>,
    /// Attempt counter rendered as `"k/M"` (1-based, of `max_retries`).
    pub retry: String,
}

/// One request to delegate a stage's work to an agent.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Rendered instruction text.
    pub instruction: String,
    /// Compressed context from prior stages.
    pub context: String,
    /// Agent role to delegate to.
    pub agent_role: String,
    /// Optional model override.
    pub model_override: Option<String>,
    /// Maximum agent turns allowed.
    pub max_turns: u32,
    /// Wall-clock timeout in seconds.
    pub timeout_secs: u64,
    /// Workspace path the executor should operate in, if any.
    pub workspace_path: Option<String>,
    /// Set when this is an automatic retry of a transient failure.
    pub retry_context: Option<RetryContext>,
    /// Set when this is a re-execution driven by a gate revision/rejection.
    pub gate_rejection_context: Option<GateRejectionContext>,
}

/// The result of one stage execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Raw free-text output.
    pub output_text: String,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Turns consumed.
    pub turns_used: u32,
    /// Estimated cost in fractional-cent integer units.
    pub cost_cents: u64,
}

/// Delegation boundary to an external agent executor.
///
/// # Invariants
/// - `execute` either returns an `ExecutionResult` or an `ExecutorError`; it
///   never silently swallows a failed stage.
pub trait Executor: Send + Sync {
    /// Executes one stage to completion or failure.
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError>;
}

// ============================================================================
// SECTION: WorkspaceManager
// ============================================================================

/// Errors returned by a `WorkspaceManager` implementation.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The underlying git operation failed.
    #[error("git error: {0}")]
    Git(String),
    /// The sandbox container failed to start or respond.
    #[error("sandbox error: {0}")]
    Sandbox(String),
    /// The configured remote (PR host) rejected the request.
    #[error("remote error: {0}")]
    Remote(String),
}

/// A live worktree and/or sandbox allocated to a task.
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    /// Worktree identifier.
    pub worktree_id: crate::core::WorktreeId,
    /// Absolute path to the worktree on disk.
    pub path: String,
    /// Sandbox container identifier, if one was allocated.
    pub sandbox_id: Option<crate::core::SandboxId>,
    /// Branch name checked out in the worktree.
    pub branch_name: String,
}

/// Lifecycle boundary for git worktrees and sandbox containers.
pub trait WorkspaceManager: Send + Sync {
    /// Creates a new worktree and branch for a task.
    fn setup_worktree(&self, task_id: &TaskId, base_branch: &str) -> Result<WorkspaceHandle, WorkspaceError>;

    /// Starts a sandbox container bound to an existing worktree.
    fn setup_sandbox(&self, handle: &WorkspaceHandle) -> Result<WorkspaceHandle, WorkspaceError>;

    /// Commits staged changes and pushes the branch.
    fn commit_and_push(&self, handle: &WorkspaceHandle, message: &str) -> Result<(), WorkspaceError>;

    /// Opens a pull request for the pushed branch, returning its URL.
    fn create_pr(&self, handle: &WorkspaceHandle, title: &str, body: &str) -> Result<String, WorkspaceError>;

    /// Tears down the sandbox and worktree.
    fn cleanup(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError>;
}

// ============================================================================
// SECTION: Circuit Breaker Hook
// ============================================================================

/// Decision returned by a `CircuitBreakerHook` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerDecision {
    /// Usage is within configured thresholds.
    Continue,
    /// A soft threshold was crossed; the task should pause for review.
    Warn,
    /// A hard threshold was crossed; the task must halt.
    Halt,
}

/// Evaluates cumulative task usage against configured cost/resource
/// thresholds after each stage credits usage.
pub trait CircuitBreakerHook: Send + Sync {
    /// Checks a task's current usage totals against configured thresholds.
    fn check(&self, total_tokens: u64, total_cost_cents: u64, stage_count: u32) -> CircuitBreakerDecision;
}

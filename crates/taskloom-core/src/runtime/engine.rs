// crates/taskloom-core/src/runtime/engine.rs
// ============================================================================
// Module: Task Loom Engine
// Description: Drives claimed tasks through their template's stages and gates.
// Purpose: The single place that sequences execution, compression, contract
//          extraction, gating, circuit breaking, and workspace lifecycle.
// Dependencies: crate::{core, interfaces, runtime::{graph, comparator, compressor, contract}}
// ============================================================================

//! ## Overview
//! The engine owns no storage or transport of its own; every side effect
//! flows through the `Store`, `EventSink`, `Executor`, `WorkspaceManager`,
//! `Compressor`, `ContractExtractor`, and `CircuitBreakerHook` traits it is
//! constructed with. One `Engine` instance drives one poll loop; multiple
//! instances may run against the same `Store` because claiming is a
//! compare-and-swap.
//!
//! A task's entire lifecycle, including any gate waits, happens within one
//! `advance` call: gates block the calling thread in a poll-wait loop rather
//! than pausing the task for a separate resume step. A human (or the `gate`
//! CLI subcommand) resolves a gate out-of-band by calling `Store::refresh_gate`
//! directly; the blocked `advance` call notices the change on its next poll
//! tick via `Store::get_gate`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::core::CircuitBreakerId;
use crate::core::CircuitBreakerLevel;
use crate::core::CircuitBreakerRecord;
use crate::core::CorrelationId;
use crate::core::EventLogEntry;
use crate::core::EventSource;
use crate::core::EventStatus;
use crate::core::FailureCategory;
use crate::core::Gate;
use crate::core::GateDef;
use crate::core::GateId;
use crate::core::GateKind;
use crate::core::GateOutcome;
use crate::core::GateStatus;
use crate::core::MemoryBucket;
use crate::core::MemoryEntry;
use crate::core::MemoryId;
use crate::core::OnFailure;
use crate::core::OutputStatus;
use crate::core::RoutingDecision;
use crate::core::Stage;
use crate::core::StageDef;
use crate::core::StageId;
use crate::core::StageKind;
use crate::core::StageStatus;
use crate::core::StructuredOutput;
use crate::core::Task;
use crate::core::TaskId;
use crate::core::TaskStatus;
use crate::core::Template;
use crate::core::Timestamp;
use crate::interfaces::CircuitBreakerDecision;
use crate::interfaces::CircuitBreakerHook;
use crate::interfaces::EventSink;
use crate::interfaces::EventSinkError;
use crate::interfaces::ExecutionRequest;
use crate::interfaces::Executor;
use crate::interfaces::ExecutorError;
use crate::interfaces::GateRejectionContext;
use crate::interfaces::Priority;
use crate::interfaces::RetryContext;
use crate::interfaces::Store;
use crate::interfaces::StoreError;
use crate::interfaces::WorkspaceHandle;
use crate::interfaces::WorkspaceManager;
use crate::runtime::comparator;
use crate::runtime::compressor::CompressionLevel;
use crate::runtime::compressor::Compressor;
use crate::runtime::contract::ContractError;
use crate::runtime::contract::ContractExtractor;
use crate::runtime::graph::Graph;
use crate::runtime::graph::GraphError;

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Errors raised while driving a task.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A `Store` call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An `EventSink` call failed; never fatal to the driver but surfaced
    /// for visibility.
    #[error(transparent)]
    EventSink(#[from] EventSinkError),
    /// An `Executor` call failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// Building the template's dependency graph failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Contract extraction failed.
    #[error(transparent)]
    Contract(#[from] ContractError),
    /// The referenced gate, stage, or task was not found on the task being
    /// driven.
    #[error("not found: {0}")]
    NotFound(String),
}

// ============================================================================
// SECTION: Engine Config
// ============================================================================

/// Tunables governing engine behavior, independent of any one task.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// A claimed/running task untouched for this long is recovered to
    /// `pending` on the next `recover_stale` sweep.
    pub stale_after_secs: i64,
    /// Default wall-clock wait before a gate times out, when the template
    /// does not override it.
    pub gate_default_timeout_secs: i64,
    /// Confidence below this threshold causes the engine to insert a
    /// dynamic `ConfidenceReview` gate even if the template did not declare
    /// one.
    pub confidence_review_threshold: f64,
    /// How often a blocked gate wait re-polls `Store::get_gate` for a
    /// resolution. A value of `0` is used by tests to poll as fast as
    /// possible instead of sleeping.
    pub gate_poll_interval_secs: u64,
    /// Upper bound on scheduling rounds for one task's graph, guarding
    /// against a misconfigured redirect loop that never terminates.
    pub graph_max_loop_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 15 * 60,
            gate_default_timeout_secs: 24 * 60 * 60,
            confidence_review_threshold: 0.5,
            gate_poll_interval_secs: 30,
            graph_max_loop_iterations: 50,
        }
    }
}

// ============================================================================
// SECTION: Stage Attempt
// ============================================================================

/// The outcome of one `execute_stage` attempt.
enum StageAttempt {
    /// The stage completed; carries its extracted structured output.
    Completed(StructuredOutput),
    /// The stage failed but is being retried automatically; the caller
    /// should let the next scheduling round pick it back up.
    Retrying,
    /// The stage failed terminally and failed the whole task.
    TaskFailed,
    /// The stage failed terminally and redirected execution elsewhere.
    Redirected,
}

/// Whether a gate's resolution lets the driver continue past it.
enum GateFlow {
    /// Continue scheduling the rest of the graph.
    Continue,
    /// Stop driving this task; its status already reflects why (failed,
    /// cancelled, or still blocked pending a resolution that didn't arrive).
    Stop,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Drives tasks through their template's stages and gates.
pub struct Engine {
    store: Arc<dyn Store>,
    event_sink: Arc<dyn EventSink>,
    executor: Arc<dyn Executor>,
    workspace: Arc<dyn WorkspaceManager>,
    compressor: Arc<dyn Compressor>,
    contract_extractor: Arc<dyn ContractExtractor>,
    circuit_breaker: Arc<dyn CircuitBreakerHook>,
    config: EngineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Constructs an engine from its backing interfaces and tunables.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        event_sink: Arc<dyn EventSink>,
        executor: Arc<dyn Executor>,
        workspace: Arc<dyn WorkspaceManager>,
        compressor: Arc<dyn Compressor>,
        contract_extractor: Arc<dyn ContractExtractor>,
        circuit_breaker: Arc<dyn CircuitBreakerHook>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            event_sink,
            executor,
            workspace,
            compressor,
            contract_extractor,
            circuit_breaker,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals every blocked gate wait and the next scheduling round to
    /// abort rather than continue driving tasks. Used for graceful process
    /// shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Claims the oldest pending task and drives it one scheduling round,
    /// returning `true` if a task was claimed. Intended to be called
    /// repeatedly from a poll loop.
    pub fn poll_once(&self, template_for: impl Fn(&Task) -> Result<Template, EngineError>) -> Result<bool, EngineError> {
        let recovered = self.store.recover_stale(self.config.stale_after_secs)?;
        for task_id in recovered {
            log::warn!("recovered stale task {task_id} back to pending");
        }

        let Some(mut task) = self.store.claim_oldest_pending()? else {
            return Ok(false);
        };

        self.store.update_task_status(&task.id, TaskStatus::Pending, TaskStatus::Claimed)?;
        task.status = TaskStatus::Claimed;
        self.emit(&task.id, "task_claimed", Priority::Normal);

        let template = template_for(&task)?;
        self.store.update_task_status(&task.id, TaskStatus::Claimed, TaskStatus::Running)?;
        task.status = TaskStatus::Running;

        self.advance(&mut task, &template)?;
        Ok(true)
    }

    /// Drives a task to completion, failure, or an abandoned gate wait,
    /// unconditionally finalizing its workspace resources (memory
    /// extraction, commit/push/PR, worktree and sandbox cleanup) before
    /// returning, whether the drive succeeded or errored.
    pub fn advance(&self, task: &mut Task, template: &Template) -> Result<(), EngineError> {
        let handle = self.ensure_workspace(task)?;
        let result = self.drive(task, template, &handle);
        let succeeded = task.status == TaskStatus::Completed;
        match &result {
            Ok(outputs) => self.finalize_resources(task, &handle, outputs, succeeded),
            Err(_) => self.finalize_resources(task, &handle, &HashMap::new(), succeeded),
        }
        result.map(|_| ())
    }

    /// Resolves a pending gate with a human decision. The engine's own
    /// blocked `run_gate` poll loop observes this change directly from the
    /// store on its next poll tick, so this is a thin pass-through kept for
    /// callers that want to resolve gates through the engine rather than
    /// the store directly.
    pub fn resolve_gate(&self, gate_id: &GateId, outcome: GateOutcome) -> Result<Gate, EngineError> {
        Ok(self.store.refresh_gate(gate_id, outcome)?)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Runs the template's graph/linear driver to completion, failure, or an
    /// abandoned gate wait. Returns the structured outputs accumulated so
    /// far regardless of which of those three it stopped on, so the caller
    /// can still extract memories from partial progress.
    fn drive(
        &self,
        task: &mut Task,
        template: &Template,
        handle: &WorkspaceHandle,
    ) -> Result<HashMap<String, StructuredOutput>, EngineError> {
        let graph = Graph::from_template(template)?;

        let mut statuses: HashMap<String, StageStatus> = HashMap::new();
        let mut outputs: HashMap<String, StructuredOutput> = HashMap::new();
        let mut exec_counts: HashMap<String, u32> = HashMap::new();
        let mut retry_counts: HashMap<String, u32> = HashMap::new();
        let mut retry_contexts: HashMap<String, RetryContext> = HashMap::new();
        let max_executions: HashMap<String, u32> =
            template.stages.iter().map(|stage_def| (stage_def.name.clone(), stage_def.max_executions.max(1))).collect();

        let max_iter = graph.max_total_executions(&max_executions).max(self.config.graph_max_loop_iterations);
        let mut iter: u64 = 0;

        'rounds: loop {
            if task.status.is_terminal() {
                break;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                log::warn!("engine shutting down, abandoning task {}", task.id);
                break;
            }
            if let Ok(fresh) = self.store.get_task(&task.id) {
                if fresh.status == TaskStatus::Cancelled {
                    task.status = TaskStatus::Cancelled;
                    break;
                }
            }

            iter += 1;
            if iter > max_iter {
                self.fail_task(task, "graph execution exceeded max iterations")?;
                break;
            }

            let ready = graph.ready_set(&statuses, &exec_counts, &max_executions);
            if ready.is_empty() {
                break;
            }

            for stage_name in ready.stage_names.clone() {
                if task.status.is_terminal() {
                    break 'rounds;
                }
                let Some(stage_def) = template.stage(&stage_name) else {
                    continue;
                };

                if let Some(condition) = &stage_def.condition {
                    let source = outputs.get(&condition.source_stage);
                    let result = comparator::evaluate(condition, source);
                    if result.unknown_as_false() {
                        statuses.insert(stage_name.clone(), StageStatus::Skipped);
                        self.emit(&task.id, "stage_skipped", Priority::Normal);
                        continue;
                    }
                }

                let context = self.compress_context(&graph, &stage_name, &outputs, &stage_def.context_from)?;
                let retry_context = retry_contexts.remove(&stage_name);

                let attempt = self.execute_stage(
                    task,
                    stage_def,
                    &context,
                    retry_context,
                    None,
                    &mut statuses,
                    &mut outputs,
                    &mut exec_counts,
                    &mut retry_counts,
                    &mut retry_contexts,
                    handle,
                )?;

                match attempt {
                    StageAttempt::Completed(structured) => {
                        self.apply_routing(task, stage_def, &structured)?;

                        if let Some(confidence) = structured.confidence {
                            if confidence < self.config.confidence_review_threshold {
                                log::info!(
                                    "stage {stage_name} confidence {confidence} below threshold, inserting review gate"
                                );
                                let confidence_gate =
                                    GateDef { after_stage: stage_name.clone(), kind: GateKind::ConfidenceReview, max_retries: 0 };
                                if matches!(
                                    self.run_gate(
                                        task,
                                        stage_def,
                                        &confidence_gate,
                                        &context,
                                        &mut statuses,
                                        &mut outputs,
                                        &mut exec_counts,
                                        &mut retry_counts,
                                        &mut retry_contexts,
                                        handle,
                                    )?,
                                    GateFlow::Stop
                                ) {
                                    break 'rounds;
                                }
                            }
                        }

                        for gate_def in template.gates_after(&stage_name) {
                            if matches!(
                                self.run_gate(
                                    task,
                                    stage_def,
                                    gate_def,
                                    &context,
                                    &mut statuses,
                                    &mut outputs,
                                    &mut exec_counts,
                                    &mut retry_counts,
                                    &mut retry_contexts,
                                    handle,
                                )?,
                                GateFlow::Stop
                            ) {
                                break 'rounds;
                            }
                        }
                    }
                    StageAttempt::Retrying | StageAttempt::Redirected => continue,
                    StageAttempt::TaskFailed => break 'rounds,
                }
            }
        }

        if template.stages.iter().all(|stage_def| {
            matches!(
                statuses.get(&stage_def.name).copied().unwrap_or(StageStatus::Pending),
                StageStatus::Completed | StageStatus::Skipped
            )
        }) {
            self.complete_task(task)?;
        }

        Ok(outputs)
    }

    /// Runs one execution attempt of `stage_def`: starts a stage row,
    /// delegates to the executor, credits usage, extracts structured
    /// output, and checks the circuit breaker. The circuit breaker check
    /// runs only after the stage has been marked `Completed` and its
    /// output saved, so a halted task still leaves the triggering stage's
    /// own status and output intact.
    #[allow(clippy::too_many_arguments)]
    fn execute_stage(
        &self,
        task: &mut Task,
        stage_def: &StageDef,
        context: &str,
        retry_context: Option<RetryContext>,
        gate_rejection_context: Option<GateRejectionContext>,
        statuses: &mut HashMap<String, StageStatus>,
        outputs: &mut HashMap<String, StructuredOutput>,
        exec_counts: &mut HashMap<String, u32>,
        retry_counts: &mut HashMap<String, u32>,
        retry_contexts: &mut HashMap<String, RetryContext>,
        handle: &WorkspaceHandle,
    ) -> Result<StageAttempt, EngineError> {
        let stage_name = stage_def.name.clone();
        let execution_count = {
            let count = exec_counts.entry(stage_name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if execution_count > stage_def.max_executions {
            statuses.insert(stage_name.clone(), StageStatus::Failed);
            self.fail_task(task, &format!("stage {stage_name} exceeded max executions"))?;
            return Ok(StageAttempt::TaskFailed);
        }

        let mut stage = self.start_stage(task, &stage_name, &stage_def.agent_role, execution_count)?;
        statuses.insert(stage_name.clone(), StageStatus::Running);

        let request = ExecutionRequest {
            instruction: stage_def.instruction.clone(),
            context: context.to_string(),
            agent_role: stage_def.agent_role.clone(),
            model_override: stage_def.model_override.clone(),
            max_turns: stage_def.max_turns,
            timeout_secs: stage_def.timeout.0,
            workspace_path: Some(handle.path.clone()),
            retry_context,
            gate_rejection_context,
        };

        match self.executor.execute(&request) {
            Ok(result) => {
                task.credit_usage(result.tokens_used, result.cost_cents);
                self.store.save_task(task)?;

                stage.output_text = Some(result.output_text.clone());
                stage.tokens_used = result.tokens_used;
                stage.turns_used = result.turns_used;
                stage.finished_at = Some(Timestamp::now());
                self.store.set_stage_output(&stage.id, &result.output_text)?;

                let kind = stage_kind_for(&stage_name);
                let structured = self.contract_extractor.extract(kind, &result.output_text)?;
                stage.confidence = structured.confidence;
                self.store.set_stage_structured(&stage.id, &structured)?;

                stage.status = StageStatus::Completed;
                self.store.update_stage_status(&stage.id, StageStatus::Completed)?;
                statuses.insert(stage_name.clone(), StageStatus::Completed);
                outputs.insert(stage_name.clone(), structured.clone());
                self.record_stage_event(task, &stage, EventStatus::Success, &request, Some(&result.output_text));
                self.emit(&task.id, "stage_completed", Priority::Normal);

                match self.circuit_breaker.check(task.total_tokens, task.total_cost_cents, statuses.len() as u32) {
                    CircuitBreakerDecision::Halt => {
                        self.trip_breaker(
                            task,
                            CircuitBreakerLevel::Halt,
                            &format!(
                                "usage threshold exceeded: tokens={} cost_cents={}",
                                task.total_tokens, task.total_cost_cents
                            ),
                        )?;
                        self.fail_task(task, &format!("circuit breaker halted task after stage {stage_name}"))?;
                        return Ok(StageAttempt::TaskFailed);
                    }
                    CircuitBreakerDecision::Warn => {
                        self.trip_breaker(
                            task,
                            CircuitBreakerLevel::Warn,
                            &format!(
                                "usage approaching threshold: tokens={} cost_cents={}",
                                task.total_tokens, task.total_cost_cents
                            ),
                        )?;
                    }
                    CircuitBreakerDecision::Continue => {}
                }

                Ok(StageAttempt::Completed(structured))
            }
            Err(error) => {
                stage.status = StageStatus::Failed;
                stage.error_message = Some(error.to_string());
                stage.failure_category = Some(classify_failure(&error));
                stage.finished_at = Some(Timestamp::now());
                self.store.update_stage_status(&stage.id, StageStatus::Failed)?;
                self.record_stage_event(task, &stage, EventStatus::Failed, &request, None);
                self.emit(&task.id, "stage_failed", Priority::High);

                let retry_count = retry_counts.entry(stage_name.clone()).or_insert(0);
                if *retry_count < stage_def.max_retries {
                    *retry_count += 1;
                    retry_contexts.insert(
                        stage_name.clone(),
                        RetryContext { prior_error: error.to_string(), prior_output_preview: None },
                    );
                    statuses.insert(stage_name.clone(), StageStatus::Pending);
                    return Ok(StageAttempt::Retrying);
                }

                match &stage_def.on_failure {
                    OnFailure::FailTask => {
                        self.fail_task(task, &format!("stage {stage_name} failed: {error}"))?;
                        Ok(StageAttempt::TaskFailed)
                    }
                    OnFailure::RedirectTo { stage: target } => {
                        statuses.insert(stage_name.clone(), StageStatus::Failed);
                        statuses.remove(target);
                        outputs.remove(target);
                        retry_counts.remove(target);
                        Ok(StageAttempt::Redirected)
                    }
                }
            }
        }
    }

    /// Blocks in a poll-wait loop until `gate_def` reaches a terminal
    /// outcome, re-executing `stage_def` with a gate-rejection context on
    /// each revision or eligible rejection, per the outcome table: approved
    /// continues; revised or rejected-with-retries-left re-executes the
    /// stage and waits on a fresh gate; rejected-exhausted or timeout fails
    /// the task; the task being cancelled or the engine shutting down both
    /// abort the wait without failing the task outright.
    #[allow(clippy::too_many_arguments)]
    fn run_gate(
        &self,
        task: &mut Task,
        stage_def: &StageDef,
        gate_def: &GateDef,
        context: &str,
        statuses: &mut HashMap<String, StageStatus>,
        outputs: &mut HashMap<String, StructuredOutput>,
        exec_counts: &mut HashMap<String, u32>,
        retry_counts: &mut HashMap<String, u32>,
        retry_contexts: &mut HashMap<String, RetryContext>,
        handle: &WorkspaceHandle,
    ) -> Result<GateFlow, EngineError> {
        let stage_name = stage_def.name.clone();
        let mut attempt_num: u32 = 0;

        loop {
            let gate = self.create_pending_gate(task, &stage_name, gate_def, attempt_num)?;
            self.emit(&task.id, "gate_created", Priority::High);

            let was_planning = matches!(gate_def.kind, GateKind::PlanReview);
            if was_planning {
                task.status = TaskStatus::Planning;
                self.store.save_task(task)?;
            }

            let outcome = self.poll_gate(task, &gate)?;

            if was_planning && task.status == TaskStatus::Planning {
                task.status = TaskStatus::Running;
                self.store.save_task(task)?;
            }

            self.emit(&task.id, &format!("gate_wait_{}", gate_outcome_tag(&outcome)), Priority::High);

            match outcome {
                GateOutcome::Approved => return Ok(GateFlow::Continue),
                GateOutcome::Revised { comment, content } => {
                    if attempt_num >= gate_def.max_retries {
                        self.fail_task(task, &format!("gate after {stage_name} exhausted retries"))?;
                        return Ok(GateFlow::Stop);
                    }
                    attempt_num += 1;
                    self.record_gate_rejection_memory(task, &stage_name, attempt_num, comment.as_deref())?;
                    let rejection = GateRejectionContext {
                        comment,
                        revised_content: Some(content),
                        retry: format!("{attempt_num}/{}", gate_def.max_retries),
                    };
                    let reattempt = self.execute_stage(
                        task,
                        stage_def,
                        context,
                        None,
                        Some(rejection),
                        statuses,
                        outputs,
                        exec_counts,
                        retry_counts,
                        retry_contexts,
                        handle,
                    )?;
                    if !matches!(reattempt, StageAttempt::Completed(_)) {
                        return Ok(GateFlow::Stop);
                    }
                }
                GateOutcome::Rejected { comment, .. } => {
                    if attempt_num >= gate_def.max_retries {
                        self.fail_task(task, &format!("gate after {stage_name} rejected, retries exhausted"))?;
                        return Ok(GateFlow::Stop);
                    }
                    attempt_num += 1;
                    self.record_gate_rejection_memory(task, &stage_name, attempt_num, comment.as_deref())?;
                    let rejection = GateRejectionContext {
                        comment,
                        revised_content: None,
                        retry: format!("{attempt_num}/{}", gate_def.max_retries),
                    };
                    let reattempt = self.execute_stage(
                        task,
                        stage_def,
                        context,
                        None,
                        Some(rejection),
                        statuses,
                        outputs,
                        exec_counts,
                        retry_counts,
                        retry_contexts,
                        handle,
                    )?;
                    if !matches!(reattempt, StageAttempt::Completed(_)) {
                        return Ok(GateFlow::Stop);
                    }
                }
                GateOutcome::Timeout => {
                    self.fail_task(task, &format!("gate after {stage_name} timed out"))?;
                    return Ok(GateFlow::Stop);
                }
                GateOutcome::Cancelled => {
                    task.status = TaskStatus::Cancelled;
                    return Ok(GateFlow::Stop);
                }
                GateOutcome::ShutdownAborted => return Ok(GateFlow::Stop),
            }
        }
    }

    fn create_pending_gate(&self, task: &Task, after_stage: &str, gate_def: &GateDef, attempt: u32) -> Result<Gate, EngineError> {
        let now = Timestamp::now();
        let gate = Gate {
            id: GateId::new(uuid_like(&task.id, &format!("{after_stage}#{attempt}"))),
            task_id: task.id.clone(),
            after_stage: after_stage.to_string(),
            kind: gate_def.kind,
            status: GateStatus::Pending,
            outcome: None,
            retry_count: attempt,
            max_retries: gate_def.max_retries,
            created_at: now,
            deadline: now.plus_seconds(self.config.gate_default_timeout_secs),
            resolved_at: None,
        };
        self.store.create_gate(&gate)?;
        Ok(gate)
    }

    /// Polls `Store::get_gate` until the gate leaves `Pending`, its deadline
    /// passes, the task is cancelled, or the engine is shutting down.
    fn poll_gate(&self, task: &Task, gate: &Gate) -> Result<GateOutcome, EngineError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(GateOutcome::ShutdownAborted);
            }

            if let Ok(fresh_task) = self.store.get_task(&task.id) {
                if fresh_task.status == TaskStatus::Cancelled {
                    return Ok(GateOutcome::Cancelled);
                }
            }

            match self.store.get_gate(&gate.id) {
                Ok(fresh_gate) => {
                    if fresh_gate.status != GateStatus::Pending {
                        if let Some(outcome) = fresh_gate.outcome {
                            return Ok(outcome);
                        }
                    }
                    if fresh_gate.is_expired(Timestamp::now()) {
                        return Ok(GateOutcome::Timeout);
                    }
                }
                Err(error) => {
                    log::warn!("transient error polling gate {}: {error}", gate.id);
                }
            }

            self.sleep_poll_interval();
        }
    }

    fn sleep_poll_interval(&self) {
        if self.config.gate_poll_interval_secs == 0 {
            std::thread::sleep(std::time::Duration::from_millis(10));
        } else {
            std::thread::sleep(std::time::Duration::from_secs(self.config.gate_poll_interval_secs));
        }
    }

    /// Allocates a worktree for the task if it does not already have one.
    /// A task's entire drive happens within one `advance` call, so a live
    /// `WorkspaceHandle` only needs to survive one call's duration; a task
    /// recovered mid-gate-wait after a crash reconstructs a best-effort
    /// handle from its persisted branch name rather than re-running
    /// worktree setup (which is not safe to repeat against an existing
    /// branch).
    fn ensure_workspace(&self, task: &mut Task) -> Result<WorkspaceHandle, EngineError> {
        if let Some(branch_name) = task.branch_name.clone() {
            return Ok(WorkspaceHandle {
                worktree_id: crate::core::WorktreeId::new(task.id.as_str()),
                path: branch_name.clone(),
                sandbox_id: None,
                branch_name,
            });
        }
        let handle = self
            .workspace
            .setup_worktree(&task.id, "main")
            .map_err(|error| EngineError::NotFound(format!("workspace setup failed: {error}")))?;
        let handle = self
            .workspace
            .setup_sandbox(&handle)
            .map_err(|error| EngineError::NotFound(format!("sandbox setup failed: {error}")))?;
        task.branch_name = Some(handle.branch_name.clone());
        self.store.save_task(task)?;
        self.emit(&task.id, "workspace_ready", Priority::Normal);
        Ok(handle)
    }

    fn start_stage(&self, task: &Task, name: &str, agent_role: &str, execution_count: u32) -> Result<Stage, EngineError> {
        let stage = Stage {
            id: StageId::new(uuid_like(&task.id, &format!("{name}#{execution_count}"))),
            task_id: task.id.clone(),
            name: name.to_string(),
            agent_role: agent_role.to_string(),
            status: StageStatus::Running,
            output_text: None,
            structured_output: None,
            error_message: None,
            failure_category: None,
            confidence: None,
            retry_count: 0,
            execution_count,
            tokens_used: 0,
            turns_used: 0,
            started_at: Some(Timestamp::now()),
            finished_at: None,
        };
        self.store.upsert_stage(&stage)?;
        self.emit(&task.id, "stage_started", Priority::Normal);
        Ok(stage)
    }

    /// Translates one executor call into an append-only event log row, the
    /// way a tool invocation or agent turn would be recorded.
    fn record_stage_event(
        &self,
        task: &Task,
        stage: &Stage,
        status: EventStatus,
        request: &ExecutionRequest,
        output_text: Option<&str>,
    ) {
        let mut entry = event_log_shell(&task.id, "stage_execution", EventSource::Tool);
        entry.status = status;
        entry.command = Some(stage.name.clone());
        entry.request_body = Some(request.instruction.clone());
        entry.workspace = request.workspace_path.clone();
        if let Some(output_text) = output_text {
            let (summary, truncated) = crate::core::truncate_output(output_text);
            entry.output_summary = Some(summary);
            entry.output_truncated = truncated;
        }
        if let Err(error) = self.store.append_event_log(entry) {
            log::warn!("event log append failed for task {}: {error}", task.id);
        }
    }

    /// Assembles compressed context from a stage's dependencies: full text
    /// for the immediately preceding stage, a bulleted brief one stage back,
    /// and a one-line summary further back than that, regardless of the
    /// distance rule whenever the consumer's `context_from` names the
    /// dependency explicitly.
    fn compress_context(
        &self,
        graph: &Graph,
        stage_name: &str,
        outputs: &HashMap<String, StructuredOutput>,
        context_from: &[String],
    ) -> Result<String, EngineError> {
        let deps = graph.dependencies_of(stage_name);
        let mut sections = Vec::new();
        for (distance, dep) in deps.iter().enumerate() {
            let Some(structured) = outputs.get(dep) else {
                continue;
            };
            let explicitly_requested = context_from.iter().any(|name| name == dep);
            let level = CompressionLevel::for_distance(u32::try_from(distance).unwrap_or(u32::MAX), explicitly_requested);
            let rendered = self
                .compressor
                .compress(dep, &structured.summary, level)
                .unwrap_or_else(|_| structured.summary.clone());
            let prefixed = match level {
                CompressionLevel::L0 => format!("[概要] {rendered}"),
                CompressionLevel::L1 => format!("[摘要] {rendered}"),
                CompressionLevel::L2 => rendered,
            };
            sections.push(format!("## {dep}\n{prefixed}"));
        }
        Ok(sections.join("\n\n"))
    }

    /// Records a dynamic-routing decision for a stage with routing
    /// configured: the first candidate whose corresponding field in the
    /// stage's structured output is truthy, falling back to the first
    /// candidate. This is an audit-trail heuristic, not a model call; it
    /// does not reorder execution beyond recording the decision.
    fn apply_routing(&self, task: &mut Task, stage_def: &StageDef, structured: &StructuredOutput) -> Result<(), EngineError> {
        let Some(routing) = &stage_def.routing else {
            return Ok(());
        };
        let target = routing
            .candidates
            .iter()
            .find(|candidate| structured.fields.get(candidate.as_str()).is_some_and(value_is_truthy))
            .or_else(|| routing.candidates.first());
        let Some(target) = target else {
            return Ok(());
        };
        task.routing_decisions.push(RoutingDecision {
            stage_name: stage_def.name.clone(),
            target: target.clone(),
            rationale: None,
            decided_at: Timestamp::now(),
        });
        self.store.save_task(task)?;
        Ok(())
    }

    fn trip_breaker(&self, task: &Task, level: CircuitBreakerLevel, reason: &str) -> Result<(), EngineError> {
        let record = CircuitBreakerRecord {
            id: CircuitBreakerId::new(uuid_like(&task.id, "breaker")),
            task_id: task.id.clone(),
            level,
            triggered_by: "usage".to_string(),
            reason: reason.to_string(),
            triggered_at: Timestamp::now(),
            resolved_at: None,
            resolved_by: None,
        };
        self.store.insert_circuit_breaker(&record)?;
        self.emit(&task.id, "circuit_breaker_tripped", Priority::High);
        Ok(())
    }

    fn fail_task(&self, task: &mut Task, reason: &str) -> Result<(), EngineError> {
        self.store.update_task_status(&task.id, task.status, TaskStatus::Failed)?;
        task.status = TaskStatus::Failed;
        task.failure_reason = Some(reason.to_string());
        task.completed_at = Some(Timestamp::now());
        self.store.save_task(task)?;
        self.emit(&task.id, "task_failed", Priority::High);
        Ok(())
    }

    fn complete_task(&self, task: &mut Task) -> Result<(), EngineError> {
        self.store.update_task_status(&task.id, task.status, TaskStatus::Completed)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Timestamp::now());
        self.store.save_task(task)?;
        self.emit(&task.id, "task_completed", Priority::Normal);
        Ok(())
    }

    /// Commits and pushes, opens a PR, extracts memories from the run's
    /// outputs, and tears down the worktree/sandbox. Runs once per `advance`
    /// call regardless of whether the drive succeeded or failed, satisfying
    /// the requirement that every task leaves no sandbox or worktree behind.
    /// Each step beyond cleanup is best-effort: a failure is logged and the
    /// next step still runs.
    fn finalize_resources(
        &self,
        task: &mut Task,
        handle: &WorkspaceHandle,
        outputs: &HashMap<String, StructuredOutput>,
        succeeded: bool,
    ) {
        if succeeded {
            match self.workspace.commit_and_push(handle, &format!("taskloom: {}", task.title)) {
                Ok(()) => match self.workspace.create_pr(handle, &task.title, &task.description) {
                    Ok(url) => {
                        task.pr_url = Some(url);
                        if let Err(error) = self.store.save_task(task) {
                            log::warn!("failed to persist pr_url for task {}: {error}", task.id);
                        }
                    }
                    Err(error) => log::warn!("create_pr failed for task {}: {error}", task.id),
                },
                Err(error) => log::warn!("commit_and_push failed for task {}: {error}", task.id),
            }

            if let Err(error) = self.extract_memories(task, outputs) {
                log::warn!("memory extraction failed for task {}: {error}", task.id);
            }
        }

        if let Err(error) = self.workspace.cleanup(handle) {
            log::warn!("workspace cleanup failed for task {}: {error}", task.id);
        }
    }

    /// Appends one `issues`-bucket memory per non-passing stage output from
    /// a completed task. A heuristic in place of a model-driven extractor,
    /// since this crate integrates no model provider of its own.
    fn extract_memories(&self, task: &Task, outputs: &HashMap<String, StructuredOutput>) -> Result<(), EngineError> {
        let entries: Vec<MemoryEntry> = outputs
            .iter()
            .filter(|(_, structured)| structured.status != OutputStatus::Pass)
            .map(|(stage_name, structured)| MemoryEntry {
                id: MemoryId::new(uuid_like(&task.id, &format!("memory:{stage_name}"))),
                project_id: task.project_id.clone(),
                bucket: MemoryBucket::Issues,
                content: format!("{stage_name}: {}", structured.summary),
                recorded_at: Timestamp::now(),
            })
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        self.store.append_memories(&task.project_id, entries)?;
        Ok(())
    }

    /// Appends the reviewer's rejection or revision comment (or a
    /// synthesized note when none was given) to the project's `issues`
    /// memory bucket.
    fn record_gate_rejection_memory(
        &self,
        task: &Task,
        stage_name: &str,
        attempt: u32,
        comment: Option<&str>,
    ) -> Result<(), EngineError> {
        let content = comment.map_or_else(
            || format!("{stage_name}: rejected without comment"),
            |comment| format!("{stage_name}: {comment}"),
        );
        let entry = MemoryEntry {
            id: MemoryId::new(uuid_like(&task.id, &format!("gate-rejection:{stage_name}:{attempt}"))),
            project_id: task.project_id.clone(),
            bucket: MemoryBucket::Issues,
            content,
            recorded_at: Timestamp::now(),
        };
        self.store.append_memories(&task.project_id, vec![entry])?;
        Ok(())
    }

    fn emit(&self, task_id: &TaskId, event_type: &str, priority: Priority) {
        if let Err(error) = self.event_sink.emit_update(event_type, task_id.as_str(), priority) {
            log::warn!("event sink delivery failed for {event_type} on {task_id}: {error}");
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn stage_kind_for(stage_name: &str) -> StageKind {
    match stage_name {
        name if name.contains("parse") => StageKind::Parse,
        name if name.contains("spec") => StageKind::Spec,
        name if name.contains("test") => StageKind::Test,
        name if name.contains("review") => StageKind::Review,
        name if name.contains("smoke") => StageKind::Smoke,
        name if name.contains("doc") => StageKind::Doc,
        name if name.contains("signoff") => StageKind::Signoff,
        name if name.contains("approve") => StageKind::Approve,
        _ => StageKind::Code,
    }
}

fn classify_failure(error: &ExecutorError) -> FailureCategory {
    match error {
        ExecutorError::Timeout(_) => FailureCategory::Transient,
        ExecutorError::ToolFailure(_) => FailureCategory::ToolError,
        ExecutorError::Unavailable(_) => FailureCategory::Resource,
        ExecutorError::MaxTurnsExceeded => FailureCategory::Semantic,
    }
}

fn gate_outcome_tag(outcome: &GateOutcome) -> &'static str {
    match outcome {
        GateOutcome::Approved => "approved",
        GateOutcome::Rejected { .. } => "rejected",
        GateOutcome::Revised { .. } => "revised",
        GateOutcome::Timeout => "timeout",
        GateOutcome::Cancelled => "cancelled",
        GateOutcome::ShutdownAborted => "shutdown_aborted",
    }
}

/// A loose truthiness rule for routing-candidate field lookups: present and
/// non-empty/non-zero/non-null counts as truthy.
fn value_is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(flag) => *flag,
        serde_json::Value::Null => false,
        serde_json::Value::String(text) => !text.is_empty(),
        serde_json::Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    }
}

/// Builds a stable, collision-resistant-enough id from a task id and a
/// qualifier, without depending on a random source (engine code must stay
/// deterministic under replay in tests).
fn uuid_like(task_id: &TaskId, qualifier: &str) -> String {
    format!("{task_id}:{qualifier}")
}

/// Correlation id helper shared by call sites that need to thread one
/// sub-operation's events together.
#[must_use]
pub fn new_correlation_id(task_id: &TaskId, qualifier: &str) -> CorrelationId {
    CorrelationId::new(uuid_like(task_id, qualifier))
}

/// Builds an event log entry shell with the fields common to every event
/// type, leaving the caller to fill in request/response bodies.
#[must_use]
pub fn event_log_shell(task_id: &TaskId, event_type: &str, source: EventSource) -> EventLogEntry {
    EventLogEntry {
        id: crate::core::EventLogId::new(uuid_like(task_id, event_type)),
        task_id: task_id.clone(),
        sequence: 0,
        correlation_id: new_correlation_id(task_id, event_type),
        event_type: event_type.to_string(),
        source,
        status: EventStatus::Running,
        request_body: None,
        response_body: None,
        command: None,
        args: Vec::new(),
        workspace: None,
        execution_mode: None,
        duration_ms: None,
        result_text: None,
        output_summary: None,
        output_truncated: false,
        recorded_at: Timestamp::now(),
    }
}

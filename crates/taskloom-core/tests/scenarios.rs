// crates/taskloom-core/tests/scenarios.rs
// ============================================================================
// Module: Task Loom Engine Scenarios
// Description: End-to-end engine tests against in-process fake interfaces.
// Purpose: Exercise poll_once/advance across the happy path, skip conditions,
//          retry, failure handling, circuit breaking, graph redirect bounds,
//          and gate resolution (approval and reject-then-approve).
// Dependencies: taskloom_core
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use taskloom_core::append_bounded;
use taskloom_core::ArtifactRef;
use taskloom_core::CircuitBreakerDecision;
use taskloom_core::CircuitBreakerHook;
use taskloom_core::CircuitBreakerRecord;
use taskloom_core::ConditionOperator;
use taskloom_core::ConditionSpec;
use taskloom_core::ContractError;
use taskloom_core::ContractExtractor;
use taskloom_core::Engine;
use taskloom_core::EngineConfig;
use taskloom_core::EventLogEntry;
use taskloom_core::EventSink;
use taskloom_core::EventSinkError;
use taskloom_core::ExecutionRequest;
use taskloom_core::ExecutionResult;
use taskloom_core::Executor;
use taskloom_core::ExecutorError;
use taskloom_core::FallbackCompressor;
use taskloom_core::Gate;
use taskloom_core::GateDef;
use taskloom_core::GateId;
use taskloom_core::GateKind;
use taskloom_core::GateOutcome;
use taskloom_core::GateStatus;
use taskloom_core::MemoryBucket;
use taskloom_core::MemoryEntry;
use taskloom_core::OnFailure;
use taskloom_core::OutputStatus;
use taskloom_core::Priority;
use taskloom_core::ProjectId;
use taskloom_core::Stage;
use taskloom_core::StageDef;
use taskloom_core::StageId;
use taskloom_core::StageKind;
use taskloom_core::StageStatus;
use taskloom_core::StructuredOutput;
use taskloom_core::Store;
use taskloom_core::StoreError;
use taskloom_core::Task;
use taskloom_core::TaskId;
use taskloom_core::TaskStatus;
use taskloom_core::Template;
use taskloom_core::TemplateId;
use taskloom_core::Timestamp;
use taskloom_core::WorkspaceError;
use taskloom_core::WorkspaceHandle;
use taskloom_core::WorkspaceManager;

// ============================================================================
// SECTION: Fake Store
// ============================================================================

#[derive(Default)]
struct FakeStoreState {
    tasks: Vec<Task>,
    stages: HashMap<StageId, Stage>,
    gates: Vec<Gate>,
    events: Vec<EventLogEntry>,
    sequence: u64,
    breakers: Vec<CircuitBreakerRecord>,
    memories: BTreeMap<ProjectId, BTreeMap<MemoryBucket, Vec<MemoryEntry>>>,
}

struct FakeStore(Mutex<FakeStoreState>);

impl FakeStore {
    fn new(task: Task) -> Self {
        Self(Mutex::new(FakeStoreState { tasks: vec![task], ..FakeStoreState::default() }))
    }

    fn task(&self, id: &TaskId) -> Task {
        self.0.lock().unwrap().tasks.iter().find(|t| &t.id == id).unwrap().clone()
    }

    fn stage_named(&self, name: &str) -> Stage {
        self.0.lock().unwrap().stages.values().find(|s| s.name == name).unwrap().clone()
    }

    fn gates(&self) -> Vec<Gate> {
        self.0.lock().unwrap().gates.clone()
    }

    fn pending_gate(&self) -> Option<Gate> {
        self.gates().into_iter().find(|g| g.status == GateStatus::Pending)
    }

    fn breakers(&self) -> Vec<CircuitBreakerRecord> {
        self.0.lock().unwrap().breakers.clone()
    }

    fn memories_for(&self, project_id: &ProjectId) -> BTreeMap<MemoryBucket, Vec<MemoryEntry>> {
        self.0.lock().unwrap().memories.get(project_id).cloned().unwrap_or_default()
    }
}

impl Store for FakeStore {
    fn claim_oldest_pending(&self) -> Result<Option<Task>, StoreError> {
        let inner = self.0.lock().unwrap();
        Ok(inner.tasks.iter().find(|t| t.status == TaskStatus::Pending).cloned())
    }

    fn recover_stale(&self, _stale_after_secs: i64) -> Result<Vec<TaskId>, StoreError> {
        Ok(Vec::new())
    }

    fn update_task_status(&self, task_id: &TaskId, expected: TaskStatus, next: TaskStatus) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if task.status != expected {
            return Err(StoreError::Conflict(format!("expected {expected:?}, found {:?}", task.status)));
        }
        task.status = next;
        Ok(())
    }

    fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let existing = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.to_string()))?;
        *existing = task.clone();
        Ok(())
    }

    fn upsert_stage(&self, stage: &Stage) -> Result<(), StoreError> {
        self.0.lock().unwrap().stages.insert(stage.id.clone(), stage.clone());
        Ok(())
    }

    fn update_stage_status(&self, stage_id: &StageId, status: StageStatus) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let stage = inner.stages.get_mut(stage_id).ok_or_else(|| StoreError::NotFound(stage_id.to_string()))?;
        stage.status = status;
        Ok(())
    }

    fn set_stage_output(&self, stage_id: &StageId, output_text: &str) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let stage = inner.stages.get_mut(stage_id).ok_or_else(|| StoreError::NotFound(stage_id.to_string()))?;
        stage.output_text = Some(output_text.to_string());
        Ok(())
    }

    fn set_stage_structured(&self, stage_id: &StageId, structured: &StructuredOutput) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let stage = inner.stages.get_mut(stage_id).ok_or_else(|| StoreError::NotFound(stage_id.to_string()))?;
        stage.structured_output = Some(structured.clone());
        Ok(())
    }

    fn create_gate(&self, gate: &Gate) -> Result<(), StoreError> {
        self.0.lock().unwrap().gates.push(gate.clone());
        Ok(())
    }

    fn refresh_gate(&self, gate_id: &GateId, outcome: GateOutcome) -> Result<Gate, StoreError> {
        let mut inner = self.0.lock().unwrap();
        let gate = inner
            .gates
            .iter_mut()
            .find(|g| &g.id == gate_id)
            .ok_or_else(|| StoreError::NotFound(gate_id.to_string()))?;
        gate.status = match &outcome {
            GateOutcome::Approved => GateStatus::Approved,
            GateOutcome::Rejected { .. } => GateStatus::Rejected,
            GateOutcome::Revised { .. } => GateStatus::Revised,
            GateOutcome::Timeout | GateOutcome::Cancelled | GateOutcome::ShutdownAborted => gate.status,
        };
        gate.outcome = Some(outcome);
        gate.resolved_at = Some(Timestamp::now());
        Ok(gate.clone())
    }

    fn list_pending_gates(&self) -> Result<Vec<Gate>, StoreError> {
        Ok(self.0.lock().unwrap().gates.iter().filter(|g| g.status == GateStatus::Pending).cloned().collect())
    }

    fn append_event_log(&self, mut entry: EventLogEntry) -> Result<EventLogEntry, StoreError> {
        let mut inner = self.0.lock().unwrap();
        inner.sequence += 1;
        entry.sequence = inner.sequence;
        inner.events.push(entry.clone());
        Ok(entry)
    }

    fn insert_circuit_breaker(&self, record: &CircuitBreakerRecord) -> Result<(), StoreError> {
        self.0.lock().unwrap().breakers.push(record.clone());
        Ok(())
    }

    fn load_memories(&self, project_id: &ProjectId) -> Result<BTreeMap<MemoryBucket, Vec<MemoryEntry>>, StoreError> {
        Ok(self.0.lock().unwrap().memories.get(project_id).cloned().unwrap_or_default())
    }

    fn append_memories(&self, project_id: &ProjectId, entries: Vec<MemoryEntry>) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let buckets = inner.memories.entry(project_id.clone()).or_default();
        for entry in entries {
            let bucket_entries = buckets.entry(entry.bucket).or_default();
            append_bounded(bucket_entries, entry, taskloom_core::DEFAULT_BUCKET_CAPACITY);
        }
        Ok(())
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        self.0
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| &t.id == task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    fn get_gate(&self, gate_id: &GateId) -> Result<Gate, StoreError> {
        self.0
            .lock()
            .unwrap()
            .gates
            .iter()
            .find(|g| &g.id == gate_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(gate_id.to_string()))
    }
}

// ============================================================================
// SECTION: Fake Event Sink
// ============================================================================

#[derive(Default)]
struct FakeEventSink(Mutex<Vec<(String, String, Priority)>>);

impl EventSink for FakeEventSink {
    fn emit_create(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError> {
        self.0.lock().unwrap().push((event_type.to_string(), payload.to_string(), priority));
        Ok(())
    }

    fn emit_update(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError> {
        self.0.lock().unwrap().push((event_type.to_string(), payload.to_string(), priority));
        Ok(())
    }

    fn drain(&self) -> Result<(), EventSinkError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Fake Executor
// ============================================================================

/// Dispatches canned results keyed by `ExecutionRequest::instruction`.
/// Test templates set each stage's instruction text to its own stage name so
/// the fake can route deterministically without inspecting engine internals.
/// Every request is also recorded so tests can inspect retry/gate-rejection
/// context carried into a re-execution.
#[derive(Default)]
struct FakeExecutor {
    responses: Mutex<HashMap<String, VecDeque<Result<ExecutionResult, ExecutorError>>>>,
    calls: Mutex<HashMap<String, u32>>,
    requests: Mutex<HashMap<String, Vec<ExecutionRequest>>>,
}

impl FakeExecutor {
    fn queue(&self, stage_name: &str, result: Result<ExecutionResult, ExecutorError>) {
        self.responses.lock().unwrap().entry(stage_name.to_string()).or_default().push_back(result);
    }

    fn call_count(&self, stage_name: &str) -> u32 {
        self.calls.lock().unwrap().get(stage_name).copied().unwrap_or(0)
    }

    fn requests_for(&self, stage_name: &str) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().get(stage_name).cloned().unwrap_or_default()
    }
}

impl Executor for FakeExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        let stage_name = request.instruction.clone();
        *self.calls.lock().unwrap().entry(stage_name.clone()).or_insert(0) += 1;
        self.requests.lock().unwrap().entry(stage_name.clone()).or_default().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(&stage_name).unwrap_or_else(|| panic!("no queued response for {stage_name}"));
        queue.pop_front().unwrap_or_else(|| panic!("exhausted queued responses for {stage_name}"))
    }
}

// ============================================================================
// SECTION: Fake Workspace Manager
// ============================================================================

struct FakeWorkspaceManager;

impl WorkspaceManager for FakeWorkspaceManager {
    fn setup_worktree(&self, task_id: &TaskId, _base_branch: &str) -> Result<WorkspaceHandle, WorkspaceError> {
        Ok(WorkspaceHandle {
            worktree_id: taskloom_core::WorktreeId::new(format!("wt-{task_id}")),
            path: format!("/tmp/{task_id}"),
            sandbox_id: None,
            branch_name: format!("task/{task_id}"),
        })
    }

    fn setup_sandbox(&self, handle: &WorkspaceHandle) -> Result<WorkspaceHandle, WorkspaceError> {
        Ok(handle.clone())
    }

    fn commit_and_push(&self, _handle: &WorkspaceHandle, _message: &str) -> Result<(), WorkspaceError> {
        Ok(())
    }

    fn create_pr(&self, _handle: &WorkspaceHandle, _title: &str, _body: &str) -> Result<String, WorkspaceError> {
        Ok("https://example.invalid/pr/1".to_string())
    }

    fn cleanup(&self, _handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Fake Circuit Breaker
// ============================================================================

struct FakeCircuitBreaker {
    halt_after_cost_cents: Option<u64>,
}

impl FakeCircuitBreaker {
    fn never_trips() -> Self {
        Self { halt_after_cost_cents: None }
    }

    fn halting_at(threshold: u64) -> Self {
        Self { halt_after_cost_cents: Some(threshold) }
    }
}

impl CircuitBreakerHook for FakeCircuitBreaker {
    fn check(&self, _total_tokens: u64, total_cost_cents: u64, _stage_count: u32) -> CircuitBreakerDecision {
        match self.halt_after_cost_cents {
            Some(threshold) if total_cost_cents >= threshold => CircuitBreakerDecision::Halt,
            _ => CircuitBreakerDecision::Continue,
        }
    }
}

// ============================================================================
// SECTION: Fake Contract Extractor
// ============================================================================

/// Parses the test convention `"status|confidence|summary[|k=v,k2=v2]"` out
/// of a stage's raw output text. `taskloom-core` cannot dev-depend on
/// `taskloom-contract` (that crate already depends on `taskloom-core`), so
/// this stands in for it here.
struct FakeContractExtractor;

impl ContractExtractor for FakeContractExtractor {
    fn extract(&self, kind: StageKind, output_text: &str) -> Result<StructuredOutput, ContractError> {
        let mut parts = output_text.splitn(4, '|');
        let status = match parts.next() {
            Some("pass") => OutputStatus::Pass,
            Some("fail") => OutputStatus::Fail,
            Some("partial") => OutputStatus::Partial,
            other => {
                return Err(ContractError::Malformed {
                    kind,
                    reason: format!("unrecognized status {other:?}"),
                });
            }
        };
        let confidence = parts.next().and_then(|text| if text == "-" { None } else { text.parse::<f64>().ok() });
        let summary = parts.next().unwrap_or_default().to_string();
        let mut fields = BTreeMap::new();
        if let Some(field_spec) = parts.next() {
            for pair in field_spec.split(',').filter(|p| !p.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else { continue };
                let parsed = match value {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => value.parse::<f64>().map(Value::from).unwrap_or_else(|_| Value::String(value.to_string())),
                };
                fields.insert(key.to_string(), parsed);
            }
        }
        Ok(StructuredOutput { kind, summary, status, confidence, artifacts: Vec::<ArtifactRef>::new(), fields })
    }
}

// ============================================================================
// SECTION: Template Builders
// ============================================================================

fn stage_def(name: &str, order: u32, depends_on: &[&str]) -> StageDef {
    StageDef {
        name: name.to_string(),
        agent_role: "implementer".to_string(),
        order,
        model_override: None,
        instruction: name.to_string(),
        max_turns: 10,
        timeout: taskloom_core::Seconds::new(60),
        context_from: Vec::new(),
        condition: None,
        evaluator: None,
        max_retries: 0,
        depends_on: depends_on.iter().map(ToString::to_string).collect(),
        on_failure: OnFailure::FailTask,
        max_executions: 3,
        routing: None,
    }
}

fn template_with(stages: Vec<StageDef>, gates: Vec<GateDef>) -> Template {
    Template { id: TemplateId::new("tpl"), version: 1, parent_id: None, name: "pipeline".to_string(), stages, gates }
}

fn new_task() -> Task {
    Task {
        id: TaskId::new("task-1"),
        external_correlation_id: None,
        title: "scenario task".to_string(),
        description: String::new(),
        status: TaskStatus::Pending,
        total_tokens: 0,
        total_cost_cents: 0,
        template_id: TemplateId::new("tpl"),
        template_version: 1,
        project_id: ProjectId::new("proj-1"),
        current_plan: None,
        routing_decisions: Vec::new(),
        branch_name: None,
        pr_url: None,
        created_at: Timestamp::now(),
        completed_at: None,
        failure_reason: None,
    }
}

fn ok_result(output_text: &str) -> Result<ExecutionResult, ExecutorError> {
    Ok(ExecutionResult { output_text: output_text.to_string(), tokens_used: 10, turns_used: 1, cost_cents: 5 })
}

fn tokens_result(output_text: &str, tokens: u64) -> Result<ExecutionResult, ExecutorError> {
    Ok(ExecutionResult { output_text: output_text.to_string(), tokens_used: tokens, turns_used: 1, cost_cents: 5 })
}

#[allow(clippy::too_many_arguments)]
fn build_engine(
    store: Arc<FakeStore>,
    events: Arc<FakeEventSink>,
    executor: Arc<FakeExecutor>,
    circuit_breaker: Arc<FakeCircuitBreaker>,
) -> Engine {
    build_engine_with_config(store, events, executor, circuit_breaker, EngineConfig::default())
}

#[allow(clippy::too_many_arguments)]
fn build_engine_with_config(
    store: Arc<FakeStore>,
    events: Arc<FakeEventSink>,
    executor: Arc<FakeExecutor>,
    circuit_breaker: Arc<FakeCircuitBreaker>,
    config: EngineConfig,
) -> Engine {
    Engine::new(
        store,
        events,
        executor,
        Arc::new(FakeWorkspaceManager),
        Arc::new(FallbackCompressor),
        Arc::new(FakeContractExtractor),
        circuit_breaker,
        config,
    )
}

/// A config tuned for gate tests: polls as fast as possible instead of
/// sleeping a real 30s between checks.
fn fast_polling_config() -> EngineConfig {
    EngineConfig { gate_poll_interval_secs: 0, ..EngineConfig::default() }
}

// ============================================================================
// SECTION: Happy path, skip, retry, failure handling
// ============================================================================

#[test]
fn linear_pipeline_with_no_gates_completes() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("a", ok_result("pass|0.9|a done"));
    executor.queue("b", ok_result("pass|0.9|b done"));
    executor.queue("c", ok_result("pass|0.9|c done"));

    let template = template_with(vec![stage_def("a", 0, &[]), stage_def("b", 1, &[]), stage_def("c", 2, &[])], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
    );

    let claimed = engine.poll_once(|_task| Ok(template.clone())).unwrap();
    assert!(claimed);

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_tokens, 30);
    assert_eq!(executor.call_count("a"), 1);
    assert_eq!(executor.call_count("b"), 1);
    assert_eq!(executor.call_count("c"), 1);
}

#[test]
fn skip_condition_bypasses_a_stage() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("a", ok_result("pass|0.9|a done|skip_b=true"));
    executor.queue("c", ok_result("pass|0.9|c done"));

    let mut b = stage_def("b", 1, &[]);
    b.condition = Some(ConditionSpec {
        source_stage: "a".to_string(),
        field: "skip_b".to_string(),
        operator: ConditionOperator::Equals,
        value: Some("true".to_string()),
    });

    let template = template_with(vec![stage_def("a", 0, &[]), b, stage_def("c", 2, &[])], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
    );

    engine.poll_once(|_task| Ok(template.clone())).unwrap();

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(executor.call_count("b"), 0, "skipped stage must never reach the executor");
    assert_eq!(executor.call_count("c"), 1, "dependents of a skipped stage still run");
}

#[test]
fn transient_failure_retries_then_succeeds() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("a", ok_result("pass|0.9|a done"));
    executor.queue("b", Err(ExecutorError::Timeout(5)));
    executor.queue("b", ok_result("pass|0.9|b done"));

    let mut b = stage_def("b", 1, &[]);
    b.max_retries = 1;
    let template = template_with(vec![stage_def("a", 0, &[]), b], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
    );

    engine.poll_once(|_task| Ok(template.clone())).unwrap();

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(executor.call_count("b"), 2);
}

#[test]
fn failing_stage_fails_the_task_when_configured_to() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("a", ok_result("pass|0.9|a done"));
    executor.queue("b", Err(ExecutorError::ToolFailure("broken tool".to_string())));

    let mut b = stage_def("b", 1, &[]);
    b.max_retries = 0;
    b.on_failure = OnFailure::FailTask;
    let template = template_with(vec![stage_def("a", 0, &[]), b], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
    );

    engine.poll_once(|_task| Ok(template.clone())).unwrap();

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.failure_reason.is_some_and(|reason| reason.contains('b')));
}

// ============================================================================
// SECTION: Circuit breaker ordering
// ============================================================================

#[test]
fn circuit_breaker_halts_after_completing_the_triggering_stage() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("parse", ok_result("pass|0.9|parsed"));

    let template = template_with(vec![stage_def("parse", 0, &[]), stage_def("coding", 1, &[])], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::halting_at(5)),
    );

    let claimed = engine.poll_once(|_task| Ok(template.clone())).unwrap();
    assert!(claimed);

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Failed, "the halt must still fail the task outright");
    assert!(task.failure_reason.is_some_and(|reason| reason.contains("parse")));
    assert_eq!(executor.call_count("coding"), 0, "coding stays pending, never dispatched");

    let stage = store.stage_named("parse");
    assert_eq!(stage.status, StageStatus::Completed, "the triggering stage keeps its completed status");

    let breakers = store.breakers();
    assert_eq!(breakers.len(), 1);
    assert!(breakers[0].is_open());
    assert!(breakers[0].reason.contains("tokens"));
}

// ============================================================================
// SECTION: Graph redirect bounded by max_executions
// ============================================================================

#[test]
fn graph_redirect_loop_bounds_by_max_executions_then_fails() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("coding", ok_result("pass|0.9|coding v1"));
    executor.queue("test", Err(ExecutorError::ToolFailure("assertion failed".to_string())));
    executor.queue("coding", ok_result("pass|0.9|coding v2"));
    executor.queue("test", Err(ExecutorError::ToolFailure("assertion failed again".to_string())));

    let mut coding = stage_def("coding", 0, &[]);
    coding.max_executions = 2;

    let mut test = stage_def("test", 1, &["coding"]);
    test.max_retries = 0;
    test.max_executions = 2;
    test.on_failure = OnFailure::RedirectTo { stage: "coding".to_string() };

    let template = template_with(vec![coding, test], vec![]);

    let engine = build_engine(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
    );

    engine.poll_once(|_task| Ok(template.clone())).unwrap();

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.failure_reason.is_some_and(|reason| reason.contains("exceeded")));
    assert_eq!(executor.call_count("coding"), 2, "coding executes exactly up to its own budget");
    assert_eq!(executor.call_count("test"), 2, "test executes exactly up to its own budget");
}

// ============================================================================
// SECTION: Gate resolution
// ============================================================================

#[test]
fn gate_approved_lets_the_task_complete_with_full_token_total() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("parse", tokens_result("pass|0.9|parsed", 50));
    executor.queue("coding", tokens_result("pass|0.9|coded", 50));

    let template = template_with(
        vec![stage_def("parse", 0, &[]), stage_def("coding", 1, &[])],
        vec![GateDef { after_stage: "parse".to_string(), kind: GateKind::HumanApprove, max_retries: 1 }],
    );

    let engine = build_engine_with_config(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
        fast_polling_config(),
    );

    let resolver_store = Arc::clone(&store);
    let resolver = std::thread::spawn(move || loop {
        if let Some(gate) = resolver_store.pending_gate() {
            resolver_store.refresh_gate(&gate.id, GateOutcome::Approved).unwrap();
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    });

    let claimed = engine.poll_once(|_task| Ok(template.clone())).unwrap();
    resolver.join().unwrap();
    assert!(claimed);

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_tokens, 100);
    assert_eq!(executor.call_count("coding"), 1);

    let gates = store.gates();
    assert_eq!(gates.len(), 1);
    assert_eq!(gates[0].status, GateStatus::Approved);
}

#[test]
fn gate_rejected_then_approved_resumes_with_rejection_context_and_retry_counter() {
    let store = Arc::new(FakeStore::new(new_task()));
    let executor = Arc::new(FakeExecutor::default());
    executor.queue("spec", ok_result("pass|0.9|spec v1"));
    executor.queue("spec", ok_result("pass|0.9|spec v2"));

    let mut spec = stage_def("spec", 0, &[]);
    spec.max_executions = 5;
    let template = template_with(
        vec![spec],
        vec![GateDef { after_stage: "spec".to_string(), kind: GateKind::HumanApprove, max_retries: 2 }],
    );

    let engine = build_engine_with_config(
        Arc::clone(&store),
        Arc::new(FakeEventSink::default()),
        Arc::clone(&executor),
        Arc::new(FakeCircuitBreaker::never_trips()),
        fast_polling_config(),
    );

    let resolver_store = Arc::clone(&store);
    let resolver = std::thread::spawn(move || {
        loop {
            if let Some(gate) = resolver_store.pending_gate() {
                resolver_store
                    .refresh_gate(&gate.id, GateOutcome::Rejected { comment: Some("fix X".to_string()), retry_count: 0 })
                    .unwrap();
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        loop {
            if let Some(gate) = resolver_store.gates().into_iter().find(|g| g.status == GateStatus::Pending && g.retry_count == 1)
            {
                resolver_store.refresh_gate(&gate.id, GateOutcome::Approved).unwrap();
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let claimed = engine.poll_once(|_task| Ok(template.clone())).unwrap();
    resolver.join().unwrap();
    assert!(claimed);

    let task = store.task(&TaskId::new("task-1"));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(executor.call_count("spec"), 2);

    let requests = executor.requests_for("spec");
    assert_eq!(requests.len(), 2);
    let rejection = requests[1].gate_rejection_context.as_ref().expect("second invocation carries rejection context");
    assert_eq!(rejection.comment.as_deref(), Some("fix X"));
    assert_eq!(rejection.retry, "1/2");

    let memories = store.memories_for(&ProjectId::new("proj-1"));
    assert!(memories.get(&MemoryBucket::Issues).is_some_and(|entries| entries.iter().any(|e| e.content.contains("fix X"))));
}

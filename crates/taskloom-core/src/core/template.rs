// crates/taskloom-core/src/core/template.rs
// ============================================================================
// Module: Task Loom Template
// Description: Stage/gate blueprints a task is instantiated from.
// Purpose: Describe an ordered-or-graph pipeline, its gates, and per-stage policy.
// Dependencies: crate::core::ids, serde
// ============================================================================

//! ## Overview
//! A template is the declarative blueprint the engine consumes when starting
//! a task: an ordered or dependency-graph list of `StageDef`s, plus the
//! `GateDef`s that interleave human approval.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::TemplateId;
use crate::core::time::Seconds;

// ============================================================================
// SECTION: Condition Spec
// ============================================================================

/// Comparison operator used by a stage's skip condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

/// A condition evaluated against a prior stage's structured output to decide
/// whether a stage should be skipped.
///
/// # Invariants
/// - `source_stage` must name a stage that precedes this one in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// The stage whose structured output is inspected.
    pub source_stage: String,
    /// Field path within that stage's structured output.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Comparison value, compared as a string unless the operator is
    /// `Exists` (in which case this is ignored).
    pub value: Option<String>,
}

// ============================================================================
// SECTION: Routing Config
// ============================================================================

/// Dynamic routing configuration attached to a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Candidate target stage names the router may choose between.
    pub candidates: Vec<String>,
    /// Role used to prompt the routing decision.
    pub router_role: String,
}

// ============================================================================
// SECTION: On Failure
// ============================================================================

/// What happens to the graph driver when a stage fails terminally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnFailure {
    /// Fail the whole task.
    FailTask,
    /// Redirect execution to another stage, resetting it to `pending` and
    /// discarding any prior output it held.
    RedirectTo { stage: String },
}

// ============================================================================
// SECTION: Stage Definition
// ============================================================================

/// Declarative definition of one stage within a template.
///
/// # Invariants
/// - `name` is unique within a template.
/// - `depends_on` entries name other stages within the same template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    /// Stage name, unique within the template.
    pub name: String,
    /// Agent role delegated to.
    pub agent_role: String,
    /// Linear order index, used when `depends_on` is empty.
    pub order: u32,
    /// Optional model override passed to the executor.
    pub model_override: Option<String>,
    /// Instruction template rendered for the executor.
    pub instruction: String,
    /// Maximum agent turns allowed for one execution.
    pub max_turns: u32,
    /// Wall-clock timeout for one execution.
    pub timeout: Seconds,
    /// Names of stages whose compressed output is included as context.
    /// Overrides the default sliding-window rule when non-empty.
    pub context_from: Vec<String>,
    /// Optional skip condition.
    pub condition: Option<ConditionSpec>,
    /// Optional contract-extraction evaluator name/kind.
    pub evaluator: Option<String>,
    /// Maximum retries on failure.
    pub max_retries: u32,
    /// Explicit dependency stage names (graph mode).
    pub depends_on: Vec<String>,
    /// Behavior when this stage fails terminally.
    pub on_failure: OnFailure,
    /// Maximum number of times this stage may execute, across retries and
    /// redirect loops.
    pub max_executions: u32,
    /// Optional dynamic routing configuration.
    pub routing: Option<RoutingConfig>,
}

// ============================================================================
// SECTION: Gate Definition
// ============================================================================

/// Kind of approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Requires explicit human approval before continuing.
    HumanApprove,
    /// Requires human review of the task's current plan.
    PlanReview,
    /// Requires human review when confidence is below threshold.
    ConfidenceReview,
}

/// Declarative definition of a gate interleaved after a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDef {
    /// Name of the stage this gate follows.
    pub after_stage: String,
    /// Gate kind.
    pub kind: GateKind,
    /// Maximum number of reject-then-retry cycles before failing the task.
    pub max_retries: u32,
}

// ============================================================================
// SECTION: Template
// ============================================================================

/// A versioned blueprint a task is instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Opaque template identifier.
    pub id: TemplateId,
    /// Monotonically increasing version number.
    pub version: u32,
    /// Previous version this template was derived from, if any.
    pub parent_id: Option<TemplateId>,
    /// Human-readable name.
    pub name: String,
    /// Stage definitions.
    pub stages: Vec<StageDef>,
    /// Gate definitions.
    pub gates: Vec<GateDef>,
}

impl Template {
    /// Returns the `StageDef` with the given name, if present.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Returns the `GateDef`s that follow the named stage.
    pub fn gates_after(&self, stage_name: &str) -> impl Iterator<Item = &GateDef> {
        self.gates.iter().filter(move |gate| gate.after_stage == stage_name)
    }
}

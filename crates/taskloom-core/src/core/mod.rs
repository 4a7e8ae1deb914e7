// crates/taskloom-core/src/core/mod.rs
// ============================================================================
// Module: Task Loom Core Data Model
// Description: Entity definitions shared across the engine and its interfaces.
// Purpose: Gather the task/stage/template/gate/event/memory/breaker types.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! The core data model has no dependency on storage, execution, or transport
//! concerns; it is plain data plus the small amount of logic that is an
//! intrinsic property of the entity itself (e.g. a task's usage counters
//! never decreasing).

pub mod circuit_breaker;
pub mod event;
pub mod gate;
pub mod ids;
pub mod memory;
pub mod stage;
pub mod structured;
pub mod task;
pub mod template;
pub mod time;

pub use circuit_breaker::CircuitBreakerLevel;
pub use circuit_breaker::CircuitBreakerRecord;
pub use event::EventLogEntry;
pub use event::EventSource;
pub use event::EventStatus;
pub use event::OUTPUT_TRUNCATION_BYTES;
pub use event::truncate_output;
pub use gate::Gate;
pub use gate::GateOutcome;
pub use gate::GateStatus;
pub use ids::CircuitBreakerId;
pub use ids::CorrelationId;
pub use ids::EventLogId;
pub use ids::GateId;
pub use ids::MemoryId;
pub use ids::ProjectId;
pub use ids::SandboxId;
pub use ids::StageId;
pub use ids::TaskId;
pub use ids::TemplateId;
pub use ids::WorktreeId;
pub use memory::DEFAULT_BUCKET_CAPACITY;
pub use memory::MemoryBucket;
pub use memory::MemoryEntry;
pub use memory::append_bounded;
pub use stage::FailureCategory;
pub use stage::Stage;
pub use stage::StageStatus;
pub use structured::ArtifactRef;
pub use structured::OutputStatus;
pub use structured::StageKind;
pub use structured::StructuredOutput;
pub use task::RoutingDecision;
pub use task::Task;
pub use task::TaskStatus;
pub use template::ConditionOperator;
pub use template::ConditionSpec;
pub use template::GateDef;
pub use template::GateKind;
pub use template::OnFailure;
pub use template::RoutingConfig;
pub use template::StageDef;
pub use template::Template;
pub use time::Seconds;
pub use time::Timestamp;

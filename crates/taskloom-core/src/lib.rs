// crates/taskloom-core/src/lib.rs
// ============================================================================
// Module: Task Loom Core Library
// Description: Public API surface for the task orchestration engine core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Task Loom core provides the task/stage/gate state machine, stage-output
//! compression, contract extraction, graph scheduling, and the engine that
//! drives them. It is backend-agnostic and integrates through explicit
//! interfaces rather than embedding a storage driver, RPC transport, or
//! executor protocol.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CircuitBreakerDecision;
pub use interfaces::CircuitBreakerHook;
pub use interfaces::EventSink;
pub use interfaces::EventSinkError;
pub use interfaces::ExecutionRequest;
pub use interfaces::ExecutionResult;
pub use interfaces::Executor;
pub use interfaces::ExecutorError;
pub use interfaces::GateRejectionContext;
pub use interfaces::Priority;
pub use interfaces::RetryContext;
pub use interfaces::Store;
pub use interfaces::StoreError;
pub use interfaces::WorkspaceHandle;
pub use interfaces::WorkspaceManager;
pub use interfaces::WorkspaceError;
pub use runtime::CompressionLevel;
pub use runtime::Compressor;
pub use runtime::CompressionResult;
pub use runtime::CompressorError;
pub use runtime::ContractError;
pub use runtime::ContractExtractor;
pub use runtime::Engine;
pub use runtime::EngineConfig;
pub use runtime::EngineError;
pub use runtime::FallbackCompressor;
pub use runtime::Graph;
pub use runtime::GraphError;
pub use runtime::ReadySet;
pub use runtime::TriState;

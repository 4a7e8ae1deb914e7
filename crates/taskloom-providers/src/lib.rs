// crates/taskloom-providers/src/lib.rs
// ============================================================================
// Module: Task Loom Providers
// Description: `Executor` implementations that delegate stage work to an
//              external agent process over HTTP.
// Purpose: Keep the wire protocol to the agent executor isolated from the
//          engine's scheduling logic.
// Dependencies: reqwest (blocking), taskloom-core
// ============================================================================

//! ## Overview
//! The engine's concurrency model is synchronous: one OS thread per polling
//! worker, calling into `Executor::execute` and blocking until it returns.
//! `HttpExecutor` therefore uses `reqwest::blocking` rather than an async
//! client, matching the executor's synchronous request/response wire protocol.

pub mod http;

pub use http::HttpExecutor;
pub use http::HttpExecutorConfig;

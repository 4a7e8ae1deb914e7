// crates/taskloom-store-sqlite/src/lib.rs
// ============================================================================
// Module: Task Loom SQLite Store
// Description: Durable `Store` implementation backed by SQLite WAL.
// Purpose: Give the engine a process-restart-durable backing store without
//          requiring an external database service.
// Dependencies: rusqlite, taskloom-core
// ============================================================================

//! ## Overview
//! A single writer connection guarded by a mutex serializes all mutating
//! statements; reads share the same connection since SQLite's WAL mode lets
//! readers proceed concurrently with the one writer. A dedicated
//! writer-gateway thread isn't needed here since the engine already
//! serializes mutating calls through one `Store` instance per process.

pub mod store;

pub use store::MAX_STATE_BYTES;
pub use store::SqliteStore;
pub use store::SqliteStoreError;

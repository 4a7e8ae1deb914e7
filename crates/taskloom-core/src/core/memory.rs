// crates/taskloom-core/src/core/memory.rs
// ============================================================================
// Module: Task Loom Memory
// Description: Cross-task project memory buckets with bounded oldest-drop capacity.
// Purpose: Retain durable, bucketed lessons across tasks within a project.
// Dependencies: crate::core::{ids, time}, serde
// ============================================================================

//! ## Overview
//! Memories are short, bucketed notes a project accumulates over its
//! lifetime (conventions, architecture, patterns, known issues). Each bucket
//! is capped; once full, appending drops the oldest entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::MemoryId;
use crate::core::ids::ProjectId;
use crate::core::time::Timestamp;

/// Default per-bucket capacity, used when a project has no explicit override.
pub const DEFAULT_BUCKET_CAPACITY: usize = 50;

// ============================================================================
// SECTION: Memory Bucket
// ============================================================================

/// The bucket a memory entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBucket {
    /// Project-wide coding conventions.
    Conventions,
    /// Architectural decisions and constraints.
    Architecture,
    /// Recurring implementation patterns.
    Patterns,
    /// Known issues and their workarounds.
    Issues,
}

// ============================================================================
// SECTION: Memory Entry
// ============================================================================

/// One durable note within a project's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Opaque memory identifier.
    pub id: MemoryId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Bucket this entry belongs to.
    pub bucket: MemoryBucket,
    /// Free-text content.
    pub content: String,
    /// When the entry was recorded.
    pub recorded_at: Timestamp,
}

// ============================================================================
// SECTION: Bounded Append
// ============================================================================

/// Appends `entry` to `bucket_entries`, evicting the oldest entry first if
/// the bucket is already at `capacity`.
///
/// # Invariants
/// `bucket_entries` is assumed ordered oldest-first; the evicted element, if
/// any, is always index `0`.
pub fn append_bounded(bucket_entries: &mut Vec<MemoryEntry>, entry: MemoryEntry, capacity: usize) {
    if bucket_entries.len() >= capacity && !bucket_entries.is_empty() {
        bucket_entries.remove(0);
    }
    bucket_entries.push(entry);
}

// crates/taskloom-core/src/core/ids.rs
// ============================================================================
// Module: Task Loom Identifiers
// Description: Canonical opaque identifiers for tasks, stages, gates and logs.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the opaque identifiers threaded through the engine.
//! All identifiers are caller-supplied strings (typically produced by the
//! `Store` on insert); the core never derives identity from content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(TaskId, "Opaque task identifier.");
opaque_id!(StageId, "Opaque stage identifier, scoped to a task.");
opaque_id!(TemplateId, "Opaque template identifier.");
opaque_id!(GateId, "Opaque gate identifier.");
opaque_id!(ProjectId, "Opaque project identifier.");
opaque_id!(EventLogId, "Opaque event log row identifier.");
opaque_id!(MemoryId, "Opaque memory entry identifier.");
opaque_id!(CircuitBreakerId, "Opaque circuit breaker record identifier.");
opaque_id!(CorrelationId, "Correlation identifier threading one sub-operation's events together.");
opaque_id!(WorktreeId, "Opaque worktree handle identifier.");
opaque_id!(SandboxId, "Opaque sandbox container identifier.");

// crates/taskloom-core/src/core/time.rs
// ============================================================================
// Module: Task Loom Time Model
// Description: Wall-clock timestamp and duration helpers used across records.
// Purpose: Give every durable record a single, serializable notion of "now".
// Dependencies: time, serde
// ============================================================================

//! ## Overview
//! Unlike a deterministic replay engine, this orchestrator waits on humans for
//! hours at a time and must reason about real wall-clock deadlines (gate
//! timeouts, per-stage timeouts, poll cadences). `Timestamp` wraps
//! `time::OffsetDateTime` rather than a logical clock so that persisted
//! records carry real time across process restarts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in task, stage, gate and event records.
///
/// # Invariants
/// - Always UTC.
/// - Serializes as an RFC 3339 string for portability across stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an explicit `OffsetDateTime` value.
    #[must_use]
    pub const fn from_offset_date_time(value: OffsetDateTime) -> Self {
        Self(value)
    }

    /// Returns the inner `OffsetDateTime`.
    #[must_use]
    pub const fn inner(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the number of whole seconds elapsed since `self`.
    #[must_use]
    pub fn elapsed_seconds(&self, now: Self) -> i64 {
        (now.0 - self.0).whole_seconds()
    }

    /// Returns a timestamp `secs` seconds after `self`, used to compute gate
    /// and stage deadlines.
    #[must_use]
    pub fn plus_seconds(self, secs: i64) -> Self {
        Self(self.0 + time::Duration::seconds(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}", self.0.unix_timestamp()),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let text = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let value = OffsetDateTime::parse(&text, &Rfc3339).map_err(serde::de::Error::custom)?;
        Ok(Self(value))
    }
}

/// A bounded wait duration expressed in whole seconds.
///
/// # Invariants
/// - Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seconds(pub u64);

impl Seconds {
    /// Creates a new `Seconds` value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the duration as a `std::time::Duration`.
    #[must_use]
    pub const fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0)
    }
}

// crates/taskloom-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: `Store` trait implementation using one WAL-mode connection.
// Purpose: Persist tasks, stages, gates, event log, circuit breakers, and
//          memory as canonical JSON snapshots.
// Dependencies: rusqlite, serde_json, taskloom-core, thiserror
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use taskloom_core::CircuitBreakerRecord;
use taskloom_core::EventLogEntry;
use taskloom_core::Gate;
use taskloom_core::GateOutcome;
use taskloom_core::GateStatus;
use taskloom_core::MemoryBucket;
use taskloom_core::MemoryEntry;
use taskloom_core::ProjectId;
use taskloom_core::Stage;
use taskloom_core::StageId;
use taskloom_core::StageStatus;
use taskloom_core::Store;
use taskloom_core::StoreError;
use taskloom_core::StructuredOutput;
use taskloom_core::Task;
use taskloom_core::TaskId;
use taskloom_core::TaskStatus;
use taskloom_core::Timestamp;
use thiserror::Error;

/// `SQLite` schema version this module knows how to create and read.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout applied to every connection.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Largest task/stage JSON snapshot accepted by the store.
pub const MAX_STATE_BYTES: usize = 8 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors internal to the SQLite store, convertible into [`StoreError`].
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The underlying `SQLite` driver returned an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored JSON snapshot failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A snapshot exceeded [`MAX_STATE_BYTES`].
    #[error("snapshot of {0} bytes exceeds the {MAX_STATE_BYTES} byte limit")]
    TooLarge(usize),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Backend(error.to_string())
    }
}

// ============================================================================
// SECTION: SqliteStore
// ============================================================================

/// `Store` implementation backed by a single WAL-mode `SQLite` connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if necessary) a `SQLite` database at `path` and
    /// applies schema migrations.
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn configure(conn: &Connection) -> Result<(), SqliteStoreError> {
        conn.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<(), SqliteStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS tasks (
                 id TEXT PRIMARY KEY,
                 status TEXT NOT NULL,
                 claimed_at TEXT,
                 snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS stages (
                 id TEXT PRIMARY KEY,
                 task_id TEXT NOT NULL,
                 status TEXT NOT NULL,
                 snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS gates (
                 id TEXT PRIMARY KEY,
                 task_id TEXT NOT NULL,
                 status TEXT NOT NULL,
                 snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS event_log (
                 id TEXT PRIMARY KEY,
                 task_id TEXT NOT NULL,
                 sequence INTEGER NOT NULL,
                 snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS circuit_breakers (
                 id TEXT PRIMARY KEY,
                 task_id TEXT NOT NULL,
                 snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS memories (
                 id TEXT PRIMARY KEY,
                 project_id TEXT NOT NULL,
                 bucket TEXT NOT NULL,
                 snapshot TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_stages_task ON stages (task_id);
             CREATE INDEX IF NOT EXISTS idx_event_log_task_seq ON event_log (task_id, sequence);
             CREATE INDEX IF NOT EXISTS idx_memories_project_bucket ON memories (project_id, bucket);",
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_meta", [], |row| row.get(0))?;
        if current < SCHEMA_VERSION {
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        #[allow(clippy::unwrap_used)]
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    let text = serde_json::to_string(value)?;
    if text.len() > MAX_STATE_BYTES {
        return Err(SqliteStoreError::TooLarge(text.len()));
    }
    Ok(text)
}

fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, SqliteStoreError> {
    Ok(serde_json::from_str(text)?)
}

// ============================================================================
// SECTION: Store Impl
// ============================================================================

impl Store for SqliteStore {
    fn claim_oldest_pending(&self) -> Result<Option<Task>, StoreError> {
        let conn = self.lock();
        let candidate: Option<(String, String)> = conn
            .query_row(
                "SELECT id, snapshot FROM tasks WHERE status = 'pending' ORDER BY id ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;

        let Some((id, snapshot)) = candidate else {
            return Ok(None);
        };

        let now_text = encode(&Timestamp::now()).map_err(SqliteStoreError::from)?;
        let updated = conn
            .execute(
                "UPDATE tasks SET status = 'claimed', claimed_at = ?2 WHERE id = ?1 AND status = 'pending'",
                params![id, json_str(&now_text)],
            )
            .map_err(SqliteStoreError::from)?;
        if updated == 0 {
            // Lost the race to another claimant.
            return Ok(None);
        }

        let mut task: Task = decode(&snapshot).map_err(SqliteStoreError::from)?;
        task.status = TaskStatus::Claimed;
        Ok(Some(task))
    }

    fn recover_stale(&self, stale_after_secs: i64) -> Result<Vec<TaskId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, snapshot, claimed_at FROM tasks WHERE status IN ('claimed', 'running')")
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let snapshot: String = row.get(1)?;
                let claimed_at: Option<String> = row.get(2)?;
                Ok((id, snapshot, claimed_at))
            })
            .map_err(SqliteStoreError::from)?;

        let now = Timestamp::now();
        let mut recovered = Vec::new();
        for row in rows {
            let (id, _snapshot, claimed_at) = row.map_err(SqliteStoreError::from)?;
            let Some(claimed_at) = claimed_at else { continue };
            let Ok(claimed_ts): Result<Timestamp, _> = serde_json::from_str(&format!("\"{claimed_at}\"")) else {
                continue;
            };
            if claimed_ts.elapsed_seconds(now) > stale_after_secs {
                conn.execute("UPDATE tasks SET status = 'pending' WHERE id = ?1", params![id])
                    .map_err(SqliteStoreError::from)?;
                recovered.push(TaskId::new(id));
            }
        }
        Ok(recovered)
    }

    fn update_task_status(&self, task_id: &TaskId, expected: TaskStatus, next: TaskStatus) -> Result<(), StoreError> {
        let conn = self.lock();
        let expected_text = encode(&expected).map_err(SqliteStoreError::from)?;
        let next_text = encode(&next).map_err(SqliteStoreError::from)?;
        let updated = conn
            .execute(
                "UPDATE tasks SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![json_str(&next_text), task_id.as_str(), json_str(&expected_text)],
            )
            .map_err(SqliteStoreError::from)?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!("task {task_id} not in expected status {expected:?}")));
        }
        Ok(())
    }

    fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot = encode(task).map_err(SqliteStoreError::from)?;
        let status = encode(&task.status).map_err(SqliteStoreError::from)?;
        conn.execute(
            "INSERT INTO tasks (id, status, snapshot) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, snapshot = excluded.snapshot",
            params![task.id.as_str(), json_str(&status), snapshot],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn upsert_stage(&self, stage: &Stage) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot = encode(stage).map_err(SqliteStoreError::from)?;
        let status = encode(&stage.status).map_err(SqliteStoreError::from)?;
        conn.execute(
            "INSERT INTO stages (id, task_id, status, snapshot) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, snapshot = excluded.snapshot",
            params![stage.id.as_str(), stage.task_id.as_str(), json_str(&status), snapshot],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn update_stage_status(&self, stage_id: &StageId, status: StageStatus) -> Result<(), StoreError> {
        let conn = self.lock();
        let status_text = encode(&status).map_err(SqliteStoreError::from)?;
        conn.execute(
            "UPDATE stages SET status = ?1 WHERE id = ?2",
            params![json_str(&status_text), stage_id.as_str()],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn set_stage_output(&self, stage_id: &StageId, output_text: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot: Option<String> = conn
            .query_row("SELECT snapshot FROM stages WHERE id = ?1", params![stage_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some(snapshot) = snapshot else {
            return Err(StoreError::NotFound(format!("stage {stage_id}")));
        };
        let mut stage: Stage = decode(&snapshot).map_err(SqliteStoreError::from)?;
        stage.output_text = Some(output_text.to_string());
        let updated = encode(&stage).map_err(SqliteStoreError::from)?;
        conn.execute("UPDATE stages SET snapshot = ?1 WHERE id = ?2", params![updated, stage_id.as_str()])
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn set_stage_structured(&self, stage_id: &StageId, structured: &StructuredOutput) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot: Option<String> = conn
            .query_row("SELECT snapshot FROM stages WHERE id = ?1", params![stage_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some(snapshot) = snapshot else {
            return Err(StoreError::NotFound(format!("stage {stage_id}")));
        };
        let mut stage: Stage = decode(&snapshot).map_err(SqliteStoreError::from)?;
        stage.structured_output = Some(structured.clone());
        let updated = encode(&stage).map_err(SqliteStoreError::from)?;
        conn.execute("UPDATE stages SET snapshot = ?1 WHERE id = ?2", params![updated, stage_id.as_str()])
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn create_gate(&self, gate: &Gate) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot = encode(gate).map_err(SqliteStoreError::from)?;
        let status = encode(&gate.status).map_err(SqliteStoreError::from)?;
        conn.execute(
            "INSERT INTO gates (id, task_id, status, snapshot) VALUES (?1, ?2, ?3, ?4)",
            params![gate.id.as_str(), gate.task_id.as_str(), json_str(&status), snapshot],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn refresh_gate(&self, gate_id: &taskloom_core::GateId, outcome: GateOutcome) -> Result<Gate, StoreError> {
        let conn = self.lock();
        let snapshot: Option<String> = conn
            .query_row("SELECT snapshot FROM gates WHERE id = ?1", params![gate_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some(snapshot) = snapshot else {
            return Err(StoreError::NotFound(format!("gate {gate_id}")));
        };
        let mut gate: Gate = decode(&snapshot).map_err(SqliteStoreError::from)?;
        gate.status = match &outcome {
            GateOutcome::Approved => GateStatus::Approved,
            GateOutcome::Rejected { .. } => GateStatus::Rejected,
            GateOutcome::Revised { .. } => GateStatus::Revised,
            GateOutcome::Timeout | GateOutcome::Cancelled | GateOutcome::ShutdownAborted => GateStatus::Pending,
        };
        gate.outcome = Some(outcome);
        gate.resolved_at = Some(Timestamp::now());
        let updated_status = encode(&gate.status).map_err(SqliteStoreError::from)?;
        let updated_snapshot = encode(&gate).map_err(SqliteStoreError::from)?;
        conn.execute(
            "UPDATE gates SET status = ?1, snapshot = ?2 WHERE id = ?3",
            params![json_str(&updated_status), updated_snapshot, gate_id.as_str()],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(gate)
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        let conn = self.lock();
        let snapshot: Option<String> = conn
            .query_row("SELECT snapshot FROM tasks WHERE id = ?1", params![task_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some(snapshot) = snapshot else {
            return Err(StoreError::NotFound(format!("task {task_id}")));
        };
        decode(&snapshot).map_err(StoreError::from)
    }

    fn get_gate(&self, gate_id: &taskloom_core::GateId) -> Result<Gate, StoreError> {
        let conn = self.lock();
        let snapshot: Option<String> = conn
            .query_row("SELECT snapshot FROM gates WHERE id = ?1", params![gate_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some(snapshot) = snapshot else {
            return Err(StoreError::NotFound(format!("gate {gate_id}")));
        };
        decode(&snapshot).map_err(StoreError::from)
    }

    fn list_pending_gates(&self) -> Result<Vec<Gate>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT snapshot FROM gates WHERE status = 'pending' ORDER BY id ASC")
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(SqliteStoreError::from)?;
        let mut gates = Vec::new();
        for row in rows {
            let snapshot = row.map_err(SqliteStoreError::from)?;
            gates.push(decode(&snapshot).map_err(SqliteStoreError::from)?);
        }
        Ok(gates)
    }

    fn append_event_log(&self, mut entry: EventLogEntry) -> Result<EventLogEntry, StoreError> {
        let conn = self.lock();
        let next_seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM event_log WHERE task_id = ?1",
                params![entry.task_id.as_str()],
                |row| row.get(0),
            )
            .map_err(SqliteStoreError::from)?;
        entry.sequence = u64::try_from(next_seq).unwrap_or(u64::MAX);
        let snapshot = encode(&entry).map_err(SqliteStoreError::from)?;
        conn.execute(
            "INSERT INTO event_log (id, task_id, sequence, snapshot) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id.as_str(), entry.task_id.as_str(), next_seq, snapshot],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(entry)
    }

    fn insert_circuit_breaker(&self, record: &CircuitBreakerRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        let snapshot = encode(record).map_err(SqliteStoreError::from)?;
        conn.execute(
            "INSERT INTO circuit_breakers (id, task_id, snapshot) VALUES (?1, ?2, ?3)",
            params![record.id.as_str(), record.task_id.as_str(), snapshot],
        )
        .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn load_memories(&self, project_id: &ProjectId) -> Result<BTreeMap<MemoryBucket, Vec<MemoryEntry>>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT snapshot FROM memories WHERE project_id = ?1 ORDER BY id ASC")
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map(params![project_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(SqliteStoreError::from)?;
        let mut grouped: BTreeMap<MemoryBucket, Vec<MemoryEntry>> = BTreeMap::new();
        for row in rows {
            let snapshot = row.map_err(SqliteStoreError::from)?;
            let entry: MemoryEntry = decode(&snapshot).map_err(SqliteStoreError::from)?;
            grouped.entry(entry.bucket).or_default().push(entry);
        }
        Ok(grouped)
    }

    fn append_memories(&self, project_id: &ProjectId, entries: Vec<MemoryEntry>) -> Result<(), StoreError> {
        let conn = self.lock();
        for entry in entries {
            let bucket = encode(&entry.bucket).map_err(SqliteStoreError::from)?;
            let bucket = json_str(&bucket).to_string();
            let snapshot = encode(&entry).map_err(SqliteStoreError::from)?;
            conn.execute(
                "INSERT INTO memories (id, project_id, bucket, snapshot) VALUES (?1, ?2, ?3, ?4)",
                params![entry.id.as_str(), project_id.as_str(), bucket, snapshot],
            )
            .map_err(SqliteStoreError::from)?;

            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memories WHERE project_id = ?1 AND bucket = ?2",
                    params![project_id.as_str(), bucket],
                    |row| row.get(0),
                )
                .map_err(SqliteStoreError::from)?;
            let capacity = i64::try_from(taskloom_core::DEFAULT_BUCKET_CAPACITY).unwrap_or(i64::MAX);
            let overflow = count.saturating_sub(capacity);
            if overflow > 0 {
                conn.execute(
                    "DELETE FROM memories WHERE id IN (
                         SELECT id FROM memories WHERE project_id = ?1 AND bucket = ?2 ORDER BY id ASC LIMIT ?3
                     )",
                    params![project_id.as_str(), bucket, overflow],
                )
                .map_err(SqliteStoreError::from)?;
            }
        }
        Ok(())
    }
}

/// Strips the surrounding quotes `serde_json` puts around a plain string
/// value, since status/bucket columns are stored unquoted for readable
/// `WHERE` clauses.
fn json_str(encoded: &str) -> &str {
    encoded.trim_matches('"')
}

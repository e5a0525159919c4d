use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Highest schema version this build knows how to open.
pub const SCHEMA_VERSION: i32 = 1;

/// A command recorded while offline, waiting to be replayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedCommand {
    pub id: String,                 // UUIDv7, sorts by creation time
    pub aggregate_id: String,       // e.g. the labour id; UI filtering only
    pub command: serde_json::Value, // opaque `{type, payload}` envelope
    pub created_at: DateTime<Utc>,
}

/// A command the server explicitly rejected, parked instead of dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub id: String,
    pub aggregate_id: String,
    pub command: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid state: {0}")]
    State(&'static str),
}

/// Durable, strictly ordered store of pending commands.
///
/// Ordering comes from an autoincrement sequence column rather than the
/// timestamp, so two commands created in the same millisecond still replay
/// in the order they were enqueued.
pub struct CommandQueue {
    conn: Mutex<Connection>,
}

impl CommandQueue {
    /// Open (or create) a file-backed queue and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let conn = Connection::open(path.as_ref())?;
        let queue = Self { conn: Mutex::new(conn) };
        queue.init_schema()?;
        info!(path = %path.as_ref().display(), "command queue opened");
        Ok(queue)
    }

    /// Volatile queue, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let queue = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        queue.init_schema()?;
        Ok(queue)
    }

    /// Create required tables and indexes.
    /// Safe to call multiple times.
    pub fn init_schema(&self) -> Result<(), QueueError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS command_queue (
seq INTEGER PRIMARY KEY AUTOINCREMENT,
id TEXT NOT NULL UNIQUE,
aggregate_id TEXT NOT NULL,
command TEXT NOT NULL, -- JSON envelope
created_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_command_queue_aggregate
ON command_queue(aggregate_id, seq);

CREATE TABLE IF NOT EXISTS dead_letters (
id TEXT PRIMARY KEY,
aggregate_id TEXT NOT NULL,
command TEXT NOT NULL,
created_ms INTEGER NOT NULL,
failed_ms INTEGER NOT NULL,
reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_kv (
k TEXT PRIMARY KEY,
v TEXT NOT NULL
);
"#,
        )?;
        conn.execute(
            "INSERT INTO queue_kv(k,v) VALUES('schema_version','1')
ON CONFLICT(k) DO NOTHING",
            [],
        )?;
        Ok(())
    }

    /// Persist a new command and return its generated id.
    pub fn enqueue(
        &self,
        aggregate_id: &str,
        command: &serde_json::Value,
    ) -> Result<String, QueueError> {
        let id = Uuid::now_v7().to_string();
        let body = serde_json::to_string(command)?;
        let now_ms = Utc::now().timestamp_millis();

        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO command_queue(id, aggregate_id, command, created_ms)
VALUES (?1, ?2, ?3, ?4)",
            params![id, aggregate_id, body, now_ms],
        )?;
        tx.commit()?;

        debug!(command_id = %id, aggregate_id, "command enqueued");
        Ok(id)
    }

    /// All undelivered commands in creation order.
    pub fn list_pending(&self) -> Result<Vec<QueuedCommand>, QueueError> {
        self.select_pending(None)
    }

    /// Undelivered commands for one aggregate, still in global creation order.
    pub fn list_pending_for(&self, aggregate_id: &str) -> Result<Vec<QueuedCommand>, QueueError> {
        self.select_pending(Some(aggregate_id))
    }

    fn select_pending(&self, aggregate_id: Option<&str>) -> Result<Vec<QueuedCommand>, QueueError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, aggregate_id, command, created_ms
FROM command_queue
WHERE ?1 IS NULL OR aggregate_id = ?1
ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![aggregate_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, aggregate_id, raw, created_ms) = row?;
            out.push(QueuedCommand {
                id,
                aggregate_id,
                command: serde_json::from_str(&raw)?,
                created_at: millis_to_utc(created_ms)?,
            });
        }
        Ok(out)
    }

    /// Delete a delivered command. Unknown ids are ignored.
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM command_queue WHERE id=?1", params![id])?;
        if n == 0 {
            debug!(command_id = id, "remove: no such command");
        }
        Ok(())
    }

    /// Number of pending commands.
    pub fn count(&self) -> Result<usize, QueueError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM command_queue", [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Move a rejected command out of the pending queue into `dead_letters`.
    pub fn dead_letter(&self, cmd: &QueuedCommand, reason: &str) -> Result<(), QueueError> {
        let body = serde_json::to_string(&cmd.command)?;
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO dead_letters(id, aggregate_id, command, created_ms, failed_ms, reason)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(id) DO UPDATE SET failed_ms=excluded.failed_ms, reason=excluded.reason",
            params![
                cmd.id,
                cmd.aggregate_id,
                body,
                cmd.created_at.timestamp_millis(),
                Utc::now().timestamp_millis(),
                reason,
            ],
        )?;
        tx.execute("DELETE FROM command_queue WHERE id=?1", params![cmd.id])?;
        tx.commit()?;
        Ok(())
    }

    /// Parked commands, oldest failure first.
    pub fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, aggregate_id, command, created_ms, failed_ms, reason
FROM dead_letters
ORDER BY failed_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, aggregate_id, raw, created_ms, failed_ms, reason) = row?;
            out.push(DeadLetter {
                id,
                aggregate_id,
                command: serde_json::from_str(&raw)?,
                created_at: millis_to_utc(created_ms)?,
                failed_at: millis_to_utc(failed_ms)?,
                reason,
            });
        }
        Ok(out)
    }

    /// Drop a parked command for good. Idempotent.
    pub fn discard_dead_letter(&self, id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM dead_letters WHERE id=?1", params![id])?;
        Ok(())
    }

    /// Put a parked command back at the tail of the queue.
    /// Returns false if no such dead letter exists.
    pub fn requeue_dead_letter(&self, id: &str) -> Result<bool, QueueError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let row: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT aggregate_id, command, created_ms FROM dead_letters WHERE id=?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((aggregate_id, body, created_ms)) = row else {
            return Ok(false);
        };
        tx.execute(
            "INSERT INTO command_queue(id, aggregate_id, command, created_ms)
VALUES (?1, ?2, ?3, ?4)",
            params![id, aggregate_id, body, created_ms],
        )?;
        tx.execute("DELETE FROM dead_letters WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Return the current integer schema version stored in `queue_kv`.
    pub fn schema_version(&self) -> Result<i32, QueueError> {
        let conn = self.conn.lock();
        let ver: Option<String> = conn
            .query_row("SELECT v FROM queue_kv WHERE k='schema_version'", [], |r| r.get(0))
            .optional()?;
        Ok(ver.and_then(|s| s.parse::<i32>().ok()).unwrap_or(1))
    }

    /// Bring the stored schema up to `target_version`. Version 1 is the only
    /// layout so far and `init_schema` already writes it, so this only checks
    /// the bounds and the stored version.
    pub fn run_migrations(&self, target_version: i32) -> Result<(), QueueError> {
        if !(1..=SCHEMA_VERSION).contains(&target_version) {
            return Err(QueueError::State("invalid target_version"));
        }
        if self.schema_version()? > SCHEMA_VERSION {
            return Err(QueueError::State("queue written by a newer schema"));
        }
        Ok(())
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, QueueError> {
    DateTime::from_timestamp_millis(ms).ok_or(QueueError::State("timestamp out of range"))
}

// Client-side store-and-forward queue. Operations that cannot reach the
// service are appended here and replayed in FIFO order on reconnect, each
// carrying its idempotency key so the server deduplicates.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, params};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Send,
    Heartbeat,
    Acknowledge,
    Transition,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Send => "send",
            OpKind::Heartbeat => "heartbeat",
            OpKind::Acknowledge => "acknowledge",
            OpKind::Transition => "transition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send" => Some(OpKind::Send),
            "heartbeat" => Some(OpKind::Heartbeat),
            "acknowledge" => Some(OpKind::Acknowledge),
            "transition" => Some(OpKind::Transition),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedOp {
    pub id: i64,
    pub kind: OpKind,
    pub payload: serde_json::Value,
    pub idem_key: String,
    pub created_at: String,
    pub expires_at: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

fn map_op(row: &rusqlite::Row) -> rusqlite::Result<QueuedOp> {
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    Ok(QueuedOp {
        id: row.get(0)?,
        kind: OpKind::parse(&kind).unwrap_or(OpKind::Send),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::json!({})),
        idem_key: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
    })
}

const OP_COLS: &str = "id, kind, payload, idem_key, created_at, expires_at, attempts, last_error";

/// Durable local queue backed by its own small SQLite file. Survives
/// restarts; rows are owner-only like the rest of the data directory.
pub struct LocalQueue {
    conn: Connection,
    ttl: Duration,
}

impl LocalQueue {
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS queued_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                idem_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
             );",
        )?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(LocalQueue { conn, ttl })
    }

    /// Append an operation. A caller-supplied idempotency key that is
    /// already queued returns the existing row instead of duplicating it.
    pub fn enqueue(
        &self,
        kind: OpKind,
        payload: serde_json::Value,
        idem_key: Option<String>,
    ) -> Result<QueuedOp> {
        let key = idem_key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = chrono::Utc::now();
        let expires = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();

        self.conn.execute(
            "INSERT OR IGNORE INTO queued_ops (kind, payload, idem_key, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                payload.to_string(),
                key,
                now.to_rfc3339(),
                expires.to_rfc3339()
            ],
        )?;
        self.by_key(&key)?
            .ok_or_else(|| Error::Internal("queued op vanished after insert".into()))
    }

    pub fn by_key(&self, key: &str) -> Result<Option<QueuedOp>> {
        use rusqlite::OptionalExtension;
        let op = self
            .conn
            .query_row(
                &format!("SELECT {OP_COLS} FROM queued_ops WHERE idem_key = ?1"),
                params![key],
                map_op,
            )
            .optional()?;
        Ok(op)
    }

    /// All pending operations, oldest first. Replay order preserves the
    /// per-sender send order.
    pub fn pending(&self) -> Result<Vec<QueuedOp>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {OP_COLS} FROM queued_ops ORDER BY id ASC"))?;
        let ops = stmt.query_map([], map_op)?.collect::<rusqlite::Result<_>>()?;
        Ok(ops)
    }

    pub fn len(&self) -> Result<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queued_ops", [], |r| r.get(0))?;
        Ok(n)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn mark_attempt(&self, id: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE queued_ops SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }

    pub fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM queued_ops WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Drop operations past their TTL. Returns the dropped rows so the
    /// caller can report them as exhausted.
    pub fn purge_expired(&self, now: &str) -> Result<Vec<QueuedOp>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OP_COLS} FROM queued_ops WHERE expires_at <= ?1"
        ))?;
        let expired: Vec<QueuedOp> = stmt
            .query_map(params![now], map_op)?
            .collect::<rusqlite::Result<_>>()?;
        self.conn.execute(
            "DELETE FROM queued_ops WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(expired)
    }
}

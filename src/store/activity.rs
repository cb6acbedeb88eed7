use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::Activity;

fn map_activity(row: &rusqlite::Row) -> rusqlite::Result<Activity> {
    let payload: String = row.get(4)?;
    Ok(Activity {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        kind: row.get(2)?,
        target: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::json!({})),
        created_at: row.get(5)?,
    })
}

/// Append-only audit record. `target` is a `kind:id` ref string such as
/// `message:42` or `topic:3`.
pub fn append(
    conn: &Connection,
    actor_id: i64,
    kind: &str,
    target: &str,
    payload: &serde_json::Value,
    now: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO activity (actor_id, kind, target, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![actor_id, kind, target, payload.to_string(), now],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Default, Clone)]
pub struct ActivityFilter {
    pub actor_id: Option<i64>,
    pub target: Option<String>,
    pub since: Option<String>,
}

pub fn list(conn: &Connection, filter: &ActivityFilter, limit: i64) -> Result<Vec<Activity>> {
    let mut sql = String::from(
        "SELECT id, actor_id, kind, target, payload, created_at FROM activity WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(actor_id) = filter.actor_id {
        args.push(Box::new(actor_id));
        sql.push_str(&format!(" AND actor_id = ?{}", args.len()));
    }
    if let Some(target) = &filter.target {
        args.push(Box::new(target.clone()));
        sql.push_str(&format!(" AND target = ?{}", args.len()));
    }
    if let Some(since) = &filter.since {
        args.push(Box::new(since.clone()));
        sql.push_str(&format!(" AND created_at >= ?{}", args.len()));
    }
    args.push(Box::new(limit));
    sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", args.len()));

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let events = stmt
        .query_map(refs.as_slice(), map_activity)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(events)
}

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::models::{Agent, AgentIdentity};

fn map_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        project: row.get(2)?,
        branch: row.get(3)?,
        purpose: row.get(4)?,
        created_at: row.get(5)?,
        last_seen: row.get(6)?,
    })
}

const AGENT_COLS: &str = "id, name, project, branch, purpose, created_at, last_seen";

/// Intern an identity triple: returns the existing row or creates it.
/// Either way `last_seen` is stamped with `now`.
pub fn create_or_get(
    conn: &Connection,
    identity: &AgentIdentity,
    purpose: &str,
    now: &str,
) -> Result<Agent> {
    if let Some(existing) = by_identity(conn, identity)? {
        conn.execute(
            "UPDATE agents SET last_seen = ?1 WHERE id = ?2",
            params![now, existing.id],
        )?;
        return Ok(Agent {
            last_seen: now.to_string(),
            ..existing
        });
    }

    conn.execute(
        "INSERT INTO agents (name, project, branch, purpose, created_at, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            identity.name,
            identity.project,
            identity.branch,
            purpose,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    by_id(conn, id)?.ok_or_else(|| Error::Internal("agent row vanished after insert".into()))
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<Agent>> {
    let agent = conn
        .query_row(
            &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
            params![id],
            map_agent,
        )
        .optional()?;
    Ok(agent)
}

pub fn by_identity(conn: &Connection, identity: &AgentIdentity) -> Result<Option<Agent>> {
    let agent = conn
        .query_row(
            &format!(
                "SELECT {AGENT_COLS} FROM agents
                 WHERE name = ?1 AND project = ?2 AND branch = ?3"
            ),
            params![identity.name, identity.project, identity.branch],
            map_agent,
        )
        .optional()?;
    Ok(agent)
}

/// Resolve a display string to an agent. A string containing `@` must
/// match an identity triple exactly; a bare name matches when exactly one
/// agent carries it (case-sensitive).
pub fn resolve_display(conn: &Connection, display: &str) -> Result<Option<Agent>> {
    if display.contains('@') {
        return by_identity(conn, &AgentIdentity::parse(display));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {AGENT_COLS} FROM agents WHERE name = ?1 LIMIT 2"
    ))?;
    let matches: Vec<Agent> = stmt
        .query_map(params![display], map_agent)?
        .collect::<rusqlite::Result<_>>()?;
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.into_iter().next().unwrap())),
        _ => Err(Error::UnknownRecipient(format!(
            "{display} is ambiguous; use name@project.branch"
        ))),
    }
}

pub fn touch(conn: &Connection, id: i64, now: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE agents SET last_seen = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    if n == 0 {
        return Err(Error::NotFound(format!("agent {id}")));
    }
    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<Agent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {AGENT_COLS} FROM agents ORDER BY last_seen DESC"
    ))?;
    let agents = stmt
        .query_map([], map_agent)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(agents)
}

// --- Sessions ---

/// Bind a session token to an agent. Rebinding an existing token to the
/// same agent is a no-op; to a different agent it is a conflict.
pub fn bind_session(conn: &Connection, token: &str, agent_id: i64, now: &str) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT agent_id FROM sessions WHERE token = ?1 AND ended_at IS NULL",
            params![token],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(bound) if bound == agent_id => Ok(()),
        Some(bound) => Err(Error::Conflict(format!(
            "session already bound to agent {bound}"
        ))),
        None => {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (token, agent_id, started_at, ended_at)
                 VALUES (?1, ?2, ?3, NULL)",
                params![token, agent_id, now],
            )?;
            Ok(())
        }
    }
}

pub fn complete_session(conn: &Connection, token: &str, now: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE sessions SET ended_at = ?1 WHERE token = ?2 AND ended_at IS NULL",
        params![now, token],
    )?;
    if n == 0 {
        return Err(Error::NotFound(format!("session {token}")));
    }
    Ok(())
}

pub fn session_agent(conn: &Connection, token: &str) -> Result<Option<i64>> {
    let agent_id = conn
        .query_row(
            "SELECT agent_id FROM sessions WHERE token = ?1 AND ended_at IS NULL",
            params![token],
            |r| r.get(0),
        )
        .optional()?;
    Ok(agent_id)
}

pub fn has_open_session(conn: &Connection, agent_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE agent_id = ?1 AND ended_at IS NULL",
        params![agent_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

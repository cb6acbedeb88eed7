use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::models::{
    Agent, AgentIdentity, InboxEntry, Message, Priority, RecipientState, Topic,
};

const MSG_COLS: &str = "m.id, m.sender_id, a.name, a.project, a.branch, m.subject, m.body,
     m.priority, m.thread_id, m.reply_to, m.deadline, m.created_at";

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let sender = AgentIdentity {
        name: row.get(2)?,
        project: row.get(3)?,
        branch: row.get(4)?,
    };
    let priority: String = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender: sender.display(),
        subject: row.get(5)?,
        body: row.get(6)?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Normal),
        thread_id: row.get(8)?,
        reply_to: row.get(9)?,
        deadline: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<InboxEntry> {
    let message = map_message(row)?;
    let state: String = row.get(12)?;
    let acknowledged_at: Option<String> = row.get(14)?;
    let deadline_pending = message.deadline.is_some() && acknowledged_at.is_none();
    Ok(InboxEntry {
        message,
        state: RecipientState::parse(&state).unwrap_or(RecipientState::Unread),
        snoozed_until: row.get(13)?,
        acknowledged_at,
        read_at: row.get(15)?,
        deadline_pending,
        cursor: row.get(16)?,
    })
}

const ENTRY_COLS: &str = "m.id, m.sender_id, a.name, a.project, a.branch, m.subject, m.body,
     m.priority, m.thread_id, m.reply_to, m.deadline, m.created_at,
     r.state, r.snoozed_until, r.acknowledged_at, r.read_at, r.id";

/// Insert a message row. A reply inherits the parent's thread id; a fresh
/// message becomes its own thread root.
pub fn insert_message(
    conn: &Connection,
    sender_id: i64,
    subject: &str,
    body: &str,
    priority: Priority,
    reply_to: Option<i64>,
    deadline: Option<&str>,
    now: &str,
) -> Result<i64> {
    let thread_id: Option<i64> = match reply_to {
        Some(parent) => Some(
            conn.query_row(
                "SELECT thread_id FROM messages WHERE id = ?1",
                params![parent],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::InvalidArgument(format!("reply_to message {parent} not found")))?,
        ),
        None => None,
    };

    conn.execute(
        "INSERT INTO messages (sender_id, subject, body, priority, thread_id, reply_to, deadline, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sender_id,
            subject,
            body,
            priority.as_str(),
            thread_id,
            reply_to,
            deadline,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    if thread_id.is_none() {
        conn.execute(
            "UPDATE messages SET thread_id = ?1 WHERE id = ?1",
            params![id],
        )?;
    }
    upsert_fts(conn, id);
    Ok(id)
}

pub fn add_recipient(conn: &Connection, message_id: i64, recipient_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO message_recipients (message_id, recipient_id, state)
         VALUES (?1, ?2, 'unread')",
        params![message_id, recipient_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn message_by_id(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let msg = conn
        .query_row(
            &format!(
                "SELECT {MSG_COLS} FROM messages m JOIN agents a ON a.id = m.sender_id
                 WHERE m.id = ?1"
            ),
            params![id],
            map_message,
        )
        .optional()?;
    Ok(msg)
}

/// All messages in a thread, time-ordered.
pub fn thread(conn: &Connection, thread_id: i64) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MSG_COLS} FROM messages m JOIN agents a ON a.id = m.sender_id
         WHERE m.thread_id = ?1 ORDER BY m.created_at ASC, m.id ASC"
    ))?;
    let messages = stmt
        .query_map(params![thread_id], map_message)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(messages)
}

/// Recipient rows for a message, for the full message view.
pub fn recipients_of(
    conn: &Connection,
    message_id: i64,
) -> Result<Vec<crate::models::RecipientStatus>> {
    let mut stmt = conn.prepare(
        "SELECT r.recipient_id, a.name, a.project, a.branch, r.state, r.acknowledged_at
         FROM message_recipients r JOIN agents a ON a.id = r.recipient_id
         WHERE r.message_id = ?1 ORDER BY r.id ASC",
    )?;
    let recipients = stmt
        .query_map(params![message_id], |row| {
            let identity = AgentIdentity {
                name: row.get(1)?,
                project: row.get(2)?,
                branch: row.get(3)?,
            };
            let state: String = row.get(4)?;
            Ok(crate::models::RecipientStatus {
                agent_id: row.get(0)?,
                agent: identity.display(),
                state: RecipientState::parse(&state).unwrap_or(RecipientState::Unread),
                acknowledged_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(recipients)
}

// --- Idempotent send ledger ---

pub fn lookup_send_key(conn: &Connection, sender_id: i64, key: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT message_id FROM send_keys WHERE sender_id = ?1 AND idem_key = ?2",
            params![sender_id, key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn record_send_key(
    conn: &Connection,
    sender_id: i64,
    key: &str,
    message_id: i64,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO send_keys (sender_id, idem_key, message_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![sender_id, key, message_id, now],
    )?;
    Ok(())
}

// --- Inbox queries ---

#[derive(Debug, Default, Clone)]
pub struct InboxFilter {
    pub states: Vec<RecipientState>,
    pub priority: Option<Priority>,
    pub sender: Option<String>,
    pub q: Option<String>,
}

/// Recipient-joined inbox page. Ordering: priority rank, then pending
/// deadlines, then newest first. `offset` is the decoded page cursor.
pub fn inbox(
    conn: &Connection,
    recipient_id: i64,
    filter: &InboxFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<InboxEntry>> {
    let mut sql = format!(
        "SELECT {ENTRY_COLS}
         FROM message_recipients r
         JOIN messages m ON m.id = r.message_id
         JOIN agents a ON a.id = m.sender_id
         WHERE r.recipient_id = ?1"
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(recipient_id)];

    if filter.states.is_empty() {
        sql.push_str(" AND r.state NOT IN ('trash', 'deleted')");
    } else {
        let marks: Vec<String> = filter
            .states
            .iter()
            .map(|s| {
                args.push(Box::new(s.as_str().to_string()));
                format!("?{}", args.len())
            })
            .collect();
        sql.push_str(&format!(" AND r.state IN ({})", marks.join(",")));
    }
    if let Some(priority) = filter.priority {
        args.push(Box::new(priority.as_str().to_string()));
        sql.push_str(&format!(" AND m.priority = ?{}", args.len()));
    }
    if let Some(sender) = &filter.sender {
        args.push(Box::new(sender.clone()));
        sql.push_str(&format!(" AND a.name = ?{}", args.len()));
    }
    if let Some(q) = &filter.q {
        args.push(Box::new(q.clone()));
        sql.push_str(&format!(
            " AND m.id IN (SELECT message_id FROM messages_fts WHERE messages_fts MATCH ?{})",
            args.len()
        ));
    }

    sql.push_str(
        " ORDER BY
            CASE m.priority WHEN 'urgent' THEN 3 WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0 END DESC,
            (m.deadline IS NOT NULL AND r.acknowledged_at IS NULL) DESC,
            m.created_at DESC, m.id DESC",
    );
    args.push(Box::new(limit));
    sql.push_str(&format!(" LIMIT ?{}", args.len()));
    args.push(Box::new(offset));
    sql.push_str(&format!(" OFFSET ?{}", args.len()));

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let entries = stmt
        .query_map(refs.as_slice(), map_entry)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(entries)
}

/// Unread rows beyond a poll cursor, oldest first. The recipient row id is
/// the cursor; it is monotonic per recipient.
pub fn unread_after(conn: &Connection, recipient_id: i64, cursor: i64) -> Result<Vec<InboxEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLS}
         FROM message_recipients r
         JOIN messages m ON m.id = r.message_id
         JOIN agents a ON a.id = m.sender_id
         WHERE r.recipient_id = ?1 AND r.state = 'unread' AND r.id > ?2
         ORDER BY r.id ASC"
    ))?;
    let entries = stmt
        .query_map(params![recipient_id, cursor], map_entry)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(entries)
}

pub fn entry_for(
    conn: &Connection,
    message_id: i64,
    recipient_id: i64,
) -> Result<Option<InboxEntry>> {
    let entry = conn
        .query_row(
            &format!(
                "SELECT {ENTRY_COLS}
                 FROM message_recipients r
                 JOIN messages m ON m.id = r.message_id
                 JOIN agents a ON a.id = m.sender_id
                 WHERE r.message_id = ?1 AND r.recipient_id = ?2"
            ),
            params![message_id, recipient_id],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

// --- Recipient state machine ---

/// Permitted lifecycle transitions. `trash → deleted` is reserved for the
/// retention sweep and deliberately absent here.
pub fn transition_allowed(from: RecipientState, to: RecipientState) -> bool {
    use RecipientState::*;
    matches!(
        (from, to),
        (Unread, Read)
            | (Unread, Starred)
            | (Unread, Snoozed)
            | (Unread, Archived)
            | (Unread, Trash)
            | (Read, Starred)
            | (Read, Snoozed)
            | (Read, Archived)
            | (Read, Trash)
            | (Starred, Read)
            | (Snoozed, Read)
            | (Archived, Read)
    )
}

/// Apply a guarded recipient-state transition. `snooze_until` is required
/// when entering `snoozed`; `delete_at` is stamped when entering `trash`.
pub fn apply_transition(
    conn: &Connection,
    message_id: i64,
    recipient_id: i64,
    to: RecipientState,
    snooze_until: Option<&str>,
    delete_at: Option<&str>,
    now: &str,
) -> Result<RecipientState> {
    let entry = entry_for(conn, message_id, recipient_id)?
        .ok_or_else(|| Error::NotFound(format!("message {message_id} for this recipient")))?;
    let from = entry.state;

    if !transition_allowed(from, to) {
        return Err(Error::InvalidTransition(format!(
            "{} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    if to == RecipientState::Snoozed && snooze_until.is_none() {
        return Err(Error::InvalidArgument("snooze requires snooze_until".into()));
    }

    conn.execute(
        "UPDATE message_recipients SET
            state = ?1,
            snoozed_until = ?2,
            read_at = CASE WHEN ?1 = 'read' AND read_at IS NULL THEN ?5 ELSE read_at END,
            archived_at = CASE WHEN ?1 = 'archived' THEN ?5 ELSE archived_at END,
            delete_at = ?6
         WHERE message_id = ?3 AND recipient_id = ?4",
        params![
            to.as_str(),
            if to == RecipientState::Snoozed {
                snooze_until
            } else {
                None
            },
            message_id,
            recipient_id,
            now,
            if to == RecipientState::Trash {
                delete_at
            } else {
                None
            },
        ],
    )?;
    Ok(to)
}

/// Stamp `acknowledged_at` exactly once. After the message deadline the
/// call is rejected without touching state.
pub fn acknowledge(
    conn: &Connection,
    message_id: i64,
    recipient_id: i64,
    now: &str,
) -> Result<String> {
    let entry = entry_for(conn, message_id, recipient_id)?
        .ok_or_else(|| Error::NotFound(format!("message {message_id} for this recipient")))?;

    if let Some(existing) = entry.acknowledged_at {
        return Ok(existing);
    }
    if let Some(deadline) = &entry.message.deadline
        && now >= deadline.as_str()
    {
        return Err(Error::DeadlinePassed);
    }

    conn.execute(
        "UPDATE message_recipients SET acknowledged_at = ?1
         WHERE message_id = ?2 AND recipient_id = ?3",
        params![now, message_id, recipient_id],
    )?;
    Ok(now.to_string())
}

// --- Topics ---

fn map_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn create_topic(conn: &Connection, name: &str, description: &str, now: &str) -> Result<Topic> {
    if topic_by_name(conn, name)?.is_some() {
        return Err(Error::Conflict(format!("topic {name} already exists")));
    }
    conn.execute(
        "INSERT INTO topics (name, description, created_at) VALUES (?1, ?2, ?3)",
        params![name, description, now],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Topic {
        id,
        name: name.to_string(),
        description: description.to_string(),
        created_at: now.to_string(),
    })
}

pub fn topic_by_name(conn: &Connection, name: &str) -> Result<Option<Topic>> {
    let topic = conn
        .query_row(
            "SELECT id, name, description, created_at FROM topics WHERE name = ?1",
            params![name],
            map_topic,
        )
        .optional()?;
    Ok(topic)
}

pub fn subscribe(conn: &Connection, topic_id: i64, agent_id: i64, now: &str) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO subscriptions (topic_id, agent_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![topic_id, agent_id, now],
    )?;
    Ok(n > 0)
}

pub fn unsubscribe(conn: &Connection, topic_id: i64, agent_id: i64) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM subscriptions WHERE topic_id = ?1 AND agent_id = ?2",
        params![topic_id, agent_id],
    )?;
    Ok(n > 0)
}

pub fn subscribers(conn: &Connection, topic_id: i64) -> Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, a.project, a.branch, a.purpose, a.created_at, a.last_seen
         FROM subscriptions s JOIN agents a ON a.id = s.agent_id
         WHERE s.topic_id = ?1 ORDER BY a.name ASC",
    )?;
    let agents = stmt
        .query_map(params![topic_id], |row| {
            Ok(Agent {
                id: row.get(0)?,
                name: row.get(1)?,
                project: row.get(2)?,
                branch: row.get(3)?,
                purpose: row.get(4)?,
                created_at: row.get(5)?,
                last_seen: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(agents)
}

// --- Sweeps ---

/// Snoozed rows due by `now` return to `read`. Returns the affected
/// (message id, recipient agent id) pairs for hub notification.
pub fn wake_snoozed(conn: &Connection, now: &str) -> Result<Vec<(i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, recipient_id FROM message_recipients
         WHERE state = 'snoozed' AND snoozed_until IS NOT NULL AND snoozed_until <= ?1",
    )?;
    let due: Vec<(i64, i64)> = stmt
        .query_map(params![now], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    for (message_id, recipient_id) in &due {
        conn.execute(
            "UPDATE message_recipients
             SET state = 'read', snoozed_until = NULL,
                 read_at = COALESCE(read_at, ?3)
             WHERE message_id = ?1 AND recipient_id = ?2",
            params![message_id, recipient_id, now],
        )?;
    }
    Ok(due)
}

/// Unacknowledged rows whose deadline has elapsed, not yet marked missed.
/// Stamps `deadline_missed_at`; state is untouched.
pub fn mark_missed_deadlines(conn: &Connection, now: &str) -> Result<Vec<(i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT r.message_id, r.recipient_id
         FROM message_recipients r JOIN messages m ON m.id = r.message_id
         WHERE m.deadline IS NOT NULL AND m.deadline <= ?1
           AND r.acknowledged_at IS NULL AND r.deadline_missed_at IS NULL",
    )?;
    let missed: Vec<(i64, i64)> = stmt
        .query_map(params![now], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    for (message_id, recipient_id) in &missed {
        conn.execute(
            "UPDATE message_recipients SET deadline_missed_at = ?3
             WHERE message_id = ?1 AND recipient_id = ?2",
            params![message_id, recipient_id, now],
        )?;
    }
    Ok(missed)
}

/// Trash rows past their retention window become `deleted` (terminal).
pub fn purge_trash(conn: &Connection, now: &str) -> Result<usize> {
    let n = conn.execute(
        "UPDATE message_recipients SET state = 'deleted'
         WHERE state = 'trash' AND delete_at IS NOT NULL AND delete_at <= ?1",
        params![now],
    )?;
    Ok(n)
}

// --- Full-text index ---

pub fn rebuild_fts_index(conn: &Connection) {
    conn.execute("DELETE FROM messages_fts", []).ok();
    conn.execute_batch(
        "INSERT INTO messages_fts (message_id, subject, body)
         SELECT id, subject, body FROM messages;",
    )
    .ok();
}

pub fn upsert_fts(conn: &Connection, message_id: i64) {
    conn.execute(
        "DELETE FROM messages_fts WHERE message_id = ?1",
        params![message_id],
    )
    .ok();
    conn.execute(
        "INSERT INTO messages_fts (message_id, subject, body)
         SELECT id, subject, body FROM messages WHERE id = ?1",
        params![message_id],
    )
    .ok();
}

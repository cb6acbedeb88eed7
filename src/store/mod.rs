// Storage facade. All durable rows are owned here; actors hold only
// by-value copies and route every mutation back through a transaction.
//
// Row operations are free functions over &Connection, shared between the
// plain facade (per-call lock) and the transactional sub-facade handed to
// `with_tx` closures.

pub mod activity;
pub mod agents;
pub mod mail;
mod migrations;
pub mod reviews;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Error, Result};
use crate::models::{
    Activity, Agent, AgentIdentity, Decision, InboxEntry, IssueDraft, IssueStatus, Message,
    Priority, RecipientState, Review, ReviewIssue, ReviewIteration, ReviewState, ReviewType,
    Topic,
};

pub use activity::ActivityFilter;
pub use mail::InboxFilter;
pub use migrations::latest_version as schema_version;

/// Current time in the canonical persisted form.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Re-render a caller-supplied RFC 3339 timestamp in the canonical form so
/// string comparison against stored stamps is meaningful.
pub fn normalize_ts(ts: &str) -> Result<String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(ts)
        .map_err(|e| Error::InvalidArgument(format!("bad timestamp {ts:?}: {e}")))?;
    Ok(parsed.with_timezone(&chrono::Utc).to_rfc3339())
}

pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;
        migrations::apply(&conn, path)?;
        mail::rebuild_fts_index(&conn);
        Ok(Store {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a write transaction; commit on Ok, roll back on Err.
    /// Transient contention (`SQLITE_BUSY`/`SQLITE_LOCKED`, surfaced as
    /// `Unavailable`) is retried a bounded number of times with jittered
    /// backoff; everything else propagates immediately.
    pub fn with_tx<T>(&self, f: impl Fn(&Tx) -> Result<T>) -> Result<T> {
        const MAX_RETRIES: u32 = 5;
        let mut attempt = 0;
        loop {
            let result = self.try_tx(&f);
            match result {
                Err(Error::Unavailable(_)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    std::thread::sleep(retry_backoff(attempt));
                }
                other => return other,
            }
        }
    }

    fn try_tx<T>(&self, f: &impl Fn(&Tx) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&Tx { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }
}

/// Transactional sub-facade: the same operation surface, scoped to one
/// in-flight transaction.
pub struct Tx<'a> {
    conn: &'a Connection,
}

fn retry_backoff(attempt: u32) -> Duration {
    let base_ms = 10u64 << (attempt - 1).min(6);
    let capped = base_ms.min(250);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// The storage operation surface, shared by `Store` (read path, per-call
/// lock) and `Tx` (inside a transaction).
pub trait Ops {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T>;

    // --- Agents & sessions ---

    fn create_or_get_agent(
        &self,
        identity: &AgentIdentity,
        purpose: &str,
        now: &str,
    ) -> Result<Agent> {
        self.with_conn(|c| agents::create_or_get(c, identity, purpose, now))
    }

    fn agent_by_id(&self, id: i64) -> Result<Option<Agent>> {
        self.with_conn(|c| agents::by_id(c, id))
    }

    fn resolve_agent(&self, display: &str) -> Result<Option<Agent>> {
        self.with_conn(|c| agents::resolve_display(c, display))
    }

    fn touch_agent(&self, id: i64, now: &str) -> Result<()> {
        self.with_conn(|c| agents::touch(c, id, now))
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        self.with_conn(agents::list)
    }

    fn bind_session(&self, token: &str, agent_id: i64, now: &str) -> Result<()> {
        self.with_conn(|c| agents::bind_session(c, token, agent_id, now))
    }

    fn complete_session(&self, token: &str, now: &str) -> Result<()> {
        self.with_conn(|c| agents::complete_session(c, token, now))
    }

    fn session_agent(&self, token: &str) -> Result<Option<i64>> {
        self.with_conn(|c| agents::session_agent(c, token))
    }

    fn has_open_session(&self, agent_id: i64) -> Result<bool> {
        self.with_conn(|c| agents::has_open_session(c, agent_id))
    }

    // --- Mail ---

    #[allow(clippy::too_many_arguments)]
    fn insert_message(
        &self,
        sender_id: i64,
        subject: &str,
        body: &str,
        priority: Priority,
        reply_to: Option<i64>,
        deadline: Option<&str>,
        now: &str,
    ) -> Result<i64> {
        self.with_conn(|c| {
            mail::insert_message(c, sender_id, subject, body, priority, reply_to, deadline, now)
        })
    }

    fn add_recipient(&self, message_id: i64, recipient_id: i64) -> Result<i64> {
        self.with_conn(|c| mail::add_recipient(c, message_id, recipient_id))
    }

    fn message_by_id(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|c| mail::message_by_id(c, id))
    }

    fn thread(&self, thread_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|c| mail::thread(c, thread_id))
    }

    fn recipients_of(&self, message_id: i64) -> Result<Vec<crate::models::RecipientStatus>> {
        self.with_conn(|c| mail::recipients_of(c, message_id))
    }

    fn lookup_send_key(&self, sender_id: i64, key: &str) -> Result<Option<i64>> {
        self.with_conn(|c| mail::lookup_send_key(c, sender_id, key))
    }

    fn record_send_key(&self, sender_id: i64, key: &str, message_id: i64, now: &str) -> Result<()> {
        self.with_conn(|c| mail::record_send_key(c, sender_id, key, message_id, now))
    }

    fn inbox(
        &self,
        recipient_id: i64,
        filter: &InboxFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InboxEntry>> {
        self.with_conn(|c| mail::inbox(c, recipient_id, filter, limit, offset))
    }

    fn unread_after(&self, recipient_id: i64, cursor: i64) -> Result<Vec<InboxEntry>> {
        self.with_conn(|c| mail::unread_after(c, recipient_id, cursor))
    }

    fn entry_for(&self, message_id: i64, recipient_id: i64) -> Result<Option<InboxEntry>> {
        self.with_conn(|c| mail::entry_for(c, message_id, recipient_id))
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &self,
        message_id: i64,
        recipient_id: i64,
        to: RecipientState,
        snooze_until: Option<&str>,
        delete_at: Option<&str>,
        now: &str,
    ) -> Result<RecipientState> {
        self.with_conn(|c| {
            mail::apply_transition(c, message_id, recipient_id, to, snooze_until, delete_at, now)
        })
    }

    fn acknowledge(&self, message_id: i64, recipient_id: i64, now: &str) -> Result<String> {
        self.with_conn(|c| mail::acknowledge(c, message_id, recipient_id, now))
    }

    // --- Topics ---

    fn create_topic(&self, name: &str, description: &str, now: &str) -> Result<Topic> {
        self.with_conn(|c| mail::create_topic(c, name, description, now))
    }

    fn topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        self.with_conn(|c| mail::topic_by_name(c, name))
    }

    fn subscribe(&self, topic_id: i64, agent_id: i64, now: &str) -> Result<bool> {
        self.with_conn(|c| mail::subscribe(c, topic_id, agent_id, now))
    }

    fn unsubscribe(&self, topic_id: i64, agent_id: i64) -> Result<bool> {
        self.with_conn(|c| mail::unsubscribe(c, topic_id, agent_id))
    }

    fn subscribers(&self, topic_id: i64) -> Result<Vec<Agent>> {
        self.with_conn(|c| mail::subscribers(c, topic_id))
    }

    // --- Sweeps ---

    fn wake_snoozed(&self, now: &str) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|c| mail::wake_snoozed(c, now))
    }

    fn mark_missed_deadlines(&self, now: &str) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|c| mail::mark_missed_deadlines(c, now))
    }

    fn purge_trash(&self, now: &str) -> Result<usize> {
        self.with_conn(|c| mail::purge_trash(c, now))
    }

    // --- Activity ---

    fn append_activity(
        &self,
        actor_id: i64,
        kind: &str,
        target: &str,
        payload: &serde_json::Value,
        now: &str,
    ) -> Result<i64> {
        self.with_conn(|c| activity::append(c, actor_id, kind, target, payload, now))
    }

    fn list_activity(&self, filter: &ActivityFilter, limit: i64) -> Result<Vec<Activity>> {
        self.with_conn(|c| activity::list(c, filter, limit))
    }

    // --- Reviews ---

    #[allow(clippy::too_many_arguments)]
    fn create_review(
        &self,
        branch: &str,
        base_branch: &str,
        commit_sha: &str,
        review_type: ReviewType,
        priority: Priority,
        requester_id: i64,
        pr_ref: Option<&str>,
        now: &str,
    ) -> Result<Review> {
        self.with_conn(|c| {
            reviews::create(
                c,
                branch,
                base_branch,
                commit_sha,
                review_type,
                priority,
                requester_id,
                pr_ref,
                now,
            )
        })
    }

    fn review_by_id(&self, id: i64) -> Result<Option<Review>> {
        self.with_conn(|c| reviews::by_id(c, id))
    }

    fn list_reviews(&self, state: Option<ReviewState>, limit: i64) -> Result<Vec<Review>> {
        self.with_conn(|c| reviews::list(c, state, limit))
    }

    fn set_review_state(&self, id: i64, state: ReviewState, now: &str) -> Result<()> {
        self.with_conn(|c| reviews::set_state(c, id, state, now))
    }

    #[allow(clippy::too_many_arguments)]
    fn append_iteration(
        &self,
        review_id: i64,
        reviewer: &str,
        model: &str,
        decision: Decision,
        summary: &str,
        files_reviewed: i64,
        lines_analyzed: i64,
        duration_ms: i64,
        cost_usd: f64,
        started_at: &str,
        finished_at: &str,
    ) -> Result<i64> {
        self.with_conn(|c| {
            reviews::append_iteration(
                c,
                review_id,
                reviewer,
                model,
                decision,
                summary,
                files_reviewed,
                lines_analyzed,
                duration_ms,
                cost_usd,
                started_at,
                finished_at,
            )
        })
    }

    fn review_iterations(&self, review_id: i64) -> Result<Vec<ReviewIteration>> {
        self.with_conn(|c| reviews::iterations(c, review_id))
    }

    fn append_issue(&self, iteration_id: i64, draft: &IssueDraft) -> Result<i64> {
        self.with_conn(|c| reviews::append_issue(c, iteration_id, draft))
    }

    fn issues_for_review(&self, review_id: i64) -> Result<Vec<ReviewIssue>> {
        self.with_conn(|c| reviews::issues_for_review(c, review_id))
    }

    fn update_issue_status(&self, issue_id: i64, status: IssueStatus) -> Result<()> {
        self.with_conn(|c| reviews::update_issue_status(c, issue_id, status))
    }

    // --- Health/stats ---

    fn counts(&self) -> Result<(i64, i64, i64)> {
        self.with_conn(|c| {
            let agents: i64 = c.query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))?;
            let messages: i64 = c.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
            let open_reviews = reviews::open_review_count(c)?;
            Ok((agents, messages, open_reviews))
        })
    }
}

impl Ops for Store {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

impl Ops for Tx<'_> {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(self.conn)
    }
}

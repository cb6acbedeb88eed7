use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// Forward-only migration with a paired rollback script. The `down` SQL is
/// never executed automatically; it documents the operator escape hatch.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core",
        up: "
            CREATE TABLE agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                project TEXT NOT NULL DEFAULT '',
                branch TEXT NOT NULL DEFAULT '',
                purpose TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE(name, project, branch)
            );

            CREATE TABLE sessions (
                token TEXT PRIMARY KEY,
                agent_id INTEGER NOT NULL REFERENCES agents(id),
                started_at TEXT NOT NULL,
                ended_at TEXT
            );
            CREATE INDEX idx_sessions_agent ON sessions(agent_id);

            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL REFERENCES agents(id),
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                thread_id INTEGER,
                reply_to INTEGER REFERENCES messages(id),
                deadline TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_messages_thread ON messages(thread_id);
            CREATE INDEX idx_messages_sender ON messages(sender_id);

            CREATE TABLE message_recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                recipient_id INTEGER NOT NULL REFERENCES agents(id),
                state TEXT NOT NULL DEFAULT 'unread',
                snoozed_until TEXT,
                acknowledged_at TEXT,
                read_at TEXT,
                archived_at TEXT,
                deadline_missed_at TEXT,
                delete_at TEXT,
                UNIQUE(message_id, recipient_id)
            );
            CREATE INDEX idx_recipients_agent_state
                ON message_recipients(recipient_id, state);
            CREATE INDEX idx_recipients_message ON message_recipients(message_id);

            CREATE TABLE send_keys (
                sender_id INTEGER NOT NULL REFERENCES agents(id),
                idem_key TEXT NOT NULL,
                message_id INTEGER NOT NULL REFERENCES messages(id),
                created_at TEXT NOT NULL,
                UNIQUE(sender_id, idem_key)
            );

            CREATE TABLE topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE subscriptions (
                topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                agent_id INTEGER NOT NULL REFERENCES agents(id),
                created_at TEXT NOT NULL,
                PRIMARY KEY (topic_id, agent_id)
            );

            CREATE TABLE activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                target TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_activity_actor ON activity(actor_id, created_at);
            CREATE INDEX idx_activity_target ON activity(target, created_at);
        ",
        down: "
            DROP TABLE IF EXISTS activity;
            DROP TABLE IF EXISTS subscriptions;
            DROP TABLE IF EXISTS topics;
            DROP TABLE IF EXISTS send_keys;
            DROP TABLE IF EXISTS message_recipients;
            DROP TABLE IF EXISTS messages;
            DROP TABLE IF EXISTS sessions;
            DROP TABLE IF EXISTS agents;
        ",
    },
    Migration {
        version: 2,
        name: "reviews",
        up: "
            CREATE TABLE reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                branch TEXT NOT NULL,
                base_branch TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                review_type TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                state TEXT NOT NULL DEFAULT 'new',
                requester_id INTEGER NOT NULL REFERENCES agents(id),
                pr_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_reviews_state ON reviews(state);
            CREATE INDEX idx_reviews_requester ON reviews(requester_id);

            CREATE TABLE review_iterations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                review_id INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
                iteration INTEGER NOT NULL,
                reviewer TEXT NOT NULL,
                model TEXT NOT NULL,
                decision TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                files_reviewed INTEGER NOT NULL DEFAULT 0,
                lines_analyzed INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                UNIQUE(review_id, iteration)
            );

            CREATE TABLE review_issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                iteration_id INTEGER NOT NULL REFERENCES review_iterations(id) ON DELETE CASCADE,
                severity TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                file_path TEXT NOT NULL,
                line_start INTEGER NOT NULL,
                line_end INTEGER NOT NULL,
                description TEXT NOT NULL,
                suggestion TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'open'
            );
            CREATE INDEX idx_issues_iteration ON review_issues(iteration_id);
        ",
        down: "
            DROP TABLE IF EXISTS review_issues;
            DROP TABLE IF EXISTS review_iterations;
            DROP TABLE IF EXISTS reviews;
        ",
    },
    Migration {
        version: 3,
        name: "message_fts",
        up: "
            CREATE VIRTUAL TABLE messages_fts USING fts5(
                message_id UNINDEXED,
                subject,
                body,
                tokenize='porter unicode61'
            );
        ",
        down: "
            DROP TABLE IF EXISTS messages_fts;
        ",
    },
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(v)
}

/// Apply pending migrations under `PRAGMA user_version`. An existing
/// database is copied to `<db>.backup.<from>-<to>` before the first
/// pending migration runs.
pub fn apply(conn: &Connection, db_path: &Path) -> Result<()> {
    let current = current_version(conn)?;
    let latest = latest_version();
    if current >= latest {
        return Ok(());
    }

    if current > 0 && db_path.exists() {
        let backup = db_path.with_extension(format!("db.backup.{current}-{latest}"));
        std::fs::copy(db_path, &backup)?;
        println!("🗄️  Backed up database to {}", backup.display());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.up)?;
        conn.pragma_update(None, "user_version", migration.version)?;
        println!(
            "🗄️  Applied migration {} ({})",
            migration.version, migration.name
        );
    }
    Ok(())
}

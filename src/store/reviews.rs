use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::models::{
    Decision, IssueDraft, IssueStatus, Priority, Review, ReviewIssue, ReviewIteration,
    ReviewState, ReviewType, Severity,
};

const REVIEW_COLS: &str = "id, branch, base_branch, commit_sha, review_type, priority, state,
     requester_id, pr_ref, created_at, updated_at";

fn map_review(row: &rusqlite::Row) -> rusqlite::Result<Review> {
    let review_type: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let state: String = row.get(6)?;
    Ok(Review {
        id: row.get(0)?,
        branch: row.get(1)?,
        base_branch: row.get(2)?,
        commit_sha: row.get(3)?,
        review_type: ReviewType::parse(&review_type).unwrap_or(ReviewType::Full),
        priority: Priority::parse(&priority).unwrap_or(Priority::Normal),
        state: ReviewState::parse(&state).unwrap_or(ReviewState::New),
        requester_id: row.get(7)?,
        pr_ref: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn create(
    conn: &Connection,
    branch: &str,
    base_branch: &str,
    commit_sha: &str,
    review_type: ReviewType,
    priority: Priority,
    requester_id: i64,
    pr_ref: Option<&str>,
    now: &str,
) -> Result<Review> {
    conn.execute(
        "INSERT INTO reviews (branch, base_branch, commit_sha, review_type, priority, state,
                              requester_id, pr_ref, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'new', ?6, ?7, ?8, ?8)",
        params![
            branch,
            base_branch,
            commit_sha,
            review_type.as_str(),
            priority.as_str(),
            requester_id,
            pr_ref,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    by_id(conn, id)?.ok_or_else(|| Error::Internal("review row vanished after insert".into()))
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<Review>> {
    let review = conn
        .query_row(
            &format!("SELECT {REVIEW_COLS} FROM reviews WHERE id = ?1"),
            params![id],
            map_review,
        )
        .optional()?;
    Ok(review)
}

pub fn list(conn: &Connection, state: Option<ReviewState>, limit: i64) -> Result<Vec<Review>> {
    let sql = match state {
        Some(_) => format!(
            "SELECT {REVIEW_COLS} FROM reviews WHERE state = ?1 ORDER BY id DESC LIMIT ?2"
        ),
        None => format!("SELECT {REVIEW_COLS} FROM reviews ORDER BY id DESC LIMIT ?1"),
    };

    let mut stmt = conn.prepare(&sql)?;
    let reviews = match state {
        Some(s) => stmt
            .query_map(params![s.as_str(), limit], map_review)?
            .collect::<rusqlite::Result<_>>()?,
        None => stmt
            .query_map(params![limit], map_review)?
            .collect::<rusqlite::Result<_>>()?,
    };
    Ok(reviews)
}

pub fn set_state(conn: &Connection, id: i64, state: ReviewState, now: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE reviews SET state = ?1, updated_at = ?2 WHERE id = ?3",
        params![state.as_str(), now, id],
    )?;
    if n == 0 {
        return Err(Error::NotFound(format!("review {id}")));
    }
    Ok(())
}

// --- Iterations ---

fn map_iteration(row: &rusqlite::Row) -> rusqlite::Result<ReviewIteration> {
    let decision: String = row.get(5)?;
    Ok(ReviewIteration {
        id: row.get(0)?,
        review_id: row.get(1)?,
        iteration: row.get(2)?,
        reviewer: row.get(3)?,
        model: row.get(4)?,
        decision: Decision::parse(&decision).unwrap_or(Decision::Inconclusive),
        summary: row.get(6)?,
        files_reviewed: row.get(7)?,
        lines_analyzed: row.get(8)?,
        duration_ms: row.get(9)?,
        cost_usd: row.get(10)?,
        started_at: row.get(11)?,
        finished_at: row.get(12)?,
    })
}

const ITER_COLS: &str = "id, review_id, iteration, reviewer, model, decision, summary,
     files_reviewed, lines_analyzed, duration_ms, cost_usd, started_at, finished_at";

/// Append the next iteration for a review. Numbering is dense from 1;
/// the next number is derived inside the enclosing transaction.
#[allow(clippy::too_many_arguments)]
pub fn append_iteration(
    conn: &Connection,
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
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(iteration), 0) + 1 FROM review_iterations WHERE review_id = ?1",
        params![review_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO review_iterations (review_id, iteration, reviewer, model, decision, summary,
             files_reviewed, lines_analyzed, duration_ms, cost_usd, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            review_id,
            next,
            reviewer,
            model,
            decision.as_str(),
            summary,
            files_reviewed,
            lines_analyzed,
            duration_ms,
            cost_usd,
            started_at,
            finished_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn iterations(conn: &Connection, review_id: i64) -> Result<Vec<ReviewIteration>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITER_COLS} FROM review_iterations WHERE review_id = ?1 ORDER BY iteration ASC"
    ))?;
    let iterations = stmt
        .query_map(params![review_id], map_iteration)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(iterations)
}

// --- Issues ---

fn map_issue(row: &rusqlite::Row) -> rusqlite::Result<ReviewIssue> {
    let severity: String = row.get(2)?;
    let status: String = row.get(9)?;
    Ok(ReviewIssue {
        id: row.get(0)?,
        iteration_id: row.get(1)?,
        severity: Severity::parse(&severity).unwrap_or(Severity::Info),
        category: row.get(3)?,
        file_path: row.get(4)?,
        line_start: row.get(5)?,
        line_end: row.get(6)?,
        description: row.get(7)?,
        suggestion: row.get(8)?,
        status: IssueStatus::parse(&status).unwrap_or(IssueStatus::Open),
    })
}

const ISSUE_COLS: &str = "id, iteration_id, severity, category, file_path, line_start, line_end,
     description, suggestion, status";

pub fn append_issue(conn: &Connection, iteration_id: i64, draft: &IssueDraft) -> Result<i64> {
    if draft.line_start < 1 || draft.line_end < draft.line_start {
        return Err(Error::InvalidArgument(format!(
            "bad line range {}..{}",
            draft.line_start, draft.line_end
        )));
    }
    conn.execute(
        "INSERT INTO review_issues (iteration_id, severity, category, file_path, line_start,
             line_end, description, suggestion, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open')",
        params![
            iteration_id,
            draft.severity.as_str(),
            draft.category,
            draft.file_path,
            draft.line_start,
            draft.line_end,
            draft.description,
            draft.suggestion
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn issues_for_review(conn: &Connection, review_id: i64) -> Result<Vec<ReviewIssue>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ISSUE_COLS} FROM review_issues
         WHERE iteration_id IN (SELECT id FROM review_iterations WHERE review_id = ?1)
         ORDER BY id ASC"
    ))?;
    let issues = stmt
        .query_map(params![review_id], map_issue)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(issues)
}

pub fn update_issue_status(conn: &Connection, issue_id: i64, status: IssueStatus) -> Result<()> {
    let n = conn.execute(
        "UPDATE review_issues SET status = ?1 WHERE id = ?2",
        params![status.as_str(), issue_id],
    )?;
    if n == 0 {
        return Err(Error::NotFound(format!("issue {issue_id}")));
    }
    Ok(())
}

pub fn open_review_count(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reviews WHERE state NOT IN ('approved', 'rejected', 'cancelled')",
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

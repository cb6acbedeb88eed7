use serde::{Deserialize, Serialize};

// --- Enumerations ---
// Stored in SQLite as their snake_case wire form; `as_str`/`parse` are the
// single source of truth for that mapping.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// Sort rank for inbox ordering (urgent first).
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Unread,
    Read,
    Starred,
    Snoozed,
    Archived,
    Trash,
    Deleted,
}

impl RecipientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientState::Unread => "unread",
            RecipientState::Read => "read",
            RecipientState::Starred => "starred",
            RecipientState::Snoozed => "snoozed",
            RecipientState::Archived => "archived",
            RecipientState::Trash => "trash",
            RecipientState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(RecipientState::Unread),
            "read" => Some(RecipientState::Read),
            "starred" => Some(RecipientState::Starred),
            "snoozed" => Some(RecipientState::Snoozed),
            "archived" => Some(RecipientState::Archived),
            "trash" => Some(RecipientState::Trash),
            "deleted" => Some(RecipientState::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Full,
    Security,
    Performance,
    Architecture,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::Full => "full",
            ReviewType::Security => "security",
            ReviewType::Performance => "performance",
            ReviewType::Architecture => "architecture",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(ReviewType::Full),
            "security" => Some(ReviewType::Security),
            "performance" => Some(ReviewType::Performance),
            "architecture" => Some(ReviewType::Architecture),
            _ => None,
        }
    }

    /// Model selection is a pure function of review type: the deeper
    /// review kinds get the heavier model.
    pub fn model(&self) -> &'static str {
        match self {
            ReviewType::Security | ReviewType::Architecture => "reviewer-large",
            ReviewType::Full | ReviewType::Performance => "reviewer-small",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    New,
    PendingReview,
    UnderReview,
    ChangesRequested,
    ReReview,
    Approved,
    Rejected,
    Cancelled,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::New => "new",
            ReviewState::PendingReview => "pending_review",
            ReviewState::UnderReview => "under_review",
            ReviewState::ChangesRequested => "changes_requested",
            ReviewState::ReReview => "re_review",
            ReviewState::Approved => "approved",
            ReviewState::Rejected => "rejected",
            ReviewState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ReviewState::New),
            "pending_review" => Some(ReviewState::PendingReview),
            "under_review" => Some(ReviewState::UnderReview),
            "changes_requested" => Some(ReviewState::ChangesRequested),
            "re_review" => Some(ReviewState::ReReview),
            "approved" => Some(ReviewState::Approved),
            "rejected" => Some(ReviewState::Rejected),
            "cancelled" => Some(ReviewState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewState::Approved | ReviewState::Rejected | ReviewState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    RequestChanges,
    Reject,
    Inconclusive,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::RequestChanges => "request_changes",
            Decision::Reject => "reject",
            Decision::Inconclusive => "inconclusive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Decision::Approve),
            "request_changes" => Some(Decision::RequestChanges),
            "reject" => Some(Decision::Reject),
            "inconclusive" => Some(Decision::Inconclusive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Acknowledged,
    Fixed,
    WontFix,
    Duplicate,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::Fixed => "fixed",
            IssueStatus::WontFix => "wont_fix",
            IssueStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(IssueStatus::Open),
            "acknowledged" => Some(IssueStatus::Acknowledged),
            "fixed" => Some(IssueStatus::Fixed),
            "wont_fix" => Some(IssueStatus::WontFix),
            "duplicate" => Some(IssueStatus::Duplicate),
            _ => None,
        }
    }
}

// --- Agents ---

/// The identity triple interned by the agent registry. Canonical display
/// form is `name@project.branch`, with empty segments omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
}

impl AgentIdentity {
    pub fn display(&self) -> String {
        match (self.project.is_empty(), self.branch.is_empty()) {
            (true, _) => self.name.clone(),
            (false, true) => format!("{}@{}", self.name, self.project),
            (false, false) => format!("{}@{}.{}", self.name, self.project, self.branch),
        }
    }

    /// Parse a display form back into a triple: `name@project.branch`,
    /// `name@project`, or bare `name`.
    pub fn parse(display: &str) -> Self {
        match display.split_once('@') {
            None => AgentIdentity {
                name: display.to_string(),
                project: String::new(),
                branch: String::new(),
            },
            Some((name, rest)) => {
                let (project, branch) = match rest.split_once('.') {
                    Some((p, b)) => (p.to_string(), b.to_string()),
                    None => (rest.to_string(), String::new()),
                };
                AgentIdentity {
                    name: name.to_string(),
                    project,
                    branch,
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub project: String,
    pub branch: String,
    pub purpose: String,
    pub created_at: String,
    pub last_seen: String,
}

impl Agent {
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            name: self.name.clone(),
            project: self.project.clone(),
            branch: self.branch.clone(),
        }
    }

    pub fn display(&self) -> String {
        self.identity().display()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentWithStatus {
    #[serde(flatten)]
    pub agent: Agent,
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct EnsureIdentity {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartSession {
    pub token: String,
    pub agent_id: i64,
}

// --- Mail ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub created_at: String,
}

/// A message joined with the calling recipient's per-recipient row.
/// `cursor` is the recipient row id, monotonic per recipient.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboxEntry {
    #[serde(flatten)]
    pub message: Message,
    pub state: RecipientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
    /// Set when the message carries a deadline not yet acknowledged.
    pub deadline_pending: bool,
    pub cursor: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub reply_to: Option<i64>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: i64,
    /// True when an idempotency-key replay matched an earlier send.
    pub deduplicated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxPage {
    pub entries: Vec<InboxEntry>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResult {
    pub messages: Vec<InboxEntry>,
    /// Monotonic; pass back on the next poll.
    pub cursor: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub agent: String,
    pub to: RecipientState,
    #[serde(default)]
    pub snooze_until: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckRequest {
    pub agent: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckReceipt {
    pub message_id: i64,
    pub acknowledged_at: String,
}

/// Per-recipient state as shown on a full message fetch.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecipientStatus {
    pub agent_id: i64,
    pub agent: String,
    pub state: RecipientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: Message,
    pub recipients: Vec<RecipientStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadView {
    pub thread_id: i64,
    pub messages: Vec<Message>,
    pub count: usize,
}

// --- Topics ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTopic {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub from: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub message_id: i64,
    pub recipients: usize,
    pub deduplicated: bool,
}

// --- Activity ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Activity {
    pub id: i64,
    pub actor_id: i64,
    pub kind: String,
    pub target: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

// --- Reviews ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Review {
    pub id: i64,
    pub branch: String,
    pub base_branch: String,
    pub commit_sha: String,
    pub review_type: ReviewType,
    pub priority: Priority,
    pub state: ReviewState,
    pub requester_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReview {
    pub branch: String,
    pub base_branch: String,
    pub commit_sha: String,
    pub review_type: ReviewType,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub requester: String,
    #[serde(default)]
    pub pr_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReviewIteration {
    pub id: i64,
    pub review_id: i64,
    pub iteration: i64,
    pub reviewer: String,
    pub model: String,
    pub decision: Decision,
    pub summary: String,
    pub files_reviewed: i64,
    pub lines_analyzed: i64,
    pub duration_ms: i64,
    pub cost_usd: f64,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReviewIssue {
    pub id: i64,
    pub iteration_id: i64,
    pub severity: Severity,
    pub category: String,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub description: String,
    pub suggestion: String,
    pub status: IssueStatus,
}

/// Issue payload as produced by the reviewer, before persistence.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IssueDraft {
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateIssueStatus {
    pub status: IssueStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub review: Review,
    pub iterations: Vec<ReviewIteration>,
}

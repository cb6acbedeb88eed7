use rocket::http::Status;
use rocket::serde::json::Json;

/// Error taxonomy shared by the store, actors, routes, and the client.
///
/// Expected, caller-actionable errors (`NotFound`, `InvalidTransition`,
/// `DeadlinePassed`, ...) are surfaced unchanged; `ActorDead` and
/// `Internal` fail the enclosing request while the process keeps serving.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),
    #[error("deadline passed")]
    DeadlinePassed,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("actor {0} is no longer running")]
    ActorDead(String),
    #[error("mailbox full for actor {0}")]
    MailboxFull(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Exhausted(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wire identifier carried in every error response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::UnknownRecipient(_) => "unknown_recipient",
            Error::DeadlinePassed => "deadline_passed",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Timeout => "timeout",
            Error::Cancelled => "cancelled",
            Error::ActorDead(_) => "actor_dead",
            Error::MailboxFull(_) | Error::Unavailable(_) => "unavailable",
            Error::Exhausted(_) => "exhausted",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Error::NotFound(_) => Status::NotFound,
            Error::Conflict(_) => Status::Conflict,
            Error::InvalidTransition(_) | Error::DeadlinePassed => Status::UnprocessableEntity,
            Error::UnknownRecipient(_) | Error::InvalidArgument(_) => Status::BadRequest,
            Error::Timeout => Status::GatewayTimeout,
            Error::Cancelled => Status::BadRequest,
            Error::MailboxFull(_) | Error::Unavailable(_) | Error::Exhausted(_) => {
                Status::ServiceUnavailable
            }
            Error::ActorDead(_) | Error::Internal(_) => Status::InternalServerError,
        }
    }

    /// Exit code mapping for CLI callers: 0 success, 1 generic, 2 usage,
    /// 3 network unavailable (operation queued), 4 operation rejected.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => 2,
            Error::Unavailable(_) | Error::Timeout => 3,
            Error::InvalidTransition(_)
            | Error::DeadlinePassed
            | Error::UnknownRecipient(_)
            | Error::Conflict(_) => 4,
            _ => 1,
        }
    }

    /// Render as the JSON error tuple rocket routes return.
    pub fn api(&self) -> (Status, Json<serde_json::Value>) {
        (
            self.status(),
            Json(serde_json::json!({"error": self.to_string(), "kind": self.kind()})),
        )
    }
}

impl Error {
    /// Reconstruct from a wire error body (`kind` + message). Variants
    /// whose Display adds fixed text get that text stripped so it is not
    /// doubled on re-render.
    pub fn from_wire(kind: &str, message: String) -> Error {
        match kind {
            "not_found" => Error::NotFound(
                message
                    .strip_suffix(" not found")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            "conflict" => Error::Conflict(message),
            "invalid_transition" => Error::InvalidTransition(
                message
                    .strip_prefix("invalid transition: ")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            "unknown_recipient" => Error::UnknownRecipient(
                message
                    .strip_prefix("unknown recipient: ")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            "deadline_passed" => Error::DeadlinePassed,
            "invalid_argument" => Error::InvalidArgument(message),
            "timeout" => Error::Timeout,
            "cancelled" => Error::Cancelled,
            "unavailable" => Error::Unavailable(message),
            "exhausted" => Error::Exhausted(message),
            _ => Error::Internal(message),
        }
    }
}

/// True for the transient contention errors `with_tx` retries on.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            // Transient write contention; `with_tx` retries these.
            Error::Unavailable("database busy".into())
        } else {
            Error::Internal(format!("sqlite: {err}"))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("json: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(format!("io: {err}"))
    }
}

// RPC adapter. Each route validates its arguments, resolves the owning
// service actor through the registry, asks it, and maps the reply to wire
// JSON. No business logic lives here.

mod activity;
mod agents;
mod mail;
mod reviews;
mod stream;
mod system;
mod topics;

pub use activity::list_activity;
pub use agents::{
    agent_status, complete_session, ensure_identity, get_agent, heartbeat, list_agents,
    start_session,
};
pub use mail::{
    acknowledge_message, fetch_inbox, fetch_message, fetch_thread, send_message,
    transition_message,
};
pub use reviews::{
    cancel_review, create_review, get_review, list_review_issues, list_reviews, resubmit_review,
    update_issue_status,
};
pub use stream::poll_messages;
pub use system::{health, not_found, version};
pub use topics::{create_topic, list_subscribers, publish, subscribe, unsubscribe};

use std::time::Duration;

use rocket::http::Status;
use rocket::serde::json::Json;

use crate::error::Result;

/// Deadline for route-to-actor asks. Long polls carry their own.
pub(crate) const RPC_DEADLINE: Duration = Duration::from_secs(10);

pub(crate) type ApiError = (Status, Json<serde_json::Value>);
pub(crate) type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Lift a core result into the wire error shape.
pub(crate) fn api<T>(result: Result<T>) -> std::result::Result<T, ApiError> {
    result.map_err(|e| e.api())
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    crate::error::Error::InvalidArgument(message.to_string()).api()
}

use std::time::Duration;

use rocket::serde::json::Json;
use rocket::{State, get};

use super::{ApiResult, RPC_DEADLINE, api};
use crate::mail::{MailMsg, PollOutcome};
use crate::models::PollResult;
use crate::Services;

/// Long-poll endpoint: the keep-alive primitive. Returns immediately when
/// unread mail exists beyond `cursor`, otherwise blocks until new mail
/// arrives or `max_wait` elapses (empty result). The response cursor is
/// monotonic; pass it back on the next call.
#[get("/api/v1/inbox/<agent>/poll?<cursor>&<max_wait_ms>")]
pub async fn poll_messages(
    services: &State<Services>,
    agent: &str,
    cursor: Option<i64>,
    max_wait_ms: Option<u64>,
) -> ApiResult<PollResult> {
    let cursor = cursor.unwrap_or(0);
    let config_max = services.config.poll_max_wait;
    let max_wait = match max_wait_ms {
        Some(ms) => Duration::from_millis(ms).min(config_max),
        None => config_max,
    };

    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Poll {
                agent: agent.to_string(),
                cursor,
            },
            RPC_DEADLINE,
        )
        .await)?;

    match api(reply.into_poll())? {
        PollOutcome::Ready(result) => Ok(Json(result)),
        PollOutcome::Waiting {
            recipient_id,
            waiter_id,
            rx,
        } => {
            // The caller's task suspends here; the mail actor keeps
            // draining its mailbox.
            match tokio::time::timeout(max_wait, rx).await {
                Ok(Ok(messages)) => {
                    let new_cursor = messages
                        .iter()
                        .map(|e| e.cursor)
                        .max()
                        .unwrap_or(cursor)
                        .max(cursor);
                    Ok(Json(PollResult {
                        messages,
                        cursor: new_cursor,
                    }))
                }
                // Waiter dropped by the actor (shutdown): empty result.
                Ok(Err(_)) => Ok(Json(PollResult {
                    messages: Vec::new(),
                    cursor,
                })),
                // Deadline elapsed: clean up our waiter and return empty.
                Err(_) => {
                    let _ = mail.tell(MailMsg::CancelPoll {
                        recipient_id,
                        waiter_id,
                    });
                    Ok(Json(PollResult {
                        messages: Vec::new(),
                        cursor,
                    }))
                }
            }
        }
    }
}

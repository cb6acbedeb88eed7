use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiResult, RPC_DEADLINE, api, bad_request};
use crate::mail::MailMsg;
use crate::models::{
    AckReceipt, AckRequest, InboxPage, MessageDetail, Priority, RecipientState, SendMessage,
    SendReceipt, ThreadView, TransitionRequest,
};
use crate::store::InboxFilter;
use crate::Services;

#[post("/api/v1/messages", format = "json", data = "<body>")]
pub async fn send_message(
    services: &State<Services>,
    body: Json<SendMessage>,
) -> ApiResult<SendReceipt> {
    let body = body.into_inner();
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::SendDirect {
                from: body.from,
                to: body.to,
                subject: body.subject,
                body: body.body,
                priority: body.priority.unwrap_or(Priority::Normal),
                reply_to: body.reply_to,
                deadline: body.deadline,
                idempotency_key: body.idempotency_key,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_sent())?))
}

#[get("/api/v1/inbox/<agent>?<state>&<priority>&<sender>&<q>&<limit>&<cursor>")]
#[allow(clippy::too_many_arguments)]
pub async fn fetch_inbox(
    services: &State<Services>,
    agent: &str,
    state: Option<&str>,
    priority: Option<&str>,
    sender: Option<&str>,
    q: Option<&str>,
    limit: Option<i64>,
    cursor: Option<String>,
) -> ApiResult<InboxPage> {
    let mut filter = InboxFilter::default();
    if let Some(states) = state {
        for part in states.split(',').filter(|s| !s.trim().is_empty()) {
            let parsed = RecipientState::parse(part.trim())
                .ok_or_else(|| bad_request(&format!("unknown state {part:?}")))?;
            filter.states.push(parsed);
        }
    }
    if let Some(priority) = priority {
        filter.priority = Some(
            Priority::parse(priority)
                .ok_or_else(|| bad_request(&format!("unknown priority {priority:?}")))?,
        );
    }
    filter.sender = sender.map(str::to_string);
    filter.q = q.map(str::to_string);

    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::FetchInbox {
                agent: agent.to_string(),
                filter,
                limit: limit.unwrap_or(0),
                cursor,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_inbox())?))
}

#[get("/api/v1/messages/<id>")]
pub async fn fetch_message(services: &State<Services>, id: i64) -> ApiResult<MessageDetail> {
    let mail = api(services.mail())?;
    let reply = api(mail.ask_await(MailMsg::FetchMessage { id }, RPC_DEADLINE).await)?;
    Ok(Json(api(reply.into_message())?))
}

#[get("/api/v1/threads/<id>")]
pub async fn fetch_thread(services: &State<Services>, id: i64) -> ApiResult<ThreadView> {
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(MailMsg::FetchThread { thread_id: id }, RPC_DEADLINE)
        .await)?;
    Ok(Json(api(reply.into_thread())?))
}

#[post("/api/v1/messages/<id>/transition", format = "json", data = "<body>")]
pub async fn transition_message(
    services: &State<Services>,
    id: i64,
    body: Json<TransitionRequest>,
) -> ApiResult<serde_json::Value> {
    let body = body.into_inner();
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Transition {
                message_id: id,
                agent: body.agent,
                to: body.to,
                snooze_until: body.snooze_until,
            },
            RPC_DEADLINE,
        )
        .await)?;
    let state = api(reply.into_transitioned())?;
    Ok(Json(serde_json::json!({"message_id": id, "state": state})))
}

#[post("/api/v1/messages/<id>/ack", format = "json", data = "<body>")]
pub async fn acknowledge_message(
    services: &State<Services>,
    id: i64,
    body: Json<AckRequest>,
) -> ApiResult<AckReceipt> {
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Acknowledge {
                message_id: id,
                agent: body.into_inner().agent,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_acked())?))
}

use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiResult, RPC_DEADLINE, api};
use crate::mail::MailMsg;
use crate::models::{
    Agent, CreateTopic, Priority, PublishReceipt, PublishRequest, SubscribeRequest, Topic,
};
use crate::Services;

#[post("/api/v1/topics", format = "json", data = "<body>")]
pub async fn create_topic(services: &State<Services>, body: Json<CreateTopic>) -> ApiResult<Topic> {
    let body = body.into_inner();
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::CreateTopic {
                name: body.name,
                description: body.description,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_topic())?))
}

#[post("/api/v1/topics/<name>/subscribe", format = "json", data = "<body>")]
pub async fn subscribe(
    services: &State<Services>,
    name: &str,
    body: Json<SubscribeRequest>,
) -> ApiResult<serde_json::Value> {
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Subscribe {
                topic: name.to_string(),
                agent: body.into_inner().agent,
            },
            RPC_DEADLINE,
        )
        .await)?;
    let added = api(reply.into_subscribed())?;
    Ok(Json(serde_json::json!({"topic": name, "subscribed": added})))
}

#[post("/api/v1/topics/<name>/unsubscribe", format = "json", data = "<body>")]
pub async fn unsubscribe(
    services: &State<Services>,
    name: &str,
    body: Json<SubscribeRequest>,
) -> ApiResult<serde_json::Value> {
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Unsubscribe {
                topic: name.to_string(),
                agent: body.into_inner().agent,
            },
            RPC_DEADLINE,
        )
        .await)?;
    let removed = api(reply.into_subscribed())?;
    Ok(Json(
        serde_json::json!({"topic": name, "unsubscribed": removed}),
    ))
}

#[post("/api/v1/topics/<name>/publish", format = "json", data = "<body>")]
pub async fn publish(
    services: &State<Services>,
    name: &str,
    body: Json<PublishRequest>,
) -> ApiResult<PublishReceipt> {
    let body = body.into_inner();
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::Publish {
                topic: name.to_string(),
                from: body.from,
                subject: body.subject,
                body: body.body,
                priority: body.priority.unwrap_or(Priority::Normal),
                idempotency_key: body.idempotency_key,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_published())?))
}

#[get("/api/v1/topics/<name>/subscribers")]
pub async fn list_subscribers(services: &State<Services>, name: &str) -> ApiResult<Vec<Agent>> {
    let mail = api(services.mail())?;
    let reply = api(mail
        .ask_await(
            MailMsg::ListSubscribers {
                topic: name.to_string(),
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_subscribers())?))
}

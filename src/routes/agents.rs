use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiResult, RPC_DEADLINE, api, bad_request};
use crate::agents::AgentMsg;
use crate::models::{Agent, AgentIdentity, AgentStatus, AgentWithStatus, EnsureIdentity, StartSession};
use crate::Services;

#[post("/api/v1/agents/ensure", format = "json", data = "<body>")]
pub async fn ensure_identity(
    services: &State<Services>,
    body: Json<EnsureIdentity>,
) -> ApiResult<Agent> {
    let body = body.into_inner();
    let agents = api(services.agents())?;
    let reply = api(agents
        .ask_await(
            AgentMsg::Ensure {
                identity: AgentIdentity {
                    name: body.name.trim().to_string(),
                    project: body.project.trim().to_string(),
                    branch: body.branch.trim().to_string(),
                },
                purpose: body.purpose,
                session_token: body.session_token,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_agent())?))
}

#[get("/api/v1/agents?<status>")]
pub async fn list_agents(
    services: &State<Services>,
    status: Option<&str>,
) -> ApiResult<Vec<AgentWithStatus>> {
    let status = match status {
        Some(s) => Some(
            serde_json::from_value::<AgentStatus>(serde_json::json!(s))
                .map_err(|_| bad_request(&format!("unknown status {s:?}")))?,
        ),
        None => None,
    };
    let agents = api(services.agents())?;
    let reply = api(agents.ask_await(AgentMsg::List { status }, RPC_DEADLINE).await)?;
    Ok(Json(api(reply.into_agents())?))
}

#[get("/api/v1/agents/<id>")]
pub async fn get_agent(services: &State<Services>, id: i64) -> ApiResult<Agent> {
    let agents = api(services.agents())?;
    let reply = api(agents.ask_await(AgentMsg::Get { id }, RPC_DEADLINE).await)?;
    Ok(Json(api(reply.into_agent())?))
}

#[post("/api/v1/agents/<id>/heartbeat")]
pub async fn heartbeat(services: &State<Services>, id: i64) -> ApiResult<serde_json::Value> {
    let agents = api(services.agents())?;
    api(agents
        .ask_await(AgentMsg::Heartbeat { agent_id: id }, RPC_DEADLINE)
        .await)?;
    Ok(Json(serde_json::json!({"agent_id": id, "ok": true})))
}

#[get("/api/v1/agents/<id>/status")]
pub async fn agent_status(services: &State<Services>, id: i64) -> ApiResult<serde_json::Value> {
    let agents = api(services.agents())?;
    let reply = api(agents
        .ask_await(AgentMsg::StatusOf { agent_id: id }, RPC_DEADLINE)
        .await)?;
    let status = api(reply.into_status())?;
    Ok(Json(serde_json::json!({"agent_id": id, "status": status})))
}

#[post("/api/v1/sessions/start", format = "json", data = "<body>")]
pub async fn start_session(
    services: &State<Services>,
    body: Json<StartSession>,
) -> ApiResult<serde_json::Value> {
    let body = body.into_inner();
    if body.token.trim().is_empty() {
        return Err(bad_request("session token must not be empty"));
    }
    let agents = api(services.agents())?;
    api(agents
        .ask_await(
            AgentMsg::StartSession {
                token: body.token.clone(),
                agent_id: body.agent_id,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(serde_json::json!({"token": body.token, "ok": true})))
}

#[post("/api/v1/sessions/<token>/complete")]
pub async fn complete_session(
    services: &State<Services>,
    token: &str,
) -> ApiResult<serde_json::Value> {
    let agents = api(services.agents())?;
    api(agents
        .ask_await(
            AgentMsg::CompleteSession {
                token: token.to_string(),
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(serde_json::json!({"token": token, "ok": true})))
}

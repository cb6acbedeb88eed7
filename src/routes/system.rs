use rocket::serde::json::Json;
use rocket::{State, catch, get};

use super::{ApiResult, api};
use crate::store::Ops;
use crate::Services;

#[get("/api/v1/health")]
pub async fn health(services: &State<Services>) -> ApiResult<serde_json::Value> {
    let (agents, messages, open_reviews) = api(services.store.counts())?;
    // A live mail ref means the actor system came up; the counts query
    // already proved the store is reachable.
    let actors_up = services.mail().is_ok() && services.agents().is_ok();
    Ok(Json(serde_json::json!({
        "status": if actors_up { "ok" } else { "degraded" },
        "agents": agents,
        "messages": messages,
        "open_reviews": open_reviews,
    })))
}

#[get("/api/v1/version")]
pub fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "schema_version": crate::store::schema_version(),
    }))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "resource not found", "kind": "not_found"}))
}

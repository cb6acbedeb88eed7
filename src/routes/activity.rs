use rocket::serde::json::Json;
use rocket::{State, get};

use super::{ApiResult, api};
use crate::models::Activity;
use crate::store::{ActivityFilter, Ops};
use crate::Services;

/// Activity is read-only audit data; the route queries the store directly
/// instead of detouring through an actor.
#[get("/api/v1/activity?<actor>&<target>&<since>&<limit>")]
pub async fn list_activity(
    services: &State<Services>,
    actor: Option<i64>,
    target: Option<String>,
    since: Option<String>,
    limit: Option<i64>,
) -> ApiResult<Vec<Activity>> {
    let filter = ActivityFilter {
        actor_id: actor,
        target,
        since,
    };
    let limit = limit.unwrap_or(100).clamp(1, 1000);
    let events = api(services.store.list_activity(&filter, limit))?;
    Ok(Json(events))
}

use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiResult, RPC_DEADLINE, api, bad_request};
use crate::models::{
    CreateReview, Priority, Review, ReviewDetail, ReviewIssue, ReviewState, UpdateIssueStatus,
};
use crate::review::ReviewMsg;
use crate::Services;

#[post("/api/v1/reviews", format = "json", data = "<body>")]
pub async fn create_review(
    services: &State<Services>,
    body: Json<CreateReview>,
) -> ApiResult<Review> {
    let body = body.into_inner();
    let reviews = api(services.reviews())?;
    let reply = api(reviews
        .ask_await(
            ReviewMsg::Create {
                branch: body.branch,
                base_branch: body.base_branch,
                commit_sha: body.commit_sha,
                review_type: body.review_type,
                priority: body.priority.unwrap_or(Priority::Normal),
                requester: body.requester,
                pr_ref: body.pr_ref,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_review())?))
}

#[get("/api/v1/reviews?<state>&<limit>")]
pub async fn list_reviews(
    services: &State<Services>,
    state: Option<&str>,
    limit: Option<i64>,
) -> ApiResult<Vec<Review>> {
    let state = match state {
        Some(s) => Some(
            ReviewState::parse(s).ok_or_else(|| bad_request(&format!("unknown state {s:?}")))?,
        ),
        None => None,
    };
    let reviews = api(services.reviews())?;
    let reply = api(reviews
        .ask_await(
            ReviewMsg::List {
                state,
                limit: limit.unwrap_or(0),
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(api(reply.into_reviews())?))
}

#[get("/api/v1/reviews/<id>")]
pub async fn get_review(services: &State<Services>, id: i64) -> ApiResult<ReviewDetail> {
    let reviews = api(services.reviews())?;
    let reply = api(reviews.ask_await(ReviewMsg::Get { id }, RPC_DEADLINE).await)?;
    Ok(Json(api(reply.into_detail())?))
}

#[post("/api/v1/reviews/<id>/resubmit")]
pub async fn resubmit_review(services: &State<Services>, id: i64) -> ApiResult<Review> {
    let reviews = api(services.reviews())?;
    let reply = api(reviews
        .ask_await(ReviewMsg::Resubmit { id }, RPC_DEADLINE)
        .await)?;
    Ok(Json(api(reply.into_review())?))
}

#[post("/api/v1/reviews/<id>/cancel")]
pub async fn cancel_review(services: &State<Services>, id: i64) -> ApiResult<Review> {
    let reviews = api(services.reviews())?;
    let reply = api(reviews.ask_await(ReviewMsg::Cancel { id }, RPC_DEADLINE).await)?;
    Ok(Json(api(reply.into_review())?))
}

#[get("/api/v1/reviews/<id>/issues")]
pub async fn list_review_issues(
    services: &State<Services>,
    id: i64,
) -> ApiResult<Vec<ReviewIssue>> {
    let reviews = api(services.reviews())?;
    let reply = api(reviews
        .ask_await(ReviewMsg::ListIssues { id }, RPC_DEADLINE)
        .await)?;
    Ok(Json(api(reply.into_issues())?))
}

#[post("/api/v1/issues/<id>/status", format = "json", data = "<body>")]
pub async fn update_issue_status(
    services: &State<Services>,
    id: i64,
    body: Json<UpdateIssueStatus>,
) -> ApiResult<serde_json::Value> {
    let reviews = api(services.reviews())?;
    api(reviews
        .ask_await(
            ReviewMsg::UpdateIssueStatus {
                issue_id: id,
                status: body.into_inner().status,
            },
            RPC_DEADLINE,
        )
        .await)?;
    Ok(Json(serde_json::json!({"issue_id": id, "ok": true})))
}

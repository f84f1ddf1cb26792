use crate::{
    error::AppError,
    middleware::AuthUser,
    models::{Page, ReviewDecision, ViolationStatus, DEFAULT_PAGE_SIZE},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ViolationQuery {
    #[serde(default)]
    pub status: Option<ViolationStatus>,
    #[serde(default)]
    pub store_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: ReviewDecision,
    #[serde(default)]
    pub note: Option<String>,
}

/// GET /violations?status&store_id&limit&offset
/// Newest first
#[get("/violations")]
pub async fn list_violations(
    state: web::Data<AppState>,
    query: web::Query<ViolationQuery>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let page = Page::new(
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        query.offset.unwrap_or(0),
    );
    let violations = state
        .reviews
        .list(&user, query.status, query.store_id, page)
        .await?;
    Ok(HttpResponse::Ok().json(violations))
}

/// GET /violations/{id}
#[get("/violations/{id}")]
pub async fn get_violation(
    state: web::Data<AppState>,
    violation_id: web::Path<Uuid>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let violation = state.reviews.get(&user, violation_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(violation))
}

/// POST /violations/{id}/actions
/// `{ "action": "warning" | "block" | "dismiss", "note": "..." }`
#[post("/violations/{id}/actions")]
pub async fn act_on_violation(
    state: web::Data<AppState>,
    violation_id: web::Path<Uuid>,
    user: AuthUser,
    body: web::Json<ActionRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let violation = state
        .reviews
        .act(&user, violation_id.into_inner(), body.action, body.note)
        .await?;
    Ok(HttpResponse::Ok().json(violation))
}

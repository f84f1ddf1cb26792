use crate::{
    error::AppError,
    middleware::AuthUser,
    models::{Message, Page, ProductRef},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OpenChatRequest {
    pub store_id: Uuid,
    #[serde(default)]
    pub product: Option<ProductRef>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseChatRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub chat_id: Uuid,
    pub messages: Vec<Message>,
}

/// POST /chats
/// Open (or resume) the client's chat with a store
#[post("/chats")]
pub async fn open_chat(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<OpenChatRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let chat = state
        .channels
        .open_chat(&user, body.store_id, body.product)
        .await?;
    Ok(HttpResponse::Created().json(chat))
}

/// GET /chats/{id}/messages
/// History resync for a participant
#[get("/chats/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    chat_id: web::Path<Uuid>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let chat_id = chat_id.into_inner();
    let messages = state.channels.history(&user, chat_id).await?;
    Ok(HttpResponse::Ok().json(MessagesResponse { chat_id, messages }))
}

/// POST /chats/{id}/close
#[post("/chats/{id}/close")]
pub async fn close_chat(
    state: web::Data<AppState>,
    chat_id: web::Path<Uuid>,
    user: AuthUser,
    body: Option<web::Json<CloseChatRequest>>,
) -> Result<HttpResponse, AppError> {
    let reason = body.and_then(|b| b.into_inner().reason);
    let chat = state
        .channels
        .close_chat(&user, chat_id.into_inner(), reason)
        .await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// GET /stores/{store_id}/chats?limit&offset
/// Most recent activity first
#[get("/stores/{store_id}/chats")]
pub async fn list_store_chats(
    state: web::Data<AppState>,
    store_id: web::Path<Uuid>,
    page: web::Query<Page>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let chats = state
        .channels
        .list_store_chats(&user, store_id.into_inner(), page.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(chats))
}

/// GET /stores/{store_id}/chats/stats
#[get("/stores/{store_id}/chats/stats")]
pub async fn store_stats(
    state: web::Data<AppState>,
    store_id: web::Path<Uuid>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let stats = state
        .channels
        .store_stats(&user, store_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(stats))
}

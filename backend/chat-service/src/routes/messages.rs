use crate::{
    error::AppError,
    metrics,
    middleware::guards::User,
    models::{NewMessage, PageRequest},
    routes::conversations::ReadRequest,
    state::AppState,
    websocket::handlers::deliver_new_message,
};
use actix_web::{delete, get, post, web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

/// POST /messages
/// Same side effects as the socket `message:send` event.
#[post("/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<NewMessage>,
) -> Result<HttpResponse, AppError> {
    let sent = state.messages.send(user.id, body.into_inner()).await?;
    metrics::record_message_sent("rest");

    deliver_new_message(&state, &sent).await;
    Ok(HttpResponse::Created().json(sent.message))
}

/// GET /messages/conversation/{conversation_id}?page=&limit=
#[get("/messages/conversation/{conversation_id}")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .messages
        .list(user.id, conversation_id.into_inner(), query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/messages/{id}")]
pub async fn get_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.get(user.id, message_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(message))
}

#[post("/messages/{id}/read")]
pub async fn mark_message_read(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<ReadRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .mark_read(user.id, message_id.into_inner(), body.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .messages
        .delete(user.id, message_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted" })))
}

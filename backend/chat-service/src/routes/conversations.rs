use crate::{
    error::AppError,
    middleware::guards::User,
    services::LeaveOutcome,
    state::AppState,
    websocket::{message_types::ReadReceipt, WsOutboundEvent},
};
use actix_web::{delete, get, post, web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub user_id: Uuid,
}

/// POST /conversations
/// 201 when created, 200 when the participant set already had one.
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let (conversation, created) = state
        .conversations
        .create_or_get(user.id, &body.participants, body.project_id)
        .await?;

    if created {
        Ok(HttpResponse::Created().json(conversation))
    } else {
        Ok(HttpResponse::Ok().json(conversation))
    }
}

#[get("/conversations/user/{user_id}")]
pub async fn list_user_conversations(
    state: web::Data<AppState>,
    user: User,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversations = state
        .conversations
        .list_for_user(user.id, user_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(conversations))
}

#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .get_by_id(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations/{id}/read
/// Reset the caller's unread counter and mark every message from others read.
#[post("/conversations/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<ReadRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let conversation = state
        .conversations
        .mark_read(conversation_id, user.id, body.user_id)
        .await?;

    // Keep open sockets' receipt ticks in step with REST readers.
    let receipt = WsOutboundEvent::MessagesRead(ReadReceipt {
        conversation_id,
        user_id: body.user_id,
        read_at: Utc::now(),
    });
    if let Ok(payload) = receipt.to_json() {
        state
            .registry
            .broadcast_room(conversation_id, &payload, None)
            .await;
    }

    Ok(HttpResponse::Ok().json(conversation))
}

/// DELETE /conversations/{id}
/// Leave; the last participant out deletes the conversation and its messages.
#[delete("/conversations/{id}")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .conversations
        .leave(conversation_id.into_inner(), user.id)
        .await?;

    let status = match outcome {
        LeaveOutcome::Left(_) => "left",
        LeaveOutcome::Deleted => "deleted",
    };
    Ok(HttpResponse::Ok().json(json!({ "status": status })))
}

//! Gateway behaviour, independent of the socket actor.
//!
//! Every handler trusts only the identity bound to the connection; user ids
//! inside payloads are checked against it before anything happens.

use super::message_types::{ConversationUser, PresenceChange, ReadReceipt};
use super::{ConnectionId, WsInboundEvent, WsOutboundEvent};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::error_handling::public_error;
use crate::services::{notification, OfflineNotification, SentMessage};
use crate::state::AppState;
use chrono::Utc;
use error_types::error_codes;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Identity of an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub user_id: Uuid,
}

fn encode(event: &WsOutboundEvent) -> Option<String> {
    event
        .to_json()
        .map_err(|e| tracing::error!(error = %e, "failed to encode websocket event"))
        .ok()
}

async fn send_error(state: &AppState, session: SessionContext, code: &str, message: String) {
    if let Some(payload) = encode(&WsOutboundEvent::error(code, message)) {
        state.registry.send_to(session.connection_id, &payload).await;
    }
}

/// Register the connection, join every room the user belongs to, record
/// presence and announce the user.
pub async fn on_connect(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<(SessionContext, UnboundedReceiver<String>)> {
    let rooms = state.conversations.conversation_ids_for_user(user_id).await?;

    let (connection_id, rx) = state.registry.register(user_id).await;
    let session = SessionContext {
        connection_id,
        user_id,
    };

    for conversation_id in &rooms {
        state.registry.join(connection_id, *conversation_id).await;
    }

    if let Err(e) = state.presence.set_online(user_id, connection_id).await {
        state.registry.unregister(connection_id).await;
        return Err(e);
    }

    if let Some(payload) = encode(&WsOutboundEvent::UserOnline(PresenceChange { user_id })) {
        state
            .registry
            .broadcast_all(&payload, Some(connection_id))
            .await;
    }

    metrics::ws_connected();
    tracing::info!(%user_id, %connection_id, rooms = rooms.len(), "websocket connected");
    Ok((session, rx))
}

/// Drop the connection and announce the user offline if this was their
/// current session.
pub async fn on_disconnect(state: &AppState, session: SessionContext) {
    if state.registry.unregister(session.connection_id).await.is_none() {
        return;
    }
    metrics::ws_disconnected();

    let went_offline = match state
        .presence
        .set_offline(session.user_id, session.connection_id)
        .await
    {
        Ok(offline) => offline,
        Err(e) => {
            tracing::warn!(user_id = %session.user_id, error = %e, "failed to clear presence");
            false
        }
    };

    if went_offline {
        if let Some(payload) = encode(&WsOutboundEvent::UserOffline(PresenceChange {
            user_id: session.user_id,
        })) {
            state.registry.broadcast_all(&payload, None).await;
        }
    }

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        went_offline,
        "websocket disconnected"
    );
}

/// Parse one text frame and run it. Failures are reported to this
/// connection only.
pub async fn handle_text(state: &AppState, session: SessionContext, text: &str) {
    let event = match serde_json::from_str::<WsInboundEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(user_id = %session.user_id, error = %e, "rejected websocket frame");
            send_error(
                state,
                session,
                error_codes::VALIDATION_ERROR,
                "Unrecognised event or payload".to_string(),
            )
            .await;
            return;
        }
    };

    let name = event.name();
    if let Err(err) = handle_event(state, session, event).await {
        tracing::debug!(user_id = %session.user_id, event = name, error = %err, "websocket event failed");
        let (code, message) = public_error(&err);
        send_error(state, session, code, message).await;
    }
}

pub async fn handle_event(
    state: &AppState,
    session: SessionContext,
    event: WsInboundEvent,
) -> AppResult<()> {
    match event {
        WsInboundEvent::MessageSend(request) => {
            let conversation_id = request.conversation_id;
            let sent = state.messages.send(session.user_id, request).await?;
            metrics::record_message_sent("websocket");

            // The sender always gets the confirmation echo.
            state
                .registry
                .join(session.connection_id, conversation_id)
                .await;
            deliver_new_message(state, &sent).await;
        }

        WsInboundEvent::TypingStart(payload) => {
            relay_typing(state, session, payload, WsOutboundEvent::TypingStart(payload)).await?;
        }

        WsInboundEvent::TypingStop(payload) => {
            relay_typing(state, session, payload, WsOutboundEvent::TypingStop(payload)).await?;
        }

        WsInboundEvent::MessagesRead(payload) => {
            state
                .conversations
                .mark_read(payload.conversation_id, session.user_id, payload.user_id)
                .await?;

            let receipt = WsOutboundEvent::MessagesRead(ReadReceipt {
                conversation_id: payload.conversation_id,
                user_id: payload.user_id,
                read_at: Utc::now(),
            });
            if let Some(json) = encode(&receipt) {
                state
                    .registry
                    .broadcast_room(payload.conversation_id, &json, Some(session.connection_id))
                    .await;
            }
        }

        WsInboundEvent::JoinConversation(room) => {
            if !state
                .conversations
                .is_participant(room.conversation_id, session.user_id)
                .await?
            {
                return Err(AppError::Forbidden);
            }
            state
                .registry
                .join(session.connection_id, room.conversation_id)
                .await;
        }

        WsInboundEvent::LeaveConversation(room) => {
            state
                .registry
                .leave(session.connection_id, room.conversation_id)
                .await;
        }
    }
    Ok(())
}

async fn relay_typing(
    state: &AppState,
    session: SessionContext,
    payload: ConversationUser,
    event: WsOutboundEvent,
) -> AppResult<()> {
    if payload.user_id != session.user_id {
        return Err(AppError::Forbidden);
    }
    if !state
        .conversations
        .is_participant(payload.conversation_id, session.user_id)
        .await?
    {
        return Err(AppError::Forbidden);
    }

    if let Some(json) = encode(&event) {
        state
            .registry
            .broadcast_room(payload.conversation_id, &json, Some(session.connection_id))
            .await;
    }
    Ok(())
}

/// Fan a freshly sent message out to its room and hand participants without
/// a live connection to the offline notifier.
///
/// Shared by the REST and socket send paths.
pub async fn deliver_new_message(state: &AppState, sent: &SentMessage) {
    let message = &sent.message;
    if let Some(json) = encode(&WsOutboundEvent::MessageNew(message.clone())) {
        let delivered = state
            .registry
            .broadcast_room(message.conversation_id, &json, None)
            .await;
        tracing::debug!(message_id = %message.id, delivered, "message broadcast");
    }

    let mut offline = Vec::new();
    for recipient in &sent.recipients {
        let online = match state.presence.is_online(*recipient).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!(user_id = %recipient, error = %e, "presence lookup failed");
                false
            }
        };
        if !online {
            offline.push(OfflineNotification::new(
                *recipient,
                message.conversation_id,
                message.id,
                message.sender_id,
                &message.content,
            ));
        }
    }

    notification::dispatch(state.notifier.clone(), offline);
}

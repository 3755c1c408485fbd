use crate::models::{Message, NewMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{conversationId, userId}` carried by typing and read events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUser {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Inbound WebSocket events from client to server.
///
/// Frames look like `{"event": "typing:start", "data": {...}}`; anything that
/// does not match one of these variants is rejected before a handler runs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum WsInboundEvent {
    #[serde(rename = "message:send")]
    MessageSend(NewMessage),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationUser),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationUser),
    #[serde(rename = "messages:read")]
    MessagesRead(ConversationUser),
    #[serde(rename = "join:conversation")]
    JoinConversation(RoomRequest),
    #[serde(rename = "leave:conversation")]
    LeaveConversation(RoomRequest),
}

impl WsInboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSend(_) => "message:send",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::MessagesRead(_) => "messages:read",
            Self::JoinConversation(_) => "join:conversation",
            Self::LeaveConversation(_) => "leave:conversation",
        }
    }
}

/// Outbound WebSocket events from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum WsOutboundEvent {
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationUser),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationUser),
    #[serde(rename = "messages:read")]
    MessagesRead(ReadReceipt),
    #[serde(rename = "user:online")]
    UserOnline(PresenceChange),
    #[serde(rename = "user:offline")]
    UserOffline(PresenceChange),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl WsOutboundEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

//! Persistence seam for conversations and messages.
//!
//! Every method is atomic on its own. Services compose them and never
//! read-modify-write a counter themselves; see
//! [`ChatStore::insert_message_and_touch`].

pub mod memory;
pub mod postgres;

use crate::models::{Conversation, Message};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryChatStore;
pub use postgres::PostgresChatStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_conversation_by_key(&self, participant_key: &str)
        -> StoreResult<Option<Conversation>>;

    /// Insert a conversation. When another conversation already owns the
    /// same participant key, nothing is written and that one is returned.
    async fn insert_conversation(&self, conversation: Conversation) -> StoreResult<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Conversations containing `user_id`, most recent activity first,
    /// never-used conversations last.
    async fn list_conversations_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>>;

    /// Ids of every conversation containing `user_id`.
    async fn conversation_ids_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Replace the participant list, dropping unread counters of removed users.
    async fn set_participants(
        &self,
        id: Uuid,
        participants: &[Uuid],
    ) -> StoreResult<Option<Conversation>>;

    /// Delete all messages of the conversation, then the conversation.
    async fn delete_conversation_cascade(&self, id: Uuid) -> StoreResult<()>;

    async fn reset_unread(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Persist a new message and, in the same unit of work, bump every other
    /// participant's unread counter by one and refresh the preview.
    async fn insert_message_and_touch(&self, message: Message, preview: &str)
        -> StoreResult<Message>;

    /// One page in insertion order, plus the conversation's total count.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<Message>, u64)>;

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    /// Append `user_id` to `read_by` if absent.
    async fn add_reader(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Option<Message>>;

    /// Append `user_id` to every message in the conversation sent by someone
    /// else that does not already list them. Returns how many changed.
    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid)
        -> StoreResult<u64>;

    /// Returns false when the message did not exist.
    async fn delete_message(&self, id: Uuid) -> StoreResult<bool>;
}

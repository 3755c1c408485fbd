use super::{ChatStore, StoreResult};
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    /// participant key -> conversation id
    keys: HashMap<String, Uuid>,
    /// Insertion order doubles as the per-conversation sequence.
    messages: Vec<Message>,
}

impl Inner {
    /// Returns the key the conversation owned, if any.
    fn release_key(&mut self, conversation_id: Uuid) -> Option<String> {
        let owned = self
            .keys
            .iter()
            .find(|(_, id)| **id == conversation_id)
            .map(|(key, _)| key.clone())?;
        self.keys.remove(&owned);
        Some(owned)
    }

    /// Give a freed key to the oldest conversation whose participants still
    /// match it, so the set stays discoverable.
    fn hand_over_key(&mut self, key: String) {
        if self.keys.contains_key(&key) {
            return;
        }
        let heir = self
            .conversations
            .values()
            .filter(|c| c.participant_key() == key)
            .min_by_key(|c| (c.created_at, c.id))
            .map(|c| c.id);
        if let Some(heir) = heir {
            self.keys.insert(key, heir);
        }
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn find_conversation_by_key(
        &self,
        participant_key: &str,
    ) -> StoreResult<Option<Conversation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .keys
            .get(participant_key)
            .and_then(|id| inner.conversations.get(id))
            .cloned())
    }

    async fn insert_conversation(&self, conversation: Conversation) -> StoreResult<Conversation> {
        let key = conversation.participant_key();
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .keys
            .get(&key)
            .and_then(|id| inner.conversations.get(id))
        {
            return Ok(existing.clone());
        }

        inner.keys.insert(key, conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_conversations_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();

        // Some(_) > None, so reversing puts conversations without messages last.
        found.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn conversation_ids_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .map(|c| c.id)
            .collect())
    }

    async fn set_participants(
        &self,
        id: Uuid,
        participants: &[Uuid],
    ) -> StoreResult<Option<Conversation>> {
        let mut inner = self.inner.write().await;
        let Some(mut conversation) = inner.conversations.get(&id).cloned() else {
            return Ok(None);
        };

        conversation.participants = participants.to_vec();
        conversation
            .unread_count
            .retain(|user, _| participants.contains(user));
        conversation.updated_at = Utc::now();

        // A reduced set may collide with another conversation's identity; the
        // existing owner keeps the key and this one waits for it to free up.
        let key = conversation.participant_key();
        inner.conversations.insert(id, conversation.clone());
        let released = inner.release_key(id);
        if !inner.keys.contains_key(&key) {
            inner.keys.insert(key.clone(), id);
        }
        if let Some(old) = released.filter(|old| *old != key) {
            inner.hand_over_key(old);
        }

        Ok(Some(conversation))
    }

    async fn delete_conversation_cascade(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.messages.retain(|m| m.conversation_id != id);
        inner.conversations.remove(&id);
        if let Some(key) = inner.release_key(id) {
            inner.hand_over_key(key);
        }
        Ok(())
    }

    async fn reset_unread(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Conversation>> {
        let mut inner = self.inner.write().await;
        Ok(inner.conversations.get_mut(&id).map(|conversation| {
            if let Some(count) = conversation.unread_count.get_mut(&user_id) {
                *count = 0;
            }
            conversation.clone()
        }))
    }

    async fn insert_message_and_touch(
        &self,
        message: Message,
        preview: &str,
    ) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;

        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            for (user, count) in conversation.unread_count.iter_mut() {
                if *user != message.sender_id {
                    *count += 1;
                }
            }
            conversation.last_message = Some(preview.to_string());
            conversation.last_message_at = Some(message.created_at);
            conversation.updated_at = message.created_at;
        }

        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<Message>, u64)> {
        let inner = self.inner.read().await;
        let all: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        let total = all.len() as u64;
        let page = all
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn add_reader(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Option<Message>> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .map(|message| {
                message.mark_read_by(user_id);
                message.clone()
            }))
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id && m.sender_id != user_id)
        {
            if message.mark_read_by(user_id) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_message(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != id);
        Ok(inner.messages.len() != before)
    }
}

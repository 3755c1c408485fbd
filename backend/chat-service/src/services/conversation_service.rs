use crate::error::{AppError, AppResult};
use crate::models::{conversation::dedup_participants, Conversation};
use crate::store::ChatStore;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on `list_for_user` results.
pub const CONVERSATION_LIST_LIMIT: usize = 50;
pub const MIN_PARTICIPANTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// Conversation still has participants.
    Left(Conversation),
    /// The leaver was the last participant; conversation and messages are gone.
    Deleted,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Returns the conversation for this exact participant set, creating it on
    /// first use. The flag is true when a new conversation was created.
    pub async fn create_or_get(
        &self,
        requester: Uuid,
        participants: &[Uuid],
        project_id: Option<Uuid>,
    ) -> AppResult<(Conversation, bool)> {
        let participants = dedup_participants(participants);

        if !participants.contains(&requester) {
            return Err(AppError::Forbidden);
        }
        if participants.len() < MIN_PARTICIPANTS {
            return Err(AppError::Validation(format!(
                "a conversation needs at least {MIN_PARTICIPANTS} participants"
            )));
        }

        let key = crypto_core::hash_participants(&participants);
        if let Some(existing) = self.store.find_conversation_by_key(&key).await? {
            tracing::debug!(conversation_id = %existing.id, "reusing conversation");
            return Ok((existing, false));
        }

        let candidate = Conversation::new(&participants, project_id);
        let candidate_id = candidate.id;
        let stored = self.store.insert_conversation(candidate).await?;
        let created = stored.id == candidate_id;

        if created {
            tracing::info!(
                conversation_id = %stored.id,
                participants = stored.participants.len(),
                "conversation created"
            );
        }
        Ok((stored, created))
    }

    /// A user's own conversations, most recently active first.
    pub async fn list_for_user(&self, requester: Uuid, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        if requester != user_id {
            return Err(AppError::Forbidden);
        }
        Ok(self
            .store
            .list_conversations_for_user(user_id, CONVERSATION_LIST_LIMIT)
            .await?)
    }

    pub async fn get_by_id(&self, id: Uuid, requester: Uuid) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(AppError::conversation_not_found)?;

        if !conversation.is_participant(requester) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    /// Zero the caller's unread counter and add them to `read_by` of every
    /// message someone else sent.
    pub async fn mark_read(&self, id: Uuid, requester: Uuid, user_id: Uuid) -> AppResult<Conversation> {
        if requester != user_id {
            return Err(AppError::Forbidden);
        }
        self.get_by_id(id, user_id).await?;

        let marked = self.store.mark_conversation_read(id, user_id).await?;
        tracing::debug!(conversation_id = %id, %user_id, marked, "conversation read");

        self.store
            .reset_unread(id, user_id)
            .await?
            .ok_or_else(AppError::conversation_not_found)
    }

    pub async fn leave(&self, id: Uuid, user_id: Uuid) -> AppResult<LeaveOutcome> {
        let conversation = self.get_by_id(id, user_id).await?;

        let remaining: Vec<Uuid> = conversation.other_participants(user_id).collect();
        if remaining.is_empty() {
            self.store.delete_conversation_cascade(id).await?;
            tracing::info!(conversation_id = %id, "last participant left, conversation deleted");
            return Ok(LeaveOutcome::Deleted);
        }

        let updated = self
            .store
            .set_participants(id, &remaining)
            .await?
            .ok_or_else(AppError::conversation_not_found)?;
        tracing::info!(conversation_id = %id, %user_id, "participant left conversation");
        Ok(LeaveOutcome::Left(updated))
    }

    pub async fn is_participant(&self, id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .store
            .get_conversation(id)
            .await?
            .is_some_and(|c| c.is_participant(user_id)))
    }

    pub async fn conversation_ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self.store.conversation_ids_for_user(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, MessageType};
    use crate::store::InMemoryChatStore;

    fn setup() -> (ConversationService, InMemoryChatStore) {
        let store = InMemoryChatStore::new();
        (ConversationService::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_create_or_get_is_order_independent() {
        let (svc, _) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let (first, created) = svc.create_or_get(a, &[a, b], None).await.unwrap();
        assert!(created);
        let (second, created) = svc.create_or_get(b, &[b, a], None).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.unread_for(a), 0);
        assert_eq!(second.unread_for(b), 0);
    }

    #[tokio::test]
    async fn test_create_requires_requester_and_two_participants() {
        let (svc, _) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(
            svc.create_or_get(Uuid::new_v4(), &[a, b], None).await,
            Err(AppError::Forbidden)
        );
        assert!(matches!(
            svc.create_or_get(a, &[a, a], None).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(svc.create_or_get(a, &[], None).await, Err(AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_get_by_id_checks_membership() {
        let (svc, _) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = svc.create_or_get(a, &[a, b], None).await.unwrap();

        assert_eq!(svc.get_by_id(conv.id, b).await.unwrap().id, conv.id);
        assert_eq!(
            svc.get_by_id(conv.id, Uuid::new_v4()).await,
            Err(AppError::Forbidden)
        );
        assert_eq!(
            svc.get_by_id(Uuid::new_v4(), a).await,
            Err(AppError::conversation_not_found())
        );
    }

    #[tokio::test]
    async fn test_list_for_user_only_for_self() {
        let (svc, _) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        svc.create_or_get(a, &[a, b], None).await.unwrap();

        assert_eq!(svc.list_for_user(a, a).await.unwrap().len(), 1);
        assert_eq!(svc.list_for_user(b, a).await, Err(AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_mark_read_resets_counter_and_receipts() {
        let (svc, store) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = svc.create_or_get(a, &[a, b], None).await.unwrap();

        let sent = store
            .insert_message_and_touch(
                Message::new(conv.id, a, "env".into(), MessageType::Text, vec![]),
                "hello",
            )
            .await
            .unwrap();

        assert_eq!(svc.mark_read(conv.id, a, b).await, Err(AppError::Forbidden));

        let conv = svc.mark_read(conv.id, b, b).await.unwrap();
        assert_eq!(conv.unread_for(b), 0);
        let stored = store.get_message(sent.id).await.unwrap().unwrap();
        assert_eq!(stored.read_by, vec![a, b]);
    }

    #[tokio::test]
    async fn test_leave_shrinks_then_deletes() {
        let (svc, store) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = svc.create_or_get(a, &[a, b], None).await.unwrap();
        store
            .insert_message_and_touch(
                Message::new(conv.id, a, "env".into(), MessageType::Text, vec![]),
                "hi",
            )
            .await
            .unwrap();

        match svc.leave(conv.id, a).await.unwrap() {
            LeaveOutcome::Left(updated) => {
                assert_eq!(updated.participants, vec![b]);
                assert!(!updated.unread_count.contains_key(&a));
            }
            LeaveOutcome::Deleted => panic!("conversation should survive"),
        }

        assert_eq!(svc.leave(conv.id, b).await.unwrap(), LeaveOutcome::Deleted);
        assert!(store.get_conversation(conv.id).await.unwrap().is_none());
        assert_eq!(store.message_count().await, 0);
    }
}

//! Send, read and delete messages.
//!
//! Content and attachment metadata are encrypted before they reach the
//! store. Callers always get the decrypted view back.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Attachment, Conversation, Message, NewMessage, PageInfo, PageRequest, Paginated};
use crate::services::encryption::EncryptionService;
use crate::store::ChatStore;
use futures_util::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 10_000;
pub const MAX_ATTACHMENTS: usize = 10;

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Decrypted view of the stored message.
    pub message: Message,
    /// Participants other than the sender at send time.
    pub recipients: Vec<Uuid>,
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    encryption: EncryptionService,
}

impl MessageService {
    pub fn new(store: Arc<dyn ChatStore>, encryption: EncryptionService) -> Self {
        Self { store, encryption }
    }

    async fn conversation(&self, id: Uuid) -> AppResult<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(AppError::conversation_not_found)
    }

    async fn stored_message(&self, id: Uuid) -> AppResult<Message> {
        self.store
            .get_message(id)
            .await?
            .ok_or_else(AppError::message_not_found)
    }

    /// Decrypted view, or the stored form when the envelope is unreadable.
    async fn view_or_stored(&self, message: Message) -> Message {
        match self.encryption.decrypt_message(message.clone()).await {
            Ok(view) => view,
            Err(e) => {
                metrics::record_decryption_failure();
                tracing::warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "returning undecryptable message as stored"
                );
                message
            }
        }
    }

    pub async fn send(&self, requester: Uuid, request: NewMessage) -> AppResult<SentMessage> {
        if requester != request.sender_id {
            return Err(AppError::Forbidden);
        }

        let conversation = self.conversation(request.conversation_id).await?;
        if !conversation.is_participant(request.sender_id) {
            return Err(AppError::Forbidden);
        }

        validate(&request)?;

        let (envelope, sealed) = self
            .encryption
            .encrypt_parts(&request.content, request.attachments.clone())
            .await?;

        let stored = self
            .store
            .insert_message_and_touch(
                Message::new(
                    request.conversation_id,
                    request.sender_id,
                    envelope,
                    request.message_type,
                    sealed,
                ),
                &request.content,
            )
            .await?;

        tracing::info!(
            message_id = %stored.id,
            conversation_id = %stored.conversation_id,
            sender_id = %stored.sender_id,
            attachments = stored.attachments.len(),
            "message sent"
        );

        let message = Message {
            content: request.content,
            attachments: request
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    encrypted: false,
                    ..a
                })
                .collect(),
            ..stored
        };

        Ok(SentMessage {
            recipients: conversation.other_participants(message.sender_id).collect(),
            message,
        })
    }

    /// One page of a conversation, oldest first.
    ///
    /// A message that fails to decrypt is returned as stored instead of
    /// failing the page.
    pub async fn list(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
        page: PageRequest,
    ) -> AppResult<Paginated<Message>> {
        let conversation = self.conversation(conversation_id).await?;
        if !conversation.is_participant(requester) {
            return Err(AppError::Forbidden);
        }

        let (stored, total) = self
            .store
            .list_messages(conversation_id, page.offset(), page.limit() as usize)
            .await?;

        let items = join_all(stored.into_iter().map(|m| self.view_or_stored(m))).await;

        Ok(Paginated {
            items,
            pagination: PageInfo::new(page.page(), page.limit(), total),
        })
    }

    pub async fn mark_read(&self, requester: Uuid, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        if requester != user_id {
            return Err(AppError::Forbidden);
        }

        let message = self.stored_message(message_id).await?;
        let conversation = self.conversation(message.conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden);
        }

        let updated = self
            .store
            .add_reader(message_id, user_id)
            .await?
            .ok_or_else(AppError::message_not_found)?;
        Ok(self.view_or_stored(updated).await)
    }

    /// Only the sender may delete. Unread counters are left as they are.
    /// Returns the conversation the message belonged to.
    pub async fn delete(&self, requester: Uuid, message_id: Uuid) -> AppResult<Uuid> {
        let message = self.stored_message(message_id).await?;
        if message.sender_id != requester {
            return Err(AppError::Forbidden);
        }

        if !self.store.delete_message(message_id).await? {
            return Err(AppError::message_not_found());
        }
        tracing::info!(%message_id, conversation_id = %message.conversation_id, "message deleted");
        Ok(message.conversation_id)
    }

    pub async fn get(&self, requester: Uuid, message_id: Uuid) -> AppResult<Message> {
        let message = self.stored_message(message_id).await?;
        let conversation = self.conversation(message.conversation_id).await?;
        if !conversation.is_participant(requester) {
            return Err(AppError::Forbidden);
        }

        self.encryption.decrypt_message(message).await.inspect_err(|_| {
            metrics::record_decryption_failure();
        })
    }
}

fn validate(request: &NewMessage) -> AppResult<()> {
    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".into()));
    }
    if request.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if request.attachments.len() > MAX_ATTACHMENTS {
        return Err(AppError::Validation(format!(
            "at most {MAX_ATTACHMENTS} attachments per message"
        )));
    }
    if request
        .attachments
        .iter()
        .any(|a| a.url.trim().is_empty() || a.filename.trim().is_empty())
    {
        return Err(AppError::Validation(
            "attachment url and filename are required".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use crate::services::conversation_service::ConversationService;
    use crate::store::InMemoryChatStore;
    use crypto_core::EnvelopeCipher;

    struct Fixture {
        store: InMemoryChatStore,
        conversations: ConversationService,
        messages: MessageService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryChatStore::new();
        let shared: Arc<dyn ChatStore> = Arc::new(store.clone());
        let encryption =
            EncryptionService::new(EnvelopeCipher::new(Some("message-service-secret".into())));
        Fixture {
            conversations: ConversationService::new(shared.clone()),
            messages: MessageService::new(shared, encryption),
            store,
        }
    }

    fn text(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_encrypts_at_rest_and_bumps_unread() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();

        let sent = f.messages.send(a, text(conv.id, a, "hello")).await.unwrap();
        assert_eq!(sent.message.content, "hello");
        assert_eq!(sent.message.read_by, vec![a]);
        assert_eq!(sent.recipients, vec![b]);

        let stored = f.store.get_message(sent.message.id).await.unwrap().unwrap();
        assert_ne!(stored.content, "hello");
        assert!(EnvelopeCipher::looks_like_envelope(&stored.content));

        let conv = f.store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_for(a), 0);
        assert_eq!(conv.unread_for(b), 1);
        assert_eq!(conv.last_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_rejects_spoofed_sender_and_outsiders() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();

        assert_eq!(
            f.messages.send(a, text(conv.id, b, "as b")).await.unwrap_err(),
            AppError::Forbidden
        );
        assert_eq!(
            f.messages
                .send(outsider, text(conv.id, outsider, "hi"))
                .await
                .unwrap_err(),
            AppError::Forbidden
        );
        assert_eq!(
            f.messages
                .send(a, text(Uuid::new_v4(), a, "hi"))
                .await
                .unwrap_err(),
            AppError::conversation_not_found()
        );
    }

    #[tokio::test]
    async fn test_send_validation_persists_nothing() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();

        for content in ["", "   \n"] {
            assert!(matches!(
                f.messages.send(a, text(conv.id, a, content)).await,
                Err(AppError::Validation(_))
            ));
        }

        let too_long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            f.messages.send(a, text(conv.id, a, &too_long)).await,
            Err(AppError::Validation(_))
        ));

        let mut with_blank_attachment = text(conv.id, a, "see file");
        with_blank_attachment.attachments.push(Attachment {
            url: String::new(),
            filename: "a.txt".into(),
            size: 1,
            mime_type: "text/plain".into(),
            encrypted: false,
        });
        assert!(matches!(
            f.messages.send(a, with_blank_attachment).await,
            Err(AppError::Validation(_))
        ));

        assert_eq!(f.store.message_count().await, 0);
        let conv = f.store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_for(b), 0);
    }

    #[tokio::test]
    async fn test_list_paginates_oldest_first() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();

        for body in ["one", "two", "three"] {
            f.messages.send(a, text(conv.id, a, body)).await.unwrap();
        }

        let page = f
            .messages
            .list(b, conv.id, PageRequest { page: Some(1), limit: Some(2) })
            .await
            .unwrap();
        let bodies: Vec<&str> = page.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);

        assert_eq!(
            f.messages
                .list(Uuid::new_v4(), conv.id, PageRequest::default())
                .await
                .unwrap_err(),
            AppError::Forbidden
        );
    }

    #[tokio::test]
    async fn test_list_tolerates_corrupt_envelope() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();

        f.messages.send(a, text(conv.id, a, "fine")).await.unwrap();
        let corrupt = f
            .store
            .insert_message_and_touch(
                Message::new(conv.id, a, "a:b:c:d".into(), MessageType::Text, vec![]),
                "legacy",
            )
            .await
            .unwrap();

        let page = f.messages.list(b, conv.id, PageRequest::default()).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].content, "fine");
        assert_eq!(page.items[1].content, "a:b:c:d");

        assert!(matches!(
            f.messages.get(b, corrupt.id).await,
            Err(AppError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_guarded() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();
        let sent = f.messages.send(a, text(conv.id, a, "ping")).await.unwrap();

        assert_eq!(
            f.messages.mark_read(a, sent.message.id, b).await.unwrap_err(),
            AppError::Forbidden
        );

        let once = f.messages.mark_read(b, sent.message.id, b).await.unwrap();
        let twice = f.messages.mark_read(b, sent.message.id, b).await.unwrap();
        assert_eq!(once.read_by, vec![a, b]);
        assert_eq!(twice.read_by, vec![a, b]);
        assert_eq!(twice.content, "ping");
    }

    #[tokio::test]
    async fn test_delete_only_by_sender() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, _) = f.conversations.create_or_get(a, &[a, b], None).await.unwrap();
        let sent = f.messages.send(a, text(conv.id, a, "oops")).await.unwrap();

        assert_eq!(
            f.messages.delete(b, sent.message.id).await.unwrap_err(),
            AppError::Forbidden
        );
        assert_eq!(f.messages.delete(a, sent.message.id).await.unwrap(), conv.id);
        assert_eq!(
            f.messages.get(a, sent.message.id).await.unwrap_err(),
            AppError::message_not_found()
        );

        // Counter is not rebalanced.
        let conv = f.store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_for(b), 1);
    }
}

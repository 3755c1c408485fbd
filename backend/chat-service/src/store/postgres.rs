use super::{ChatStore, StoreError, StoreResult};
use crate::models::{Attachment, Conversation, Message, MessageType};
use async_trait::async_trait;
use deadpool_postgres::{Pool, Transaction};
use std::collections::HashMap;
use tokio_postgres::{types::Json, Client, Row};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str =
    "c.id, c.last_message, c.last_message_at, c.project_id, c.created_at, c.updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, \
     attachments, read_by, created_at, updated_at";

/// deadpool-postgres backed store.
///
/// Participants live in their own table so unread counters can be bumped
/// with a single `UPDATE ... SET unread_count = unread_count + 1`.
#[derive(Clone)]
pub struct PostgresChatStore {
    pool: Pool,
}

impl PostgresChatStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Attach participants and counters to bare conversation rows.
    async fn hydrate(client: &Client, rows: Vec<Row>) -> StoreResult<Vec<Conversation>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids = rows
            .iter()
            .map(|r| r.try_get::<_, Uuid>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        let participant_rows = client
            .query(
                "SELECT conversation_id, user_id, unread_count
                 FROM conversation_participants
                 WHERE conversation_id = ANY($1)
                 ORDER BY conversation_id, position",
                &[&ids],
            )
            .await?;

        let mut participants: HashMap<Uuid, Vec<(Uuid, i64)>> = HashMap::new();
        for row in participant_rows {
            participants
                .entry(row.try_get("conversation_id")?)
                .or_default()
                .push((row.try_get("user_id")?, row.try_get("unread_count")?));
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                conversation_from_row(row, participants.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn fetch_conversation(client: &Client, id: Uuid) -> StoreResult<Option<Conversation>> {
        let rows = client
            .query(
                &*format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1"),
                &[&id],
            )
            .await?;
        Ok(Self::hydrate(client, rows).await?.into_iter().next())
    }

    /// Give a freed key to the oldest keyless conversation with that set.
    async fn hand_over_key(tx: &Transaction<'_>, key: &str) -> StoreResult<()> {
        let moved = tx
            .execute(
                "UPDATE conversations SET participant_key = $1
                 WHERE id = (
                     SELECT id FROM conversations
                     WHERE participant_set = $1 AND participant_key IS NULL
                     ORDER BY created_at, id
                     LIMIT 1
                 )
                 AND NOT EXISTS (SELECT 1 FROM conversations WHERE participant_key = $1)",
                &[&key],
            )
            .await?;
        if moved > 0 {
            tracing::debug!(participant_key = key, "participant key handed over");
        }
        Ok(())
    }

    async fn fetch_message(client: &Client, id: Uuid) -> StoreResult<Option<Message>> {
        client
            .query_opt(
                &*format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"),
                &[&id],
            )
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }
}

fn conversation_from_row(row: &Row, participants: Vec<(Uuid, i64)>) -> StoreResult<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        participants: participants.iter().map(|(user, _)| *user).collect(),
        unread_count: participants.into_iter().collect(),
        last_message: row.try_get("last_message")?,
        last_message_at: row.try_get("last_message_at")?,
        project_id: row.try_get("project_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &Row) -> StoreResult<Message> {
    let message_type: String = row.try_get("message_type")?;
    let Json(attachments): Json<Vec<Attachment>> = row.try_get("attachments")?;

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        message_type: MessageType::from_db(&message_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown message type {message_type}")))?,
        attachments,
        read_by: row.try_get("read_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn find_conversation_by_key(
        &self,
        participant_key: &str,
    ) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.participant_key = $1"
                ),
                &[&participant_key],
            )
            .await?;
        Ok(Self::hydrate(&client, rows).await?.into_iter().next())
    }

    async fn insert_conversation(&self, conversation: Conversation) -> StoreResult<Conversation> {
        let key = conversation.participant_key();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // The unique key serialises concurrent creators of the same set.
        let inserted = tx
            .query_opt(
                "INSERT INTO conversations
                    (id, participant_key, participant_set, project_id, created_at, updated_at)
                 VALUES ($1, $2, $2, $3, $4, $5)
                 ON CONFLICT (participant_key) DO NOTHING
                 RETURNING id",
                &[
                    &conversation.id,
                    &key,
                    &conversation.project_id,
                    &conversation.created_at,
                    &conversation.updated_at,
                ],
            )
            .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            let rows = client
                .query(
                    &*format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.participant_key = $1"
                    ),
                    &[&key],
                )
                .await?;
            return Self::hydrate(&client, rows)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Database("conflicting conversation disappeared".into()));
        }

        for (position, user_id) in conversation.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position, unread_count)
                 VALUES ($1, $2, $3, 0)",
                &[&conversation.id, user_id, &(position as i32)],
            )
            .await?;
        }
        tx.commit().await?;

        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        Self::fetch_conversation(&client, id).await
    }

    async fn list_conversations_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT {CONVERSATION_COLUMNS}
                     FROM conversations c
                     JOIN conversation_participants p ON p.conversation_id = c.id
                     WHERE p.user_id = $1
                     ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC
                     LIMIT $2"
                ),
                &[&user_id, &(limit as i64)],
            )
            .await?;
        Self::hydrate(&client, rows).await
    }

    async fn conversation_ids_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        client
            .query(
                "SELECT conversation_id FROM conversation_participants WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .iter()
            .map(|row| row.try_get("conversation_id").map_err(StoreError::from))
            .collect()
    }

    async fn set_participants(
        &self,
        id: Uuid,
        participants: &[Uuid],
    ) -> StoreResult<Option<Conversation>> {
        let mut client = self.pool.get().await?;
        let key = crypto_core::hash_participants(participants);
        let tx = client.transaction().await?;

        let Some(locked) = tx
            .query_opt(
                "SELECT participant_key FROM conversations WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };
        let released: Option<String> = locked.try_get("participant_key")?;

        tx.execute(
            "DELETE FROM conversation_participants
             WHERE conversation_id = $1 AND NOT (user_id = ANY($2))",
            &[&id, &participants],
        )
        .await?;

        for (position, user_id) in participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position, unread_count)
                 VALUES ($1, $2, $3, 0)
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET position = EXCLUDED.position",
                &[&id, user_id, &(position as i32)],
            )
            .await?;
        }

        // A reduced set may collide with another conversation's identity; the
        // existing owner keeps the key and this one waits for it to free up.
        tx.execute(
            "UPDATE conversations
             SET updated_at = NOW(),
                 participant_set = $2,
                 participant_key = CASE
                     WHEN EXISTS (
                         SELECT 1 FROM conversations o
                         WHERE o.participant_key = $2 AND o.id <> $1
                     ) THEN NULL
                     ELSE $2
                 END
             WHERE id = $1",
            &[&id, &key],
        )
        .await?;
        if let Some(old) = released.filter(|old| *old != key) {
            Self::hand_over_key(&tx, &old).await?;
        }
        tx.commit().await?;

        Self::fetch_conversation(&client, id).await
    }

    async fn delete_conversation_cascade(&self, id: Uuid) -> StoreResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM messages WHERE conversation_id = $1", &[&id])
            .await?;
        let released: Option<String> = match tx
            .query_opt(
                "DELETE FROM conversations WHERE id = $1 RETURNING participant_key",
                &[&id],
            )
            .await?
        {
            Some(row) => row.try_get("participant_key")?,
            None => None,
        };
        if let Some(key) = released {
            Self::hand_over_key(&tx, &key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reset_unread(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE conversation_participants SET unread_count = 0
                 WHERE conversation_id = $1 AND user_id = $2",
                &[&id, &user_id],
            )
            .await?;
        Self::fetch_conversation(&client, id).await
    }

    async fn insert_message_and_touch(
        &self,
        message: Message,
        preview: &str,
    ) -> StoreResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            "INSERT INTO messages
                (id, conversation_id, sender_id, content, message_type, attachments, read_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &message.id,
                &message.conversation_id,
                &message.sender_id,
                &message.content,
                &message.message_type.to_db(),
                &Json(&message.attachments),
                &message.read_by,
                &message.created_at,
                &message.updated_at,
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversation_participants SET unread_count = unread_count + 1
             WHERE conversation_id = $1 AND user_id <> $2",
            &[&message.conversation_id, &message.sender_id],
        )
        .await?;

        tx.execute(
            "UPDATE conversations SET last_message = $2, last_message_at = $3, updated_at = $3
             WHERE id = $1",
            &[&message.conversation_id, &preview, &message.created_at],
        )
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<Message>, u64)> {
        let client = self.pool.get().await?;

        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = $1",
                &[&conversation_id],
            )
            .await?
            .try_get(0)?;

        let rows = client
            .query(
                &*format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = $1
                     ORDER BY seq ASC
                     OFFSET $2 LIMIT $3"
                ),
                &[&conversation_id, &(offset as i64), &(limit as i64)],
            )
            .await?;

        let messages = rows
            .iter()
            .map(message_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((messages, total.max(0) as u64))
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let client = self.pool.get().await?;
        Self::fetch_message(&client, id).await
    }

    async fn add_reader(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Option<Message>> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE messages SET read_by = array_append(read_by, $2), updated_at = NOW()
                 WHERE id = $1 AND NOT ($2 = ANY(read_by))",
                &[&message_id, &user_id],
            )
            .await?;
        Self::fetch_message(&client, message_id).await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<u64> {
        let client = self.pool.get().await?;
        let changed = client
            .execute(
                "UPDATE messages SET read_by = array_append(read_by, $2), updated_at = NOW()
                 WHERE conversation_id = $1 AND sender_id <> $2 AND NOT ($2 = ANY(read_by))",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(changed)
    }

    async fn delete_message(&self, id: Uuid) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM messages WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }
}

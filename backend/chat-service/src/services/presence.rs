//! Who currently holds an open gateway connection.
//!
//! One entry per user pointing at their most recent connection. A second
//! connection replaces the first; when the older one closes it must not
//! take the newer session offline, so removal is conditional on the
//! connection id.

use crate::error::{AppError, AppResult};
use crate::redis_client::RedisClient;
use crate::websocket::ConnectionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Point `user_id` at `connection`, replacing any earlier connection.
    async fn set_online(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<()>;

    /// Clear the entry if it still belongs to `connection`.
    /// Returns true when the user is now offline.
    async fn set_offline(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<bool>;

    async fn is_online(&self, user_id: Uuid) -> AppResult<bool>;

    /// Keep the entry alive while the connection heartbeats.
    async fn refresh(&self, _user_id: Uuid, _connection: ConnectionId) -> AppResult<()> {
        Ok(())
    }
}

/// Presence for a single instance; lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryPresence {
    inner: Arc<RwLock<HashMap<Uuid, ConnectionId>>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn set_online(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<()> {
        if let Some(previous) = self.inner.write().await.insert(user_id, connection) {
            tracing::debug!(%user_id, %previous, %connection, "presence replaced by newer connection");
        }
        Ok(())
    }

    async fn set_offline(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        match guard.get(&user_id) {
            Some(current) if *current == connection => {
                guard.remove(&user_id);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    async fn is_online(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.inner.read().await.contains_key(&user_id))
    }
}

pub const PRESENCE_KEY_PREFIX: &str = "chat:presence:user:";
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 60;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 1
end
return 0
"#;

const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Presence shared by every instance through Redis.
///
/// Entries expire unless refreshed, so a crashed instance cannot leave its
/// users online forever.
#[derive(Clone)]
pub struct RedisPresence {
    redis: RedisClient,
    ttl_secs: u64,
}

impl RedisPresence {
    pub fn new(redis: RedisClient) -> Self {
        Self::with_ttl(redis, DEFAULT_PRESENCE_TTL_SECS)
    }

    pub fn with_ttl(redis: RedisClient, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    pub fn key(user_id: Uuid) -> String {
        format!("{PRESENCE_KEY_PREFIX}{user_id}")
    }
}

fn redis_error(e: redis::RedisError) -> AppError {
    AppError::Internal(format!("presence: {e}"))
}

#[async_trait]
impl PresenceStore for RedisPresence {
    async fn set_online(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<()> {
        let mut conn = self.redis.connection();
        redis::cmd("SET")
            .arg(Self::key(user_id))
            .arg(connection.to_string())
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)
    }

    async fn set_offline(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<bool> {
        let mut conn = self.redis.connection();
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(user_id))
            .arg(connection.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(released == 1)
    }

    async fn is_online(&self, user_id: Uuid) -> AppResult<bool> {
        let mut conn = self.redis.connection();
        redis::cmd("EXISTS")
            .arg(Self::key(user_id))
            .query_async::<_, bool>(&mut conn)
            .await
            .map_err(redis_error)
    }

    async fn refresh(&self, user_id: Uuid, connection: ConnectionId) -> AppResult<()> {
        let mut conn = self.redis.connection();
        redis::Script::new(REFRESH_SCRIPT)
            .key(Self::key(user_id))
            .arg(connection.to_string())
            .arg(self.ttl_secs)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(redis_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_writer_wins() {
        let presence = InMemoryPresence::new();
        let user = Uuid::new_v4();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        presence.set_online(user, old).await.unwrap();
        presence.set_online(user, new).await.unwrap();

        // Closing the replaced socket keeps the user online.
        assert!(!presence.set_offline(user, old).await.unwrap());
        assert!(presence.is_online(user).await.unwrap());

        assert!(presence.set_offline(user, new).await.unwrap());
        assert!(!presence.is_online(user).await.unwrap());
    }

    #[tokio::test]
    async fn test_presence_is_per_user() {
        let presence = InMemoryPresence::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conn_a = ConnectionId::new();
        presence.set_online(a, conn_a).await.unwrap();
        presence.set_online(b, ConnectionId::new()).await.unwrap();

        assert!(presence.set_offline(a, conn_a).await.unwrap());
        assert!(!presence.is_online(a).await.unwrap());
        assert!(presence.is_online(b).await.unwrap());
    }

    #[test]
    fn test_redis_key_layout() {
        let user = Uuid::nil();
        assert_eq!(
            RedisPresence::key(user),
            "chat:presence:user:00000000-0000-0000-0000-000000000000"
        );
    }
}

use crate::{
    config::Config,
    db,
    error::AppError,
    redis_client::RedisClient,
    services::{
        ConversationService, EncryptionService, InMemoryPresence, LogNotifier, MessageService,
        OfflineNotifier, PresenceStore, RedisPresence, WebhookNotifier,
    },
    store::{ChatStore, InMemoryChatStore, PostgresChatStore},
    websocket::ConnectionRegistry,
};
use crypto_core::{EnvelopeCipher, JwtVerifier};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub registry: ConnectionRegistry,
    pub presence: Arc<dyn PresenceStore>,
    pub notifier: Arc<dyn OfflineNotifier>,
    /// `None` when no verification key is configured.
    pub jwt: Option<Arc<JwtVerifier>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        encryption: EncryptionService,
        presence: Arc<dyn PresenceStore>,
        notifier: Arc<dyn OfflineNotifier>,
        jwt: Option<Arc<JwtVerifier>>,
    ) -> Self {
        Self {
            config,
            conversations: ConversationService::new(store.clone()),
            messages: MessageService::new(store, encryption),
            registry: ConnectionRegistry::new(),
            presence,
            notifier,
            jwt,
        }
    }

    /// Pick backends from configuration: Postgres when `DATABASE_URL` is set,
    /// Redis presence when `REDIS_URL` is set, a webhook notifier when
    /// `NOTIFICATION_WEBHOOK_URL` is set.
    pub async fn from_config(config: Arc<Config>) -> Result<Self, AppError> {
        let store: Arc<dyn ChatStore> = match &config.database_url {
            Some(url) => Arc::new(PostgresChatStore::new(db::init_pool(url).await?)),
            None => {
                tracing::warn!("DATABASE_URL not set, messages are kept in memory only");
                Arc::new(InMemoryChatStore::new())
            }
        };

        let presence: Arc<dyn PresenceStore> = match &config.redis_url {
            Some(url) => {
                let redis = RedisClient::from_url(url)
                    .await
                    .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
                Arc::new(RedisPresence::new(redis))
            }
            None => {
                tracing::info!("REDIS_URL not set, presence is local to this instance");
                Arc::new(InMemoryPresence::new())
            }
        };

        let notifier: Arc<dyn OfflineNotifier> = match &config.notification_webhook_url {
            Some(url) => Arc::new(
                WebhookNotifier::new(url.clone())
                    .map_err(|e| AppError::Config(format!("notification webhook: {e}")))?,
            ),
            None => Arc::new(LogNotifier),
        };

        let encryption =
            EncryptionService::new(EnvelopeCipher::new(config.encryption_secret.clone()));
        if !encryption.is_configured() {
            tracing::warn!("ENCRYPTION_SECRET not set, sending messages will fail");
        }

        let jwt = config.jwt_verifier()?.map(Arc::new);
        match &jwt {
            Some(verifier) => {
                tracing::info!(algorithm = ?verifier.algorithm(), "bearer token verification enabled")
            }
            None => tracing::warn!("no JWT key configured, authenticated routes will answer 500"),
        }

        Ok(Self::new(config, store, encryption, presence, notifier, jwt))
    }
}

//! Fire-and-forget hooks for participants with no open connection.

use crate::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Longest preview handed to the notification service, in characters.
pub const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfflineNotification {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

impl OfflineNotification {
    pub fn new(
        user_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Self {
        Self {
            user_id,
            conversation_id,
            message_id,
            sender_id,
            preview: content.chars().take(PREVIEW_CHARS).collect(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned {0}")]
    Status(u16),
}

#[async_trait]
pub trait OfflineNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &OfflineNotification) -> Result<(), NotifyError>;
}

/// Default notifier when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OfflineNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, n: &OfflineNotification) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %n.user_id,
            conversation_id = %n.conversation_id,
            message_id = %n.message_id,
            "offline delivery requested"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to an external service.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl OfflineNotifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, n: &OfflineNotification) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(n).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Deliver in the background. Failures are logged and counted, never
/// reported to the sender.
pub fn dispatch(notifier: Arc<dyn OfflineNotifier>, notifications: Vec<OfflineNotification>) {
    if notifications.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for n in notifications {
            match notifier.notify(&n).await {
                Ok(()) => metrics::record_offline_notification("sent"),
                Err(e) => {
                    metrics::record_offline_notification("failed");
                    tracing::warn!(
                        notifier = notifier.name(),
                        user_id = %n.user_id,
                        message_id = %n.message_id,
                        error = %e,
                        "offline notification failed"
                    );
                }
            }
        }
    });
}

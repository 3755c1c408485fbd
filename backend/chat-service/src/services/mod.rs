pub mod conversation_service;
pub mod encryption;
pub mod message_service;
pub mod notification;
pub mod presence;

pub use conversation_service::{ConversationService, LeaveOutcome};
pub use encryption::EncryptionService;
pub use message_service::{MessageService, SentMessage};
pub use notification::{LogNotifier, OfflineNotification, OfflineNotifier, WebhookNotifier};
pub use presence::{InMemoryPresence, PresenceStore, RedisPresence};

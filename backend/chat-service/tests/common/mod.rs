#![allow(dead_code, unused_macros)]

use async_trait::async_trait;
use chrono::Duration;
use crypto_core::jwt::{issue_hs256, Claims};
use crypto_core::{EnvelopeCipher, JwtVerifier};
use marketplace_chat_service::{
    config::Config,
    services::{
        notification::NotifyError, EncryptionService, InMemoryPresence, OfflineNotification,
        OfflineNotifier,
    },
    state::AppState,
    store::InMemoryChatStore,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const JWT_SECRET: &[u8] = b"chat-service-test-secret-32-bytes!!";
pub const ENCRYPTION_SECRET: &str = "chat-service-test-encryption-secret";

/// Collects offline notifications instead of sending them anywhere.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<OfflineNotification>>>,
}

impl RecordingNotifier {
    pub fn seen(&self) -> Vec<OfflineNotification> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait for the background dispatch task to deliver `count` items.
    pub async fn wait_for(&self, count: usize) -> Vec<OfflineNotification> {
        for _ in 0..100 {
            let seen = self.seen();
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.seen()
    }
}

#[async_trait]
impl OfflineNotifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, n: &OfflineNotification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(n.clone());
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryChatStore>,
    pub notifier: RecordingNotifier,
}

pub fn harness() -> Harness {
    harness_with(Some(Arc::new(JwtVerifier::from_secret(JWT_SECRET))))
}

pub fn harness_with(jwt: Option<Arc<JwtVerifier>>) -> Harness {
    let store = Arc::new(InMemoryChatStore::new());
    let notifier = RecordingNotifier::default();
    let state = AppState::new(
        Arc::new(Config::default()),
        store.clone(),
        EncryptionService::new(EnvelopeCipher::new(Some(ENCRYPTION_SECRET.to_string()))),
        Arc::new(InMemoryPresence::new()),
        Arc::new(notifier.clone()),
        jwt,
    );
    Harness {
        state,
        store,
        notifier,
    }
}

pub fn token_for(user_id: Uuid) -> String {
    issue_hs256(JWT_SECRET, &Claims::new(user_id, Duration::hours(1))).expect("Failed to encode JWT")
}

pub fn bearer(user_id: Uuid) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token_for(user_id)))
}

/// Service wired exactly like `main`, minus the outer middleware stack.
macro_rules! chat_app {
    ($state:expr) => {{
        let state = $state.clone();
        let verifier = state.jwt.clone();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(move |cfg| {
                    marketplace_chat_service::routes::configure(cfg, verifier)
                }),
        )
        .await
    }};
}

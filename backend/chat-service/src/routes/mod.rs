pub mod conversations;
pub mod messages;
pub mod wsroute;

use crate::error::AppError;
use crate::metrics::metrics_handler;
use actix_middleware::JwtAuthMiddleware;
use actix_web::{web, HttpResponse};
use crypto_core::JwtVerifier;
use serde_json::json;
use std::sync::Arc;

/// Request bodies larger than this are rejected before deserialising.
pub const JSON_LIMIT_BYTES: usize = 256 * 1024;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT_BYTES)
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

/// Every route of the service. `/health`, `/metrics` and `/ws` sit outside
/// the bearer-token middleware; the socket authenticates its own handshake.
pub fn configure(cfg: &mut web::ServiceConfig, verifier: Option<Arc<JwtVerifier>>) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .service(wsroute::ws_handler)
        .service(
            web::scope("")
                .wrap(JwtAuthMiddleware::new(verifier))
                .service(conversations::create_conversation)
                .service(conversations::list_user_conversations)
                .service(conversations::get_conversation)
                .service(conversations::mark_conversation_read)
                .service(conversations::leave_conversation)
                .service(messages::send_message)
                .service(messages::list_messages)
                .service(messages::get_message)
                .service(messages::mark_message_read)
                .service(messages::delete_message),
        );
}

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use marketplace_chat_service::{config::Config, error::AppError, logging, routes, state::AppState};
use std::sync::Arc;

fn cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if allowed_origins.is_empty() {
        return cors.allow_any_origin();
    }
    allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);
    tracing::info!(config = ?cfg, "loaded configuration");

    let state = AppState::from_config(cfg.clone()).await?;
    let verifier = state.jwt.clone();

    let bind_addr = cfg.bind_addr();
    tracing::info!(%bind_addr, "starting marketplace-chat-service");

    HttpServer::new(move || {
        let verifier = verifier.clone();
        App::new()
            .wrap(cors(&cfg.cors_allowed_origins))
            .wrap(actix_middleware::MetricsMiddleware)
            .wrap(Logger::new(r#"%a "%r" %s %b %T request_id=%{x-request-id}o"#))
            .wrap(actix_middleware::RequestId::new())
            .app_data(web::Data::new(state.clone()))
            .configure(move |c| routes::configure(c, verifier))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))
}

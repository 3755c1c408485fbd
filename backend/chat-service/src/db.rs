use crate::error::AppError;
use crate::migrations;
use db_pool::{create_pool, DbConfig, PgPool};

pub const SERVICE_NAME: &str = "marketplace-chat-service";

/// Connect, verify and bring the schema up to date.
pub async fn init_pool(database_url: &str) -> Result<PgPool, AppError> {
    let cfg = DbConfig::with_url(SERVICE_NAME, database_url);
    cfg.log_config();

    let pool = create_pool(cfg)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
    migrations::run_all(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;
    Ok(pool)
}

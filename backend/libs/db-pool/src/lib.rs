//! Database connection pool management
//!
//! Builds a deadpool-postgres pool from environment configuration and
//! verifies connectivity before handing it to the service.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::fmt;
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, error, info};

pub use deadpool_postgres::{Object as PooledClient, Pool as PgPool};

#[derive(Debug, thiserror::Error)]
pub enum DbPoolError {
    #[error("invalid database configuration: {0}")]
    Config(String),
    #[error("failed to build pool: {0}")]
    Build(String),
    #[error("database connection failed: {0}")]
    Connect(String),
    #[error("database connection verification timed out after {0}s")]
    Timeout(u64),
}

/// Database connection pool configuration
#[derive(Clone)]
pub struct DbConfig {
    /// Service name used in log fields
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// deadpool opens connections on demand; there is no minimum to keep warm.
    pub max_connections: u32,
    /// Connection creation timeout (new connection to PostgreSQL)
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 20,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Create a new DbConfig from environment variables
    pub fn from_env(service_name: &str) -> Result<Self, DbPoolError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DbPoolError::Config("DATABASE_URL environment variable not set".into()))?;
        Ok(Self::with_url(service_name, database_url))
    }

    /// Build a config for an explicit URL, still honouring the `DB_*` tuning variables.
    pub fn with_url(service_name: &str, database_url: impl Into<String>) -> Self {
        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            database_url: database_url.into(),
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
        }
    }

    pub fn log_config(&self) {
        info!(
            "Database Pool Configuration: \
             max_connections={}, \
             connect_timeout={}s, acquire_timeout={}s, idle_timeout={}s",
            self.max_connections,
            self.connect_timeout_secs,
            self.acquire_timeout_secs,
            self.idle_timeout_secs
        );
    }
}

/// Create a PostgreSQL connection pool and verify it with `SELECT 1`.
pub async fn create_pool(config: DbConfig) -> Result<Pool, DbPoolError> {
    debug!(
        "Creating database pool: service={}, max={}, acquire_timeout={}s, verify_timeout={}s",
        config.service_name,
        config.max_connections,
        config.acquire_timeout_secs,
        config.connect_timeout_secs,
    );

    let mut pg_config: PgConfig = config
        .database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| DbPoolError::Config(e.to_string()))?;
    pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs));

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .wait_timeout(Some(Duration::from_secs(config.acquire_timeout_secs)))
        .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
        .recycle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| DbPoolError::Build(e.to_string()))?;

    let verify = async {
        let client = pool
            .get()
            .await
            .map_err(|e| DbPoolError::Connect(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbPoolError::Connect(e.to_string()))?;
        Ok::<(), DbPoolError>(())
    };

    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            info!(
                service = %config.service_name,
                "Database pool created and verified successfully"
            );
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(
                service = %config.service_name,
                error = %e,
                "Database connection verification failed"
            );
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(DbPoolError::Timeout(config.connect_timeout_secs))
        }
    }
}

use deadpool_postgres::Pool;

// Applied in order; each name is recorded in schema_migrations.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_conversations",
        include_str!("../migrations/0001_create_conversations.sql"),
    ),
    (
        "0002_create_conversation_participants",
        include_str!("../migrations/0002_create_conversation_participants.sql"),
    ),
    (
        "0003_create_messages",
        include_str!("../migrations/0003_create_messages.sql"),
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("failed to acquire connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("migration {name} failed: {source}")]
    Apply {
        name: &'static str,
        source: tokio_postgres::Error,
    },
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

/// Apply pending migrations in order, each in its own transaction.
pub async fn run_all(pool: &Pool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

    for &(name, sql) in MIGRATIONS {
        let applied = client
            .query_opt("SELECT 1 FROM schema_migrations WHERE name = $1", &[&name])
            .await?
            .is_some();
        if applied {
            tracing::debug!(migration = %name, "chat-service migration already applied");
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(sql)
            .await
            .map_err(|source| MigrationError::Apply { name, source })?;
        tx.execute("INSERT INTO schema_migrations (name) VALUES ($1)", &[&name])
            .await?;
        tx.commit().await?;
        tracing::info!(migration = %name, "chat-service migration applied");
    }

    Ok(())
}

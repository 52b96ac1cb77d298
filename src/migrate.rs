use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the corpus schema. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per conversation document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding vectors, keyed by conversation and model
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_vectors (
            conversation_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='conversations_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE conversations_fts USING fts5(
                conversation_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_start_time ON conversations(start_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

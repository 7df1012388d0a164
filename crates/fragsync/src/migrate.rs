//! Idempotent schema migrations.
//!
//! Three tables: one state record per connector, one row per source
//! document (unique per connector), and one row per fragment keyed by its
//! globally unique content hash.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connector_states (
            connector_id TEXT PRIMARY KEY,
            connector_type TEXT NOT NULL,
            user TEXT NOT NULL DEFAULT '',
            auth_valid INTEGER NOT NULL DEFAULT 0,
            syncing INTEGER NOT NULL DEFAULT 0,
            last_sync INTEGER NOT NULL DEFAULT 0,
            num_documents INTEGER NOT NULL DEFAULT 0,
            num_chunks INTEGER NOT NULL DEFAULT 0,
            num_errors INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            connector_id TEXT NOT NULL,
            unique_id TEXT NOT NULL,
            connector_type TEXT NOT NULL,
            name TEXT NOT NULL,
            source_url TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            summary TEXT,
            PRIMARY KEY (connector_id, unique_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            hash TEXT PRIMARY KEY,
            connector_id TEXT NOT NULL,
            document_unique_id TEXT NOT NULL,
            text TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (connector_id, document_unique_id)
                REFERENCES documents(connector_id, unique_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(connector_id, document_unique_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_connector_states_type ON connector_states(connector_type, user)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

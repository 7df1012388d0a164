//! SQLite-backed [`IndexStore`] implementation.
//!
//! Timestamps on connector state are stored as Unix milliseconds so the
//! `last_sync` checkpoint round-trips exactly; document timestamps use
//! seconds. The `syncing` lock is a conditional `UPDATE .. RETURNING`, so
//! two writers racing for the same connector cannot both win.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use fragsync_core::embedding::vec_to_blob;
use fragsync_core::models::{AddVectorItem, AddVectorsResponse, ConnectorState, Document};
use fragsync_core::store::{IndexStore, SyncingTransition};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const STATE_COLUMNS: &str = "connector_id, connector_type, user, auth_valid, syncing, last_sync, \
                             num_documents, num_chunks, num_errors";

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn secs_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn state_from_row(row: &SqliteRow) -> ConnectorState {
    ConnectorState {
        connector_id: row.get("connector_id"),
        connector_type: row.get("connector_type"),
        user: row.get("user"),
        auth_valid: row.get::<i64, _>("auth_valid") != 0,
        syncing: row.get::<i64, _>("syncing") != 0,
        last_sync: millis_to_utc(row.get("last_sync")),
        num_documents: row.get("num_documents"),
        num_chunks: row.get("num_chunks"),
        num_errors: row.get("num_errors"),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn get_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM connector_states WHERE connector_id = ?"
        ))
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(state_from_row))
    }

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>> {
        let rows = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM connector_states ORDER BY connector_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(state_from_row).collect())
    }

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connector_states (connector_id, connector_type, user, auth_valid,
                                          syncing, last_sync, num_documents, num_chunks,
                                          num_errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(connector_id) DO UPDATE SET
                connector_type = excluded.connector_type,
                user = excluded.user,
                auth_valid = excluded.auth_valid,
                syncing = excluded.syncing,
                last_sync = excluded.last_sync,
                num_documents = excluded.num_documents,
                num_chunks = excluded.num_chunks,
                num_errors = excluded.num_errors
            "#,
        )
        .bind(&state.connector_id)
        .bind(&state.connector_type)
        .bind(&state.user)
        .bind(state.auth_valid as i64)
        .bind(state.syncing as i64)
        .bind(state.last_sync.timestamp_millis())
        .bind(state.num_documents)
        .bind(state.num_chunks)
        .bind(state.num_errors)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write state for {}", state.connector_id))?;

        Ok(())
    }

    async fn set_connector_syncing(
        &self,
        connector_id: &str,
        syncing: bool,
    ) -> Result<SyncingTransition> {
        let changed = sqlx::query(&format!(
            "UPDATE connector_states SET syncing = ? \
             WHERE connector_id = ? AND syncing = ? \
             RETURNING {STATE_COLUMNS}"
        ))
        .bind(syncing as i64)
        .bind(connector_id)
        .bind(!syncing as i64)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = changed {
            return Ok(SyncingTransition::Changed(state_from_row(&row)));
        }

        let state = self
            .get_connector_state(connector_id)
            .await?
            .ok_or_else(|| anyhow!("connector state not found: {connector_id}"))?;
        Ok(SyncingTransition::AlreadySet(state))
    }

    async fn chunk_hash_exists(&self, hash: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE hash = ?")
            .bind(hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn get_document(
        &self,
        connector_id: &str,
        unique_id: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT connector_id, unique_id, connector_type, name, source_url,
                   created_at, updated_at, summary
            FROM documents
            WHERE connector_id = ? AND unique_id = ?
            "#,
        )
        .bind(connector_id)
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Document {
            unique_id: r.get("unique_id"),
            name: r.get("name"),
            source_url: r.get("source_url"),
            connector_id: r.get("connector_id"),
            connector_type: r.get("connector_type"),
            created_at: secs_to_utc(r.get("created_at")),
            updated_at: secs_to_utc(r.get("updated_at")),
            summary: r.get("summary"),
        }))
    }

    async fn add_vectors(&self, items: &[AddVectorItem]) -> Result<AddVectorsResponse> {
        let mut response = AddVectorsResponse::default();
        if items.is_empty() {
            return Ok(response);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for item in items {
            let doc = &item.chunk.document;
            let inserted = sqlx::query(
                r#"
                INSERT INTO documents (connector_id, unique_id, connector_type, name,
                                       source_url, created_at, updated_at, summary)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(connector_id, unique_id) DO NOTHING
                "#,
            )
            .bind(&doc.connector_id)
            .bind(&doc.unique_id)
            .bind(&doc.connector_type)
            .bind(&doc.name)
            .bind(&doc.source_url)
            .bind(doc.created_at.timestamp())
            .bind(doc.updated_at.timestamp())
            .bind(&doc.summary)
            .execute(&mut *tx)
            .await?;
            response.documents_added += inserted.rows_affected() as i64;

            let blob = vec_to_blob(&item.vector);
            let inserted = sqlx::query(
                r#"
                INSERT INTO chunks (hash, connector_id, document_unique_id, text, dims,
                                    embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hash) DO NOTHING
                "#,
            )
            .bind(&item.chunk.hash)
            .bind(&doc.connector_id)
            .bind(&doc.unique_id)
            .bind(&item.chunk.text)
            .bind(item.vector.len() as i64)
            .bind(&blob)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            response.chunks_added += inserted.rows_affected() as i64;
        }

        tx.commit().await?;
        Ok(response)
    }

    async fn delete_connector(&self, connector_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE connector_id = ?")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE connector_id = ?")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM connector_states WHERE connector_id = ?")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use fragsync_core::hash::content_hash;
    use fragsync_core::models::Chunk;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        let mut config = Config::minimal();
        config.db.path = dir.path().join("fragsync.sqlite");
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn item(connector_id: &str, unique_id: &str, text: &str) -> AddVectorItem {
        let now = Utc::now();
        AddVectorItem {
            chunk: Chunk {
                document: Document {
                    unique_id: unique_id.to_string(),
                    name: unique_id.to_string(),
                    source_url: format!("file:///{unique_id}"),
                    connector_id: connector_id.to_string(),
                    connector_type: "filesystem".to_string(),
                    created_at: now,
                    updated_at: now,
                    summary: None,
                },
                text: text.to_string(),
                hash: content_hash(text),
                score: None,
            },
            vector: vec![0.25, 0.5],
        }
    }

    #[tokio::test]
    async fn state_roundtrip_keeps_millis() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut state = ConnectorState::new("c1", "filesystem");
        state.user = "notes".to_string();
        state.auth_valid = true;
        state.last_sync = millis_to_utc(1_700_000_000_123);
        state.num_chunks = 7;
        store.update_connector_state(&state).await.unwrap();

        let loaded = store.get_connector_state("c1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(store.get_connector_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn syncing_conditional_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .update_connector_state(&ConnectorState::new("c1", "filesystem"))
            .await
            .unwrap();

        let first = store.set_connector_syncing("c1", true).await.unwrap();
        assert!(matches!(first, SyncingTransition::Changed(ref s) if s.syncing));
        let again = store.set_connector_syncing("c1", true).await.unwrap();
        assert!(matches!(again, SyncingTransition::AlreadySet(ref s) if s.syncing));
        let released = store.set_connector_syncing("c1", false).await.unwrap();
        assert!(matches!(released, SyncingTransition::Changed(ref s) if !s.syncing));

        assert!(store.set_connector_syncing("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn add_vectors_counts_new_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let resp = store
            .add_vectors(&[
                item("c1", "a.md", "first fragment of a"),
                item("c1", "a.md", "second fragment of a"),
            ])
            .await
            .unwrap();
        assert_eq!(resp.chunks_added, 2);
        assert_eq!(resp.documents_added, 1);

        let resp = store
            .add_vectors(&[item("c1", "a.md", "first fragment of a")])
            .await
            .unwrap();
        assert_eq!(resp, AddVectorsResponse::default());

        assert!(store
            .chunk_hash_exists(&content_hash("second fragment of a"))
            .await
            .unwrap());
        let doc = store.get_document("c1", "a.md").await.unwrap().unwrap();
        assert_eq!(doc.source_url, "file:///a.md");
    }

    #[tokio::test]
    async fn delete_connector_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .update_connector_state(&ConnectorState::new("c1", "filesystem"))
            .await
            .unwrap();
        store
            .add_vectors(&[
                item("c1", "a.md", "owned by the first connector"),
                item("c2", "b.md", "owned by the second connector"),
            ])
            .await
            .unwrap();

        store.delete_connector("c1").await.unwrap();

        assert!(store.get_connector_state("c1").await.unwrap().is_none());
        assert!(store.get_document("c1", "a.md").await.unwrap().is_none());
        assert!(!store
            .chunk_hash_exists(&content_hash("owned by the first connector"))
            .await
            .unwrap());
        assert!(store
            .chunk_hash_exists(&content_hash("owned by the second connector"))
            .await
            .unwrap());
    }
}

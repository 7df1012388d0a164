//! In-memory [`IndexStore`] implementation for tests and ephemeral runs.
//!
//! All tables live behind one `std::sync::Mutex`, so every operation
//! (including the `syncing` compare-and-set) is atomic. The store also counts
//! how many times each connector's state was written, which lets tests assert
//! on the aggregator's batching.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{AddVectorItem, AddVectorsResponse, ConnectorState, Document};

use super::{IndexStore, SyncingTransition};

struct StoredChunk {
    connector_id: String,
    document_unique_id: String,
    _text: String,
    _vector: Vec<f32>,
}

#[derive(Default)]
struct Tables {
    states: HashMap<String, ConnectorState>,
    // keyed by (connector_id, unique_id)
    documents: HashMap<(String, String), Document>,
    chunks: HashMap<String, StoredChunk>,
    state_writes: HashMap<String, usize>,
}

/// In-memory store. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Number of [`IndexStore::update_connector_state`] calls made for a connector.
    pub fn state_writes(&self, connector_id: &str) -> usize {
        self.tables()
            .map(|t| t.state_writes.get(connector_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn chunk_count(&self) -> usize {
        self.tables().map(|t| t.chunks.len()).unwrap_or(0)
    }

    pub fn document_count(&self) -> usize {
        self.tables().map(|t| t.documents.len()).unwrap_or(0)
    }

    /// Chunk count belonging to one document.
    pub fn chunks_for_document(&self, connector_id: &str, unique_id: &str) -> usize {
        self.tables()
            .map(|t| {
                t.chunks
                    .values()
                    .filter(|c| c.connector_id == connector_id && c.document_unique_id == unique_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn get_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>> {
        Ok(self.tables()?.states.get(connector_id).cloned())
    }

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>> {
        let tables = self.tables()?;
        let mut states: Vec<ConnectorState> = tables.states.values().cloned().collect();
        states.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
        Ok(states)
    }

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<()> {
        let mut tables = self.tables()?;
        tables
            .states
            .insert(state.connector_id.clone(), state.clone());
        *tables
            .state_writes
            .entry(state.connector_id.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn set_connector_syncing(
        &self,
        connector_id: &str,
        syncing: bool,
    ) -> Result<SyncingTransition> {
        let mut tables = self.tables()?;
        let state = tables
            .states
            .get_mut(connector_id)
            .ok_or_else(|| anyhow!("connector state not found: {connector_id}"))?;
        if state.syncing == syncing {
            return Ok(SyncingTransition::AlreadySet(state.clone()));
        }
        state.syncing = syncing;
        Ok(SyncingTransition::Changed(state.clone()))
    }

    async fn chunk_hash_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.tables()?.chunks.contains_key(hash))
    }

    async fn get_document(
        &self,
        connector_id: &str,
        unique_id: &str,
    ) -> Result<Option<Document>> {
        let key = (connector_id.to_string(), unique_id.to_string());
        Ok(self.tables()?.documents.get(&key).cloned())
    }

    async fn add_vectors(&self, items: &[AddVectorItem]) -> Result<AddVectorsResponse> {
        let mut tables = self.tables()?;
        let mut response = AddVectorsResponse::default();

        for item in items {
            let doc = &item.chunk.document;
            let key = (doc.connector_id.clone(), doc.unique_id.clone());
            if !tables.documents.contains_key(&key) {
                tables.documents.insert(key, doc.clone());
                response.documents_added += 1;
            }

            if tables.chunks.contains_key(&item.chunk.hash) {
                continue;
            }
            tables.chunks.insert(
                item.chunk.hash.clone(),
                StoredChunk {
                    connector_id: doc.connector_id.clone(),
                    document_unique_id: doc.unique_id.clone(),
                    _text: item.chunk.text.clone(),
                    _vector: item.vector.clone(),
                },
            );
            response.chunks_added += 1;
        }

        Ok(response)
    }

    async fn delete_connector(&self, connector_id: &str) -> Result<()> {
        let mut tables = self.tables()?;
        tables.states.remove(connector_id);
        tables.state_writes.remove(connector_id);
        tables.documents.retain(|(cid, _), _| cid != connector_id);
        tables.chunks.retain(|_, c| c.connector_id != connector_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use crate::models::Chunk;
    use chrono::Utc;

    fn doc(connector_id: &str, unique_id: &str) -> Document {
        let now = Utc::now();
        Document {
            unique_id: unique_id.to_string(),
            name: format!("{unique_id}.md"),
            source_url: format!("file:///{unique_id}.md"),
            connector_id: connector_id.to_string(),
            connector_type: "filesystem".to_string(),
            created_at: now,
            updated_at: now,
            summary: None,
        }
    }

    fn item(document: Document, text: &str) -> AddVectorItem {
        AddVectorItem {
            chunk: Chunk {
                document,
                text: text.to_string(),
                hash: content_hash(text),
                score: None,
            },
            vector: vec![0.1, 0.2, 0.3],
        }
    }

    #[tokio::test]
    async fn syncing_is_compare_and_set() {
        let store = InMemoryStore::new();
        store
            .update_connector_state(&ConnectorState::new("c1", "filesystem"))
            .await
            .unwrap();

        let first = store.set_connector_syncing("c1", true).await.unwrap();
        assert!(matches!(first, SyncingTransition::Changed(ref s) if s.syncing));
        let second = store.set_connector_syncing("c1", true).await.unwrap();
        assert!(matches!(second, SyncingTransition::AlreadySet(_)));
        let release = store.set_connector_syncing("c1", false).await.unwrap();
        assert!(matches!(release, SyncingTransition::Changed(ref s) if !s.syncing));
    }

    #[tokio::test]
    async fn syncing_missing_state_errors() {
        let store = InMemoryStore::new();
        assert!(store.set_connector_syncing("nope", true).await.is_err());
    }

    #[tokio::test]
    async fn add_vectors_dedups_by_hash() {
        let store = InMemoryStore::new();
        let d = doc("c1", "notes");
        let resp = store
            .add_vectors(&[item(d.clone(), "first fragment text")])
            .await
            .unwrap();
        assert_eq!(
            resp,
            AddVectorsResponse {
                chunks_added: 1,
                documents_added: 1
            }
        );

        let resp = store
            .add_vectors(&[
                item(d.clone(), "first fragment text"),
                item(d, "second fragment text"),
            ])
            .await
            .unwrap();
        assert_eq!(resp.chunks_added, 1);
        assert_eq!(resp.documents_added, 0);
        assert_eq!(store.chunk_count(), 2);
        assert!(store
            .chunk_hash_exists(&content_hash("second fragment text"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn documents_scoped_by_connector() {
        let store = InMemoryStore::new();
        store
            .add_vectors(&[item(doc("c1", "readme"), "connector one text")])
            .await
            .unwrap();
        assert!(store.get_document("c1", "readme").await.unwrap().is_some());
        assert!(store.get_document("c2", "readme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_connector_removes_everything() {
        let store = InMemoryStore::new();
        store
            .update_connector_state(&ConnectorState::new("c1", "filesystem"))
            .await
            .unwrap();
        store
            .update_connector_state(&ConnectorState::new("c2", "filesystem"))
            .await
            .unwrap();
        store
            .add_vectors(&[
                item(doc("c1", "a"), "belongs to connector one"),
                item(doc("c2", "b"), "belongs to connector two"),
            ])
            .await
            .unwrap();

        store.delete_connector("c1").await.unwrap();
        assert!(store.get_connector_state("c1").await.unwrap().is_none());
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.all_connector_states().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_writes_counted() {
        let store = InMemoryStore::new();
        let mut state = ConnectorState::new("c1", "filesystem");
        store.update_connector_state(&state).await.unwrap();
        state.num_chunks = 4;
        store.update_connector_state(&state).await.unwrap();
        // the lock transition does not count as a state write
        store.set_connector_syncing("c1", true).await.unwrap();
        assert_eq!(store.state_writes("c1"), 2);
    }
}

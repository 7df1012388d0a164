//! Storage abstraction for the sync engine.
//!
//! The [`IndexStore`] trait is the single source of truth for connector
//! state, documents and fragments. The engine keeps nothing across jobs; the
//! `syncing` lock, the `last_sync` checkpoint and the counters all live in
//! the store so they survive restarts.
//!
//! Implementations must be `Send + Sync` to be shared between the scheduler
//! and concurrently running jobs.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AddVectorItem, AddVectorsResponse, ConnectorState, Document};

/// Result of [`IndexStore::set_connector_syncing`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncingTransition {
    /// The flag was flipped; carries the state as persisted.
    Changed(ConnectorState),
    /// The flag already had the requested value; nothing was written.
    AlreadySet(ConnectorState),
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_connector_state`](IndexStore::get_connector_state) | Read one connector's state |
/// | [`all_connector_states`](IndexStore::all_connector_states) | Restore the registry on boot |
/// | [`update_connector_state`](IndexStore::update_connector_state) | Upsert a full state record |
/// | [`set_connector_syncing`](IndexStore::set_connector_syncing) | Conditional lock transition |
/// | [`chunk_hash_exists`](IndexStore::chunk_hash_exists) | Global dedup check |
/// | [`get_document`](IndexStore::get_document) | Look up a document by source id |
/// | [`add_vectors`](IndexStore::add_vectors) | Write chunks, creating documents as needed |
/// | [`delete_connector`](IndexStore::delete_connector) | Remove a connector and everything it indexed |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>>;

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>>;

    /// Insert or replace the state record keyed by `state.connector_id`.
    async fn update_connector_state(&self, state: &ConnectorState) -> Result<()>;

    /// Set `syncing` only if it currently differs from the requested value.
    ///
    /// This is a compare-and-set: of two concurrent callers requesting
    /// `true`, exactly one observes [`SyncingTransition::Changed`]. A missing
    /// state record is an error.
    async fn set_connector_syncing(
        &self,
        connector_id: &str,
        syncing: bool,
    ) -> Result<SyncingTransition>;

    async fn chunk_hash_exists(&self, hash: &str) -> Result<bool>;

    async fn get_document(&self, connector_id: &str, unique_id: &str)
        -> Result<Option<Document>>;

    /// Store chunks with their vectors.
    ///
    /// The owning document is created the first time its
    /// `(connector_id, unique_id)` is seen. A chunk whose hash is already
    /// stored is not inserted again and does not count as added.
    async fn add_vectors(&self, items: &[AddVectorItem]) -> Result<AddVectorsResponse>;

    /// Delete a connector's documents, chunks and state record.
    async fn delete_connector(&self, connector_id: &str) -> Result<()>;
}

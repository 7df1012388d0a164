//! Core data models shared by the sync engine, its stores and connectors.
//!
//! [`ConnectorState`] is the single persisted record per connector; it carries
//! the `syncing` lock flag, the `last_sync` checkpoint and the ingestion
//! counters. Connectors emit [`SyncOutcome`] messages, the pipeline turns the
//! fragments among them into hashed [`Chunk`]s and writes them as
//! [`AddVectorItem`]s.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state for one registered connector instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorState {
    /// Stable identifier, generated once when the connector is first created.
    pub connector_id: String,
    /// Discriminator selecting the connector implementation (e.g. `"filesystem"`).
    pub connector_type: String,
    /// Account or instance label shown to the user.
    pub user: String,
    /// Credentials are present and usable.
    pub auth_valid: bool,
    /// True while an ingestion job owns this connector.
    pub syncing: bool,
    /// Checkpoint: start time of the last job that drained without a fatal error.
    pub last_sync: DateTime<Utc>,
    pub num_documents: i64,
    pub num_chunks: i64,
    pub num_errors: i64,
}

impl ConnectorState {
    /// A fresh state that has never synced (`last_sync` at the Unix epoch).
    pub fn new(connector_id: impl Into<String>, connector_type: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            connector_type: connector_type.into(),
            user: String::new(),
            auth_valid: false,
            syncing: false,
            last_sync: DateTime::<Utc>::default(),
            num_documents: 0,
            num_chunks: 0,
            num_errors: 0,
        }
    }

    /// Whether more than `threshold` has elapsed since the last checkpoint.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_sync) > threshold
    }
}

/// A logical source item (file, email, channel) that fragments belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifies the item within its connector's source.
    pub unique_id: String,
    pub name: String,
    pub source_url: String,
    pub connector_id: String,
    pub connector_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Fragment text as emitted by a connector, before sanitization and hashing.
#[derive(Debug, Clone)]
pub struct RawFragment {
    pub document: Document,
    pub text: String,
}

/// A sanitized, hashed fragment ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document: Document,
    pub text: String,
    /// Content hash of `text`, the global dedup key.
    pub hash: String,
    /// Relevance score; only set on search results, never persisted at ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One message on a connector's output queue.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Content to ingest. With `skip_clean` the connector has already
    /// sanitized the text (e.g. chat transcripts whose newlines matter).
    Fragment {
        fragment: RawFragment,
        skip_clean: bool,
    },
    /// A non-fatal failure producing one fragment.
    Error(anyhow::Error),
    /// Every fragment of the named document has been emitted.
    DocumentComplete { unique_id: String },
}

impl SyncOutcome {
    pub fn fragment(document: Document, text: impl Into<String>) -> Self {
        SyncOutcome::Fragment {
            fragment: RawFragment {
                document,
                text: text.into(),
            },
            skip_clean: false,
        }
    }

    pub fn preclean_fragment(document: Document, text: impl Into<String>) -> Self {
        SyncOutcome::Fragment {
            fragment: RawFragment {
                document,
                text: text.into(),
            },
            skip_clean: true,
        }
    }

    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        SyncOutcome::Error(err.into())
    }
}

/// A chunk paired with its embedding, as handed to the store.
#[derive(Debug, Clone)]
pub struct AddVectorItem {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Number of records newly created by one store write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVectorsResponse {
    pub chunks_added: i64,
    pub documents_added: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_unsynced() {
        let state = ConnectorState::new("c1", "filesystem");
        assert!(!state.syncing);
        assert!(!state.auth_valid);
        assert_eq!(state.last_sync.timestamp(), 0);
        assert!(state.is_stale(Utc::now(), Duration::minutes(1)));
    }

    #[test]
    fn staleness_is_strict() {
        let now = Utc::now();
        let mut state = ConnectorState::new("c1", "filesystem");
        state.last_sync = now - Duration::seconds(60);
        assert!(!state.is_stale(now, Duration::seconds(60)));
        assert!(state.is_stale(now, Duration::seconds(59)));
    }
}

//! Per-job ingestion pipeline.
//!
//! The single consumer of a connector's output queue. Each fragment goes
//! through:
//!
//! ```text
//! sanitize → length filter → hash + dedup → embed → write
//! ```
//!
//! Short and already-indexed fragments are skipped silently. Every other
//! fragment produces exactly one [`FragmentResult`] for the aggregator: the
//! write counts on success, or a [`FragmentError`] naming the failed stage.
//! Fragment-level failures never stop the pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fragsync_core::embedding::Embedder;
use fragsync_core::error::FragmentError;
use fragsync_core::hash::content_hash;
use fragsync_core::models::{AddVectorItem, AddVectorsResponse, Chunk, RawFragment, SyncOutcome};
use fragsync_core::sanitize::{clean_chunk, long_enough};
use fragsync_core::store::IndexStore;

/// What the aggregator receives for one processed fragment.
pub type FragmentResult = Result<AddVectorsResponse, FragmentError>;

/// Counts of fragments the pipeline dropped without an outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub skipped_short: u64,
    pub skipped_duplicate: u64,
    pub documents_completed: u64,
}

pub struct Pipeline {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    min_chunk_len: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        min_chunk_len: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            min_chunk_len,
        }
    }

    /// Consume `input` in order until it closes or `cancel` fires.
    ///
    /// Cancellation is only observed between messages, so a fragment that
    /// has started processing is always finished.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<SyncOutcome>,
        results: mpsc::Sender<FragmentResult>,
        cancel: CancellationToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Some(result) = self.process(outcome, &mut stats).await {
                if results.send(result).await.is_err() {
                    break;
                }
            }
        }

        stats
    }

    async fn process(
        &self,
        outcome: SyncOutcome,
        stats: &mut PipelineStats,
    ) -> Option<FragmentResult> {
        match outcome {
            SyncOutcome::Error(err) => Some(Err(FragmentError::Source(err))),
            SyncOutcome::DocumentComplete { unique_id } => {
                debug!(document = %unique_id, "document complete");
                stats.documents_completed += 1;
                None
            }
            SyncOutcome::Fragment {
                fragment,
                skip_clean,
            } => self.ingest(fragment, skip_clean, stats).await,
        }
    }

    async fn ingest(
        &self,
        fragment: RawFragment,
        skip_clean: bool,
        stats: &mut PipelineStats,
    ) -> Option<FragmentResult> {
        let RawFragment { mut document, text } = fragment;
        let text = if skip_clean {
            text
        } else {
            document.name = clean_chunk(&document.name);
            clean_chunk(&text)
        };

        if !long_enough(&text, self.min_chunk_len) {
            debug!(
                document = %document.unique_id,
                len = text.chars().count(),
                "skipping short fragment"
            );
            stats.skipped_short += 1;
            return None;
        }

        let hash = content_hash(&text);
        match self.store.chunk_hash_exists(&hash).await {
            Ok(true) => {
                debug!(%hash, "fragment already indexed");
                stats.skipped_duplicate += 1;
                return None;
            }
            Ok(false) => {}
            Err(e) => return Some(Err(FragmentError::HashLookup(e))),
        }

        let vector = match self.embedder.embed(&text).await {
            Ok(v) => v,
            Err(e) => return Some(Err(FragmentError::Embed(e))),
        };

        // Keep the stored record (and its created_at) for documents seen before.
        match self
            .store
            .get_document(&document.connector_id, &document.unique_id)
            .await
        {
            Ok(Some(existing)) => document = existing,
            Ok(None) => {}
            Err(e) => return Some(Err(FragmentError::Write(e))),
        }

        let item = AddVectorItem {
            chunk: Chunk {
                document,
                text,
                hash,
                score: None,
            },
            vector,
        };
        match self.store.add_vectors(std::slice::from_ref(&item)).await {
            Ok(resp) => {
                debug!(
                    source_url = %item.chunk.document.source_url,
                    chunks_added = resp.chunks_added,
                    documents_added = resp.documents_added,
                    "fragment written"
                );
                Some(Ok(resp))
            }
            Err(e) => Some(Err(FragmentError::Write(e))),
        }
    }
}

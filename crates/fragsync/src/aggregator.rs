//! Batches per-fragment outcomes into periodic connector state writes.
//!
//! Every `update_every` outcomes (successes and errors alike), and once more
//! when the outcome stream ends, the aggregator re-reads the connector's
//! state, adds the buffered deltas to `num_documents`, `num_chunks` and
//! `num_errors`, and writes it back. Only one aggregator owns a connector's
//! counters at a time, so updates are never interleaved.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connector::Connector;
use crate::pipeline::FragmentResult;

/// Totals over every outcome the aggregator saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateTotals {
    pub documents: i64,
    pub chunks: i64,
    pub errors: i64,
    /// State writes performed.
    pub flushes: u64,
    /// State writes that failed; their deltas are lost.
    pub failed_flushes: u64,
}

#[derive(Default)]
struct Pending {
    outcomes: usize,
    documents: i64,
    chunks: i64,
    errors: i64,
}

pub struct Aggregator {
    connector: Arc<dyn Connector>,
    update_every: usize,
}

impl Aggregator {
    pub fn new(connector: Arc<dyn Connector>, update_every: usize) -> Self {
        Self {
            connector,
            update_every: update_every.max(1),
        }
    }

    /// Consume `results` until every sender is dropped, then flush the rest.
    pub async fn run(self, mut results: mpsc::Receiver<FragmentResult>) -> AggregateTotals {
        let mut totals = AggregateTotals::default();
        let mut pending = Pending::default();

        while let Some(result) = results.recv().await {
            match result {
                Ok(counts) => {
                    pending.documents += counts.documents_added;
                    pending.chunks += counts.chunks_added;
                }
                Err(err) => {
                    warn!(
                        connector_id = self.connector.id(),
                        stage = err.stage(),
                        error = %err,
                        "error processing fragment"
                    );
                    pending.errors += 1;
                }
            }
            pending.outcomes += 1;

            if pending.outcomes >= self.update_every {
                self.flush(&mut pending, &mut totals).await;
            }
        }

        if pending.outcomes > 0 {
            self.flush(&mut pending, &mut totals).await;
        }
        totals
    }

    async fn flush(&self, pending: &mut Pending, totals: &mut AggregateTotals) {
        let batch = std::mem::take(pending);
        totals.documents += batch.documents;
        totals.chunks += batch.chunks;
        totals.errors += batch.errors;

        match self.apply(&batch).await {
            Ok(()) => {
                totals.flushes += 1;
                debug!(
                    connector_id = self.connector.id(),
                    chunks = batch.chunks,
                    documents = batch.documents,
                    errors = batch.errors,
                    "connector counters updated"
                );
            }
            Err(e) => {
                totals.failed_flushes += 1;
                warn!(
                    connector_id = self.connector.id(),
                    error = %format!("{e:#}"),
                    "failed to update connector counters"
                );
            }
        }
    }

    async fn apply(&self, batch: &Pending) -> Result<()> {
        let mut state = self.connector.status().await?;
        state.num_documents += batch.documents;
        state.num_chunks += batch.chunks;
        state.num_errors += batch.errors;
        self.connector.update_connector_state(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorBase;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use fragsync_core::error::FragmentError;
    use fragsync_core::models::{AddVectorsResponse, ConnectorState, SyncOutcome};
    use fragsync_core::store::memory::InMemoryStore;
    use fragsync_core::store::IndexStore;

    struct Idle {
        base: ConnectorBase,
    }

    #[async_trait]
    impl Connector for Idle {
        fn base(&self) -> &ConnectorBase {
            &self.base
        }
        fn has_credentials(&self) -> bool {
            true
        }
        async fn sync(&self, _since: DateTime<Utc>, _out: mpsc::Sender<SyncOutcome>) -> Result<()> {
            Ok(())
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, Arc<dyn Connector>) {
        let store = Arc::new(InMemoryStore::new());
        let mut state = ConnectorState::new("c1", "idle");
        state.num_chunks = 100;
        store.update_connector_state(&state).await.unwrap();
        let conn: Arc<dyn Connector> = Arc::new(Idle {
            base: ConnectorBase::new("idle", Some("c1".into()), "", store.clone()),
        });
        (store, conn)
    }

    fn added(chunks: i64, documents: i64) -> FragmentResult {
        Ok(AddVectorsResponse {
            chunks_added: chunks,
            documents_added: documents,
        })
    }

    #[tokio::test]
    async fn flushes_every_n_and_at_end() {
        let (store, conn) = setup().await;
        let writes_before = store.state_writes("c1");

        let (tx, rx) = mpsc::channel(64);
        for i in 0..23 {
            tx.send(added(1, i64::from(i % 10 == 0))).await.unwrap();
        }
        tx.send(Err(FragmentError::Embed(anyhow::anyhow!("timeout"))))
            .await
            .unwrap();
        drop(tx);

        let totals = Aggregator::new(conn, 10).run(rx).await;
        assert_eq!(totals.flushes, 3);
        assert_eq!(totals.chunks, 23);
        assert_eq!(totals.documents, 3);
        assert_eq!(totals.errors, 1);
        assert_eq!(store.state_writes("c1") - writes_before, 3);

        let state = store.get_connector_state("c1").await.unwrap().unwrap();
        assert_eq!(state.num_chunks, 123);
        assert_eq!(state.num_documents, 3);
        assert_eq!(state.num_errors, 1);
    }

    #[tokio::test]
    async fn empty_stream_writes_nothing() {
        let (store, conn) = setup().await;
        let writes_before = store.state_writes("c1");
        let (tx, rx) = mpsc::channel::<FragmentResult>(1);
        drop(tx);
        let totals = Aggregator::new(conn, 10).run(rx).await;
        assert_eq!(totals, AggregateTotals::default());
        assert_eq!(store.state_writes("c1"), writes_before);
    }

    #[tokio::test]
    async fn missing_state_counts_failed_flush() {
        let (store, conn) = setup().await;
        store.delete_connector("c1").await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(added(1, 1)).await.unwrap();
        drop(tx);
        let totals = Aggregator::new(conn, 10).run(rx).await;
        assert_eq!(totals.failed_flushes, 1);
        assert!(store.get_connector_state("c1").await.unwrap().is_none());
    }
}

//! One end-to-end ingestion run for a single connector.
//!
//! A job is started by the scheduler after it has taken the connector's
//! `syncing` lock, and it is the job that releases it. Three tasks run
//! concurrently, connected by bounded queues:
//!
//! ```text
//! Connector::sync ──SyncOutcome──▶ Pipeline ──FragmentResult──▶ Aggregator
//!  (producer)                       (single consumer)            (counters)
//! ```
//!
//! The job ends when the producer is exhausted and the pipeline has drained
//! its queue, when the producer reports a fatal error, or when cancellation
//! fires. On every exit path the aggregator flushes what it received, and
//! the state is finalized once: `syncing` is cleared, and `last_sync`
//! advances to the job's start time only after a clean drain.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fragsync_core::embedding::Embedder;
use fragsync_core::models::ConnectorState;
use fragsync_core::store::IndexStore;

use crate::aggregator::{AggregateTotals, Aggregator};
use crate::config::SyncConfig;
use crate::connector::Connector;
use crate::pipeline::{Pipeline, PipelineStats};

/// Tuning shared by every job.
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub update_every: usize,
    pub min_chunk_len: usize,
    pub queue_capacity: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for JobSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            update_every: config.update_every,
            min_chunk_len: config.min_chunk_len,
            queue_capacity: config.queue_capacity.max(1),
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobExit {
    /// The producer was exhausted and every fragment was processed.
    Drained,
    /// The producer reported that it cannot continue.
    Fatal { error: String },
    /// The process or the connector was cancelled mid-job.
    Cancelled,
}

impl JobExit {
    pub fn is_drained(&self) -> bool {
        matches!(self, JobExit::Drained)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub num_documents: i64,
    pub num_chunks: i64,
    pub num_errors: i64,
}

impl From<&ConnectorState> for Counters {
    fn from(state: &ConnectorState) -> Self {
        Self {
            num_documents: state.num_documents,
            num_chunks: state.num_chunks,
            num_errors: state.num_errors,
        }
    }
}

/// Summary of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub connector_id: String,
    pub connector_type: String,
    pub user: String,
    pub exit: JobExit,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub before: Counters,
    /// `None` when the final state could not be read back.
    pub after: Option<Counters>,
    pub totals: AggregateTotals,
    pub skipped_short: u64,
    pub skipped_duplicate: u64,
    /// The final state write failed and the lock was released separately.
    pub finalize_failed: bool,
}

pub struct SyncJob {
    connector: Arc<dyn Connector>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    settings: JobSettings,
    cancel: CancellationToken,
}

impl SyncJob {
    /// `cancel` should be a child of the process-wide token; the job cancels
    /// it itself to stop the pipeline on a fatal error.
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        settings: JobSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            store,
            embedder,
            settings,
            cancel,
        }
    }

    /// Run to completion. `state` is the record returned when the lock was
    /// taken; its `last_sync` is the checkpoint handed to the connector.
    pub async fn run(self, state: ConnectorState) -> JobReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let connector_id = self.connector.id().to_string();
        let connector_type = self.connector.connector_type().to_string();

        info!(
            connector_id = %connector_id,
            connector_type = %connector_type,
            since = %state.last_sync,
            "sync started"
        );

        let capacity = self.settings.queue_capacity;
        let (fragment_tx, fragment_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);

        let since = state.last_sync;
        let producer_conn = Arc::clone(&self.connector);
        let mut producer =
            tokio::spawn(async move { producer_conn.sync(since, fragment_tx).await });

        let pipeline = Pipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            self.settings.min_chunk_len,
        );
        let mut pipeline_task =
            tokio::spawn(pipeline.run(fragment_rx, result_tx, self.cancel.clone()));

        let aggregator = Aggregator::new(Arc::clone(&self.connector), self.settings.update_every);
        let aggregator_task = tokio::spawn(aggregator.run(result_rx));

        let connector_cancel = self.connector.base().cancel_token();
        let mut producer_done = false;
        let mut pipeline_stats: Option<PipelineStats> = None;

        let exit = loop {
            if producer_done && pipeline_stats.is_some() {
                break JobExit::Drained;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break JobExit::Cancelled,
                _ = connector_cancel.cancelled() => break JobExit::Cancelled,
                res = &mut producer, if !producer_done => {
                    producer_done = true;
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break JobExit::Fatal { error: format!("{e:#}") },
                        Err(e) => break JobExit::Fatal {
                            error: format!("connector sync task failed: {e}"),
                        },
                    }
                }
                res = &mut pipeline_task, if pipeline_stats.is_none() => {
                    match res {
                        Ok(stats) => pipeline_stats = Some(stats),
                        Err(e) => {
                            pipeline_stats = Some(PipelineStats::default());
                            break JobExit::Fatal { error: format!("pipeline task failed: {e}") };
                        }
                    }
                }
            }
        };

        if !exit.is_drained() {
            self.cancel.cancel();
            if !producer_done {
                producer.abort();
            }
        }

        // The pipeline only observes cancellation between fragments, so an
        // in-flight write completes before its result reaches the aggregator.
        let stats = match pipeline_stats {
            Some(stats) => stats,
            None => match pipeline_task.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(connector_id = %connector_id, error = %e, "pipeline task failed");
                    PipelineStats::default()
                }
            },
        };

        let totals = match aggregator_task.await {
            Ok(totals) => totals,
            Err(e) => {
                error!(connector_id = %connector_id, error = %e, "aggregator task failed");
                AggregateTotals::default()
            }
        };

        let (after, finalize_failed) = match self.finalize(&exit, started_at).await {
            Ok(state) => (Some(Counters::from(&state)), false),
            Err(e) => {
                warn!(
                    connector_id = %connector_id,
                    error = %format!("{e:#}"),
                    "failed to finalize connector state, releasing lock directly"
                );
                if let Err(e) = self.store.set_connector_syncing(&connector_id, false).await {
                    error!(
                        connector_id = %connector_id,
                        error = %format!("{e:#}"),
                        "failed to release syncing lock"
                    );
                }
                (None, true)
            }
        };

        match &exit {
            JobExit::Drained => debug!(connector_id = %connector_id, "sync drained"),
            JobExit::Fatal { error } => warn!(
                connector_id = %connector_id,
                connector_type = %connector_type,
                error = %error,
                "sync stopped by connector error, checkpoint not advanced"
            ),
            JobExit::Cancelled => info!(
                connector_id = %connector_id,
                "sync cancelled, checkpoint not advanced"
            ),
        }

        JobReport {
            connector_id,
            connector_type,
            user: state.user.clone(),
            exit,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            before: Counters::from(&state),
            after,
            totals,
            skipped_short: stats.skipped_short,
            skipped_duplicate: stats.skipped_duplicate,
            finalize_failed,
        }
    }

    /// Re-read the state, advance the checkpoint on a clean drain, release
    /// the lock, and persist once.
    async fn finalize(&self, exit: &JobExit, started_at: DateTime<Utc>) -> Result<ConnectorState> {
        let mut state = self.connector.status().await?;
        if exit.is_drained() && started_at > state.last_sync {
            state.last_sync = started_at;
        }
        state.syncing = false;
        self.connector.update_connector_state(&state).await?;
        Ok(state)
    }
}

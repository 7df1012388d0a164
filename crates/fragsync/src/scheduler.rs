//! The sync scheduler.
//!
//! [`Syncer`] holds the registry of active connectors and decides, per
//! connector, whether a sync is due. Every round evaluates each connector
//! independently and concurrently:
//!
//! 1. Read the persisted state; skip if credentials are missing.
//! 2. Take the lock (`syncing` false → true). If it is already held, or
//!    this process is still evaluating the connector, skip.
//! 3. If `last_sync` is still within the staleness threshold, release the
//!    lock and skip.
//! 4. Otherwise start a [`SyncJob`], which releases the lock when it ends.
//!
//! A failure evaluating one connector never affects the others.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fragsync_core::embedding::Embedder;
use fragsync_core::models::ConnectorState;
use fragsync_core::store::{IndexStore, SyncingTransition};

use crate::config::SyncConfig;
use crate::connector::Connector;
use crate::connectors::ConnectorFactory;
use crate::error::SyncError;
use crate::job::{JobReport, JobSettings, SyncJob};
use crate::report::{NoReporter, SyncReporter};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub stale_threshold: chrono::Duration,
    pub job: JobSettings,
}

impl From<&SyncConfig> for SchedulerSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            stale_threshold: config.stale_threshold(),
            job: JobSettings::from(config),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AuthRequired,
    AlreadySyncing,
    UpToDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Evaluation {
    Skipped { reason: SkipReason },
    Synced { report: JobReport },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorEvaluation {
    pub connector_id: String,
    pub connector_type: String,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

/// Outcome of one evaluation pass over every registered connector.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRound {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub connectors: Vec<ConnectorEvaluation>,
}

impl SyncRound {
    pub fn synced(&self) -> impl Iterator<Item = &JobReport> {
        self.connectors.iter().filter_map(|c| match &c.evaluation {
            Evaluation::Synced { report } => Some(report),
            _ => None,
        })
    }

    pub fn find(&self, connector_id: &str) -> Option<&Evaluation> {
        self.connectors
            .iter()
            .find(|c| c.connector_id == connector_id)
            .map(|c| &c.evaluation)
    }
}

/// Order states by type then user, dropping unauthenticated ones unless
/// `include_unauthenticated`.
pub fn sort_states(
    mut states: Vec<ConnectorState>,
    include_unauthenticated: bool,
) -> Vec<ConnectorState> {
    states.retain(|s| include_unauthenticated || s.auth_valid);
    states.sort_by(|a, b| {
        a.connector_type
            .cmp(&b.connector_type)
            .then_with(|| a.user.cmp(&b.user))
    });
    states
}

pub struct Syncer {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    settings: SchedulerSettings,
    reporter: Arc<dyn SyncReporter>,
    shutdown: CancellationToken,
}

impl Syncer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
            store,
            embedder,
            settings,
            reporter: Arc::new(NoReporter),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use an externally owned process-wide cancellation token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every in-flight job and stop [`run`](Syncer::run).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Connector>>> {
        self.connectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Connector>>> {
        self.connectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connector. Returns `false` (and keeps the existing one)
    /// if the id is already registered.
    pub fn add_connector(&self, connector: Arc<dyn Connector>) -> bool {
        let mut registry = self.registry_mut();
        if registry.contains_key(connector.id()) {
            return false;
        }
        registry.insert(connector.id().to_string(), connector);
        true
    }

    pub fn get_connector(&self, connector_id: &str) -> Option<Arc<dyn Connector>> {
        self.registry().get(connector_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    /// Cancel a connector, delete everything it indexed, and unregister it.
    ///
    /// Waits for a running job to stop first, so a fragment that was being
    /// written when the cancel arrived is deleted too.
    pub async fn delete_connector(&self, connector_id: &str) -> Result<()> {
        let connector = self
            .get_connector(connector_id)
            .ok_or_else(|| SyncError::UnknownConnector(connector_id.to_string()))?;

        connector.cancel();
        let slot = connector.base().job_slot();
        let _idle = slot.lock().await;
        self.store
            .delete_connector(connector_id)
            .await
            .map_err(SyncError::Store)?;
        self.registry_mut().remove(connector_id);

        info!(
            connector_id,
            connector_type = connector.connector_type(),
            "connector deleted"
        );
        Ok(())
    }

    /// Current state of every registered connector, sorted by type then
    /// user. Connectors without valid credentials are hidden unless
    /// `include_unauthenticated`.
    pub async fn connector_states(
        &self,
        include_unauthenticated: bool,
    ) -> Result<Vec<ConnectorState>> {
        let connectors: Vec<_> = self.registry().values().cloned().collect();

        let mut states = Vec::with_capacity(connectors.len());
        for connector in connectors {
            let state = connector
                .status()
                .await
                .with_context(|| format!("failed to get state for {}", connector.id()))?;
            states.push(state);
        }
        Ok(sort_states(states, include_unauthenticated))
    }

    /// Rebuild the registry from every persisted connector state.
    ///
    /// Each restored connector is re-initialized, which clears `syncing`
    /// flags left behind by a killed process. States whose type is unknown
    /// or whose instance can no longer be built are skipped with a warning.
    /// Returns the number of connectors registered.
    pub async fn restore(&self, factory: &ConnectorFactory) -> Result<usize> {
        let states = self
            .store
            .all_connector_states()
            .await
            .context("failed to get connector states")?;

        let mut count = 0;
        for state in states {
            let connector = match factory.create(
                &state.connector_type,
                Some(state.connector_id.clone()),
                &state.user,
                Arc::clone(&self.store),
            ) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        connector_id = %state.connector_id,
                        connector_type = %state.connector_type,
                        error = %format!("{e:#}"),
                        "skipping persisted connector"
                    );
                    continue;
                }
            };

            if let Err(e) = connector.init().await {
                warn!(
                    connector_id = %state.connector_id,
                    error = %format!("{e:#}"),
                    "failed to init connector"
                );
                continue;
            }
            if self.add_connector(connector) {
                count += 1;
            }
        }

        info!(count, "syncer initialized from stored states");
        Ok(count)
    }

    /// Evaluate every connector concurrently and wait for all jobs started
    /// by this round to finish.
    pub async fn sync_now(&self) -> SyncRound {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let connectors: Vec<_> = self.registry().values().cloned().collect();
        let connectors = if self.shutdown.is_cancelled() {
            debug!("shutdown in progress, not starting a sync round");
            Vec::new()
        } else {
            connectors
        };

        let mut evaluations = join_all(connectors.into_iter().map(|c| self.evaluate(c))).await;
        evaluations.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));

        debug!(connectors = evaluations.len(), "sync round complete");
        SyncRound {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            connectors: evaluations,
        }
    }

    /// Start a round in the background.
    pub fn spawn_sync_now(self: &Arc<Self>) -> JoinHandle<SyncRound> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.sync_now().await })
    }

    /// Tick every `tick_interval` (the first tick fires immediately) until
    /// [`shutdown`](Syncer::shutdown). A slow round never blocks the next
    /// tick; on shutdown, in-flight rounds are awaited so every lock they
    /// hold is released.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rounds: JoinSet<SyncRound> = JoinSet::new();

        info!(
            tick_secs = self.settings.tick_interval.as_secs(),
            connectors = self.len(),
            "syncer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let this = Arc::clone(&self);
                    rounds.spawn(async move { this.sync_now().await });
                }
                Some(res) = rounds.join_next(), if !rounds.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "sync round panicked");
                    }
                }
            }
        }

        while let Some(res) = rounds.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "sync round panicked");
            }
        }
        info!("syncer has stopped");
    }

    async fn evaluate(&self, connector: Arc<dyn Connector>) -> ConnectorEvaluation {
        let connector_id = connector.id().to_string();
        let connector_type = connector.connector_type().to_string();
        let evaluation = match self.maybe_sync(connector).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                let error = format!("{e:#}");
                warn!(
                    connector_id = %connector_id,
                    connector_type = %connector_type,
                    error = %error,
                    "failed to evaluate connector"
                );
                Evaluation::Failed { error }
            }
        };
        ConnectorEvaluation {
            connector_id,
            connector_type,
            evaluation,
        }
    }

    async fn maybe_sync(&self, connector: Arc<dyn Connector>) -> Result<Evaluation> {
        let id = connector.id().to_string();
        debug!(connector_id = %id, "checking connector");

        let Ok(slot) = connector.base().job_slot().try_lock_owned() else {
            debug!(connector_id = %id, "evaluation already in progress");
            return Ok(Evaluation::Skipped {
                reason: SkipReason::AlreadySyncing,
            });
        };

        let state = self
            .store
            .get_connector_state(&id)
            .await
            .context("failed to get connector state")?
            .ok_or_else(|| SyncError::StateNotFound(id.clone()))?;
        if !state.auth_valid {
            debug!(connector_id = %id, "auth required");
            return Ok(Evaluation::Skipped {
                reason: SkipReason::AuthRequired,
            });
        }

        let state = match self
            .store
            .set_connector_syncing(&id, true)
            .await
            .context("failed to set connector to syncing")?
        {
            SyncingTransition::Changed(state) => state,
            SyncingTransition::AlreadySet(_) => {
                debug!(connector_id = %id, "already syncing");
                return Ok(Evaluation::Skipped {
                    reason: SkipReason::AlreadySyncing,
                });
            }
        };

        if !state.is_stale(Utc::now(), self.settings.stale_threshold) {
            self.store
                .set_connector_syncing(&id, false)
                .await
                .context("failed to release syncing lock")?;
            debug!(connector_id = %id, "sync not required");
            return Ok(Evaluation::Skipped {
                reason: SkipReason::UpToDate,
            });
        }

        let job = SyncJob::new(
            Arc::clone(&connector),
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            self.settings.job,
            self.shutdown.child_token(),
        );

        // Spawned so the job (and its lock release) outlives a dropped caller.
        let handle = tokio::spawn(async move {
            let report = job.run(state).await;
            drop(slot);
            report
        });
        match handle.await {
            Ok(report) => {
                self.reporter.report(&report);
                Ok(Evaluation::Synced { report })
            }
            Err(e) => {
                error!(connector_id = %id, error = %e, "sync job panicked");
                self.store
                    .set_connector_syncing(&id, false)
                    .await
                    .context("failed to release syncing lock after job panic")?;
                Ok(Evaluation::Failed {
                    error: format!("sync job failed: {e}"),
                })
            }
        }
    }
}

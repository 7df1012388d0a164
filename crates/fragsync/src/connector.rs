//! The connector contract and the state plumbing every connector shares.
//!
//! A connector adapts one external data source. The engine drives every
//! connector type through the same [`Connector`] trait and never looks at
//! source-specific semantics.
//!
//! # Lifecycle
//!
//! 1. A connector is constructed (fresh, or restored from a persisted state).
//! 2. [`init`](Connector::init) creates or refreshes its persisted state and
//!    clears any `syncing` flag left behind by a killed process.
//! 3. The scheduler calls [`sync`](Connector::sync) whenever the connector is
//!    due. The connector pushes [`SyncOutcome`]s onto the queue and returns.
//!    Returning `Err` reports a fatal, whole-sync failure.
//! 4. [`cancel`](Connector::cancel) requests a cooperative stop.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fragsync_core::models::{ConnectorState, SyncOutcome};
use fragsync_core::store::IndexStore;

use crate::error::SyncError;

/// Fields and methods common to every connector implementation.
pub struct ConnectorBase {
    id: String,
    connector_type: String,
    user: String,
    store: Arc<dyn IndexStore>,
    cancel: Mutex<CancellationToken>,
    job: Arc<tokio::sync::Mutex<()>>,
}

impl ConnectorBase {
    /// `id` is `None` for a brand-new connector, which gets a fresh UUID.
    pub fn new(
        connector_type: impl Into<String>,
        id: Option<String>,
        user: impl Into<String>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            connector_type: connector_type.into(),
            user: user.into(),
            store,
            cancel: Mutex::new(CancellationToken::new()),
            job: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// The token cancelled by [`ConnectorBase::cancel`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    /// Held by the scheduler while it evaluates this connector and for the
    /// whole of any job it starts.
    pub fn job_slot(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.job)
    }

    /// Create or refresh the persisted state.
    ///
    /// Always clears `syncing` and recomputes `auth_valid`; counters and the
    /// checkpoint are kept. A previously cancelled connector gets a fresh
    /// cancellation token.
    pub async fn init(&self, auth_valid: bool) -> Result<ConnectorState> {
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = CancellationToken::new();

        let mut state = self
            .store
            .get_connector_state(&self.id)
            .await
            .context("failed to get connector state")?
            .unwrap_or_else(|| ConnectorState::new(&self.id, &self.connector_type));

        state.connector_type = self.connector_type.clone();
        if !self.user.is_empty() {
            state.user = self.user.clone();
        }
        state.syncing = false;
        state.auth_valid = auth_valid;

        self.store
            .update_connector_state(&state)
            .await
            .context("failed to set connector state")?;
        Ok(state)
    }

    pub async fn status(&self) -> Result<ConnectorState> {
        self.store
            .get_connector_state(&self.id)
            .await
            .context("failed to get connector state")?
            .ok_or_else(|| SyncError::StateNotFound(self.id.clone()).into())
    }
}

/// A pluggable adapter to one external data source.
#[async_trait]
pub trait Connector: Send + Sync {
    fn base(&self) -> &ConnectorBase;

    fn connector_type(&self) -> &str {
        self.base().connector_type()
    }

    fn id(&self) -> &str {
        self.base().id()
    }

    fn user(&self) -> &str {
        self.base().user()
    }

    /// Whether usable credentials are present right now.
    fn has_credentials(&self) -> bool;

    async fn init(&self) -> Result<ConnectorState> {
        self.base().init(self.has_credentials()).await
    }

    async fn status(&self) -> Result<ConnectorState> {
        self.base().status().await
    }

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<()> {
        self.base().store().update_connector_state(state).await
    }

    /// Begin credential acquisition. Returns the URL the user must visit,
    /// or `None` when the connector needs no interactive step.
    async fn auth_setup(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Complete credential acquisition with the code from the provider's
    /// redirect. The default re-runs [`init`](Connector::init) so
    /// `auth_valid` reflects the new credentials.
    async fn auth_callback(&self, _code: &str) -> Result<()> {
        self.init().await.map(|_| ())
    }

    /// Push every fragment changed since `since` onto `out`.
    ///
    /// Returning `Ok` (and dropping `out`) means the source is exhausted.
    /// Returning `Err` is a fatal, connector-level failure; the job stops and
    /// the checkpoint is not advanced.
    async fn sync(&self, since: DateTime<Utc>, out: mpsc::Sender<SyncOutcome>) -> Result<()>;

    fn cancel(&self) {
        self.base().cancel()
    }
}

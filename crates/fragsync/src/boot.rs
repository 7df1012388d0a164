//! Process startup: open the store, restore connectors, build the syncer.
//!
//! [`add_connector`] and [`remove_connector`] work on the store alone. They
//! never restore or re-init other connectors, so they are safe to run next to
//! a serving process.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use fragsync_core::models::ConnectorState;
use fragsync_core::store::IndexStore;

use crate::config::Config;
use crate::connector_fs;
use crate::connectors::ConnectorFactory;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::SyncError;
use crate::migrate;
use crate::report::SyncReporter;
use crate::scheduler::{SchedulerSettings, Syncer};
use crate::sqlite_store::SqliteStore;

/// Everything a running engine needs.
pub struct Engine {
    pub syncer: Arc<Syncer>,
    pub factory: Arc<ConnectorFactory>,
}

async fn open_store(config: &Config) -> Result<Arc<dyn IndexStore>> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Connect to SQLite (running migrations), then [`start`] on it.
pub async fn boot(config: &Config, reporter: Arc<dyn SyncReporter>) -> Result<Engine> {
    let store = open_store(config).await?;
    start(config, store, reporter).await
}

/// Create and initialize a single connector instance.
///
/// Fails if a connector of the same type and name already exists. A running
/// server picks the new connector up on its next restart.
pub async fn add_connector(
    config: &Config,
    connector_type: &str,
    name: &str,
) -> Result<ConnectorState> {
    let store = open_store(config).await?;
    let existing = store
        .all_connector_states()
        .await
        .context("failed to get connector states")?;
    if let Some(s) = existing
        .iter()
        .find(|s| s.connector_type == connector_type && s.user == name)
    {
        bail!(
            "{connector_type} connector '{name}' already exists: {}",
            s.connector_id
        );
    }

    let connector = ConnectorFactory::from_config(config).create(
        connector_type,
        None,
        name,
        store,
    )?;
    let state = connector.init().await?;
    info!(
        connector_id = %state.connector_id,
        connector_type,
        name,
        "connector created"
    );
    Ok(state)
}

/// Delete a connector's documents, chunks and state.
///
/// A connector marked `syncing` may belong to a job in a serving process, so
/// it is only removed with `force`.
pub async fn remove_connector(config: &Config, connector_id: &str, force: bool) -> Result<()> {
    let store = open_store(config).await?;
    let state = store
        .get_connector_state(connector_id)
        .await
        .context("failed to get connector state")?
        .ok_or_else(|| SyncError::UnknownConnector(connector_id.to_string()))?;
    if state.syncing && !force {
        bail!(
            "connector {connector_id} is syncing; remove it through the server \
             (DELETE /connectors/{connector_id}) or pass --force if none is running"
        );
    }

    store
        .delete_connector(connector_id)
        .await
        .map_err(SyncError::Store)?;
    info!(connector_id, "connector deleted");
    Ok(())
}

/// Build the syncer over `store`.
///
/// Every persisted connector is restored, then each configured filesystem
/// instance without a persisted state is created and initialized.
pub async fn start(
    config: &Config,
    store: Arc<dyn IndexStore>,
    reporter: Arc<dyn SyncReporter>,
) -> Result<Engine> {
    let embedder = create_embedder(&config.embedding)?;
    let factory = ConnectorFactory::from_config(config);
    let syncer = Syncer::new(
        Arc::clone(&store),
        embedder,
        SchedulerSettings::from(&config.sync),
    )
    .with_reporter(reporter);

    syncer.restore(&factory).await?;

    let existing = store
        .all_connector_states()
        .await
        .context("failed to get connector states")?;
    for name in config.connectors.filesystem.keys() {
        let present = existing
            .iter()
            .any(|s| s.connector_type == connector_fs::CONNECTOR_TYPE && &s.user == name);
        if present {
            continue;
        }

        let connector = factory.create(
            connector_fs::CONNECTOR_TYPE,
            None,
            name,
            Arc::clone(&store),
        )?;
        connector
            .init()
            .await
            .with_context(|| format!("failed to init filesystem connector '{name}'"))?;
        info!(
            connector_id = connector.id(),
            name = %name,
            "registered configured filesystem connector"
        );
        syncer.add_connector(connector);
    }

    Ok(Engine {
        syncer: Arc::new(syncer),
        factory: Arc::new(factory),
    })
}

//! Connector type registry.
//!
//! Maps a connector type string (`"filesystem"`, ...) to a constructor. The
//! scheduler uses it on boot to rebuild a connector for every persisted
//! state, and the init endpoint uses it to create new instances.
//!
//! ```rust
//! use fragsync::config::Config;
//! use fragsync::connectors::ConnectorFactory;
//!
//! let factory = ConnectorFactory::from_config(&Config::minimal());
//! assert_eq!(factory.types(), vec!["filesystem"]);
//! ```

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use fragsync_core::store::IndexStore;

use crate::config::Config;
use crate::connector::Connector;
use crate::connector_fs::{self, FilesystemConnector};
use crate::error::SyncError;

/// Builds a connector from an optional existing id and an instance name.
pub type ConnectorConstructor = Arc<
    dyn Fn(Option<String>, &str, Arc<dyn IndexStore>) -> Result<Arc<dyn Connector>> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct ConnectorFactory {
    constructors: BTreeMap<String, ConnectorConstructor>,
}

impl ConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with every built-in connector type, configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut factory = Self::new();

        let instances = config.connectors.filesystem.clone();
        factory.register(
            connector_fs::CONNECTOR_TYPE,
            Arc::new(
                move |id: Option<String>,
                      name: &str,
                      store: Arc<dyn IndexStore>|
                      -> Result<Arc<dyn Connector>> {
                    let fs_config = instances.get(name).cloned().ok_or_else(|| {
                        anyhow!("no [connectors.filesystem.{name}] section in config")
                    })?;
                    Ok(Arc::new(FilesystemConnector::new(id, name, fs_config, store)))
                },
            ),
        );

        factory
    }

    /// Add or replace the constructor for a type.
    pub fn register(&mut self, connector_type: &str, constructor: ConnectorConstructor) {
        self.constructors
            .insert(connector_type.to_string(), constructor);
    }

    pub fn is_known(&self, connector_type: &str) -> bool {
        self.constructors.contains_key(connector_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        connector_type: &str,
        id: Option<String>,
        name: &str,
        store: Arc<dyn IndexStore>,
    ) -> Result<Arc<dyn Connector>> {
        let constructor = self
            .constructors
            .get(connector_type)
            .ok_or_else(|| SyncError::UnknownConnectorType(connector_type.to_string()))?;
        constructor(id, name, store)
    }
}

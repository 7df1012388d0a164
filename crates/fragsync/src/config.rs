//! TOML configuration parsing and validation.
//!
//! fragsync is configured through a single TOML file (default
//! `./config/fragsync.toml`). Every section except `[db]` is optional and
//! falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/fragsync.sqlite"
//!
//! [sync]
//! tick_interval_secs = 60
//! stale_threshold_secs = 60
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [connectors.filesystem.notes]
//! root = "~/notes"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Scheduler and pipeline tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// How often the scheduler evaluates every connector.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// A connector is due once `last_sync` is older than this.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Outcomes buffered by the aggregator before each state write.
    #[serde(default = "default_update_every")]
    pub update_every: usize,
    /// Sanitized fragments shorter than this (in characters) are dropped.
    #[serde(default = "default_min_chunk_len")]
    pub min_chunk_len: usize,
    /// Capacity of each bounded queue inside a job.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_tick_interval_secs() -> u64 {
    60
}
fn default_stale_threshold_secs() -> u64 {
    60
}
fn default_update_every() -> usize {
    10
}
fn default_min_chunk_len() -> usize {
    fragsync_core::sanitize::MIN_CHUNK_LEN
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            update_every: default_update_every(),
            min_chunk_len: default_min_chunk_len(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_threshold_secs as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_embedding_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8081".to_string()
}

/// Named connector instances, per type.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl Config {
    /// A config with an in-place database and defaults everywhere else.
    ///
    /// Embedding is disabled so nothing reaches for the network.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/fragsync.sqlite"),
            },
            sync: SyncConfig::default(),
            embedding: EmbeddingConfig {
                provider: "disabled".to_string(),
                ..EmbeddingConfig::default()
            },
            server: ServerConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let sync = &config.sync;
    if sync.tick_interval_secs == 0 {
        anyhow::bail!("sync.tick_interval_secs must be > 0");
    }
    if sync.update_every == 0 {
        anyhow::bail!("sync.update_every must be > 0");
    }
    if sync.min_chunk_len == 0 {
        anyhow::bail!("sync.min_chunk_len must be > 0");
    }
    if sync.queue_capacity == 0 {
        anyhow::bail!("sync.queue_capacity must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "ollama" => {
            if config.embedding.model.trim().is_empty() {
                anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if config.embedding.timeout_secs == 0 {
                anyhow::bail!("embedding.timeout_secs must be > 0");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    for (name, fs) in &config.connectors.filesystem {
        if fs.include_globs.is_empty() {
            anyhow::bail!("connectors.filesystem.{name}.include_globs must not be empty");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.sync.tick_interval_secs, 60);
        assert_eq!(config.sync.stale_threshold_secs, 60);
        assert_eq!(config.sync.update_every, 10);
        assert_eq!(config.sync.min_chunk_len, 10);
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.url, "http://localhost:11434");
        assert_eq!(config.server.bind, "127.0.0.1:8081");
        assert!(config.connectors.filesystem.is_empty());
    }

    #[test]
    fn named_filesystem_connectors() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/x.sqlite"

            [connectors.filesystem.notes]
            root = "/home/me/notes"

            [connectors.filesystem.docs]
            root = "/srv/docs"
            include_globs = ["**/*.rst"]
            follow_symlinks = true
            "#,
        )
        .unwrap();
        let fs = &config.connectors.filesystem;
        assert_eq!(fs.len(), 2);
        assert_eq!(fs["notes"].include_globs, vec!["**/*.md", "**/*.txt"]);
        assert_eq!(fs["docs"].include_globs, vec!["**/*.rst"]);
        assert!(fs["docs"].follow_symlinks);
    }

    #[test]
    fn rejects_zero_batch() {
        let err = parse("[db]\npath = \"x\"\n[sync]\nupdate_every = 0\n").unwrap_err();
        assert!(err.to_string().contains("update_every"));
    }

    #[test]
    fn zero_stale_threshold_allowed() {
        let config = parse("[db]\npath = \"x\"\n[sync]\nstale_threshold_secs = 0\n").unwrap();
        assert_eq!(config.sync.stale_threshold(), chrono::Duration::zero());
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/fragsync.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.connectors.filesystem["notes"].exclude_globs, vec!["**/drafts/**"]);
        assert_eq!(config.sync.queue_capacity, 64);
    }

    #[test]
    fn minimal_is_offline() {
        let config = Config::minimal();
        assert!(!config.embedding.is_enabled());
        assert!(validate(&config).is_ok());
    }
}

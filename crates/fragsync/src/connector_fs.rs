//! Filesystem connector.
//!
//! Walks a local directory, selects files with include/exclude globs and
//! emits word-window fragments for every file modified after the checkpoint.
//!
//! ```toml
//! [connectors.filesystem.notes]
//! root = "/home/me/notes"
//! include_globs = ["**/*.md"]
//! exclude_globs = ["drafts/**"]
//! ```
//!
//! `.git`, `target` and `node_modules` directories are always excluded.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::debug;
use walkdir::WalkDir;

use fragsync_core::chunk::{chunk_words, CHUNK_OVERLAP, MAX_CHUNK_WORDS};
use fragsync_core::models::{Document, SyncOutcome};
use fragsync_core::store::IndexStore;

use crate::config::FilesystemConnectorConfig;
use crate::connector::{Connector, ConnectorBase};

pub const CONNECTOR_TYPE: &str = "filesystem";

pub struct FilesystemConnector {
    base: ConnectorBase,
    config: FilesystemConnectorConfig,
}

impl FilesystemConnector {
    /// `name` is the `[connectors.filesystem.<name>]` key and becomes the
    /// connector's user label.
    pub fn new(
        id: Option<String>,
        name: &str,
        config: FilesystemConnectorConfig,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            base: ConnectorBase::new(CONNECTOR_TYPE, id, name, store),
            config,
        }
    }
}

/// A file selected for ingestion.
struct Candidate {
    path: PathBuf,
    relative: String,
    modified: DateTime<Utc>,
    created: DateTime<Utc>,
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }

    fn has_credentials(&self) -> bool {
        self.config.root.is_dir()
    }

    async fn sync(&self, since: DateTime<Utc>, out: mpsc::Sender<SyncOutcome>) -> Result<()> {
        let root = self.config.root.clone();
        if !root.is_dir() {
            bail!(
                "Filesystem connector root does not exist: {}",
                root.display()
            );
        }

        let config = self.config.clone();
        let (candidates, walk_errors) =
            tokio::task::spawn_blocking(move || scan(&config, since))
                .await
                .context("filesystem scan panicked")??;

        for err in walk_errors {
            send(&out, SyncOutcome::error(err)).await?;
        }

        debug!(
            connector_id = self.id(),
            files = candidates.len(),
            "filesystem scan complete"
        );

        let cancel = self.base.cancel_token();
        for candidate in candidates {
            if cancel.is_cancelled() {
                bail!("filesystem sync cancelled");
            }

            let body = match tokio::fs::read_to_string(&candidate.path).await {
                Ok(body) => body,
                Err(e) => {
                    let err = anyhow!("failed to read {}: {}", candidate.path.display(), e);
                    send(&out, SyncOutcome::error(err)).await?;
                    continue;
                }
            };

            let document = self.document_for(&candidate);
            for text in chunk_words(&body, MAX_CHUNK_WORDS, CHUNK_OVERLAP) {
                send(&out, SyncOutcome::fragment(document.clone(), text)).await?;
            }
            send(
                &out,
                SyncOutcome::DocumentComplete {
                    unique_id: candidate.relative,
                },
            )
            .await?;
        }

        Ok(())
    }
}

impl FilesystemConnector {
    fn document_for(&self, candidate: &Candidate) -> Document {
        let name = candidate
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| candidate.relative.clone());

        Document {
            unique_id: candidate.relative.clone(),
            name,
            source_url: format!("file://{}", candidate.path.display()),
            connector_id: self.id().to_string(),
            connector_type: CONNECTOR_TYPE.to_string(),
            created_at: candidate.created,
            updated_at: candidate.modified,
            summary: None,
        }
    }
}

async fn send(out: &mpsc::Sender<SyncOutcome>, outcome: SyncOutcome) -> Result<()> {
    out.send(outcome)
        .await
        .map_err(|_| anyhow!("sync output queue closed"))
}

/// Walk the root and collect files modified strictly after `since`, sorted
/// by relative path. Unreadable directory entries are returned separately
/// as fragment-level errors.
fn scan(
    config: &FilesystemConnectorConfig,
    since: DateTime<Utc>,
) -> Result<(Vec<Candidate>, Vec<anyhow::Error>)> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let root = &config.root;
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(anyhow!("failed to walk {}: {}", root.display(), e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                errors.push(anyhow!("failed to stat {}: {}", path.display(), e));
                continue;
            }
        };
        let modified = to_utc(metadata.modified().ok());
        if modified <= since {
            continue;
        }
        let created = metadata
            .created()
            .ok()
            .map(|t| to_utc(Some(t)))
            .unwrap_or(modified);

        candidates.push(Candidate {
            path: path.to_path_buf(),
            relative: rel_str,
            modified,
            created,
        });
    }

    candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok((candidates, errors))
}

fn to_utc(time: Option<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

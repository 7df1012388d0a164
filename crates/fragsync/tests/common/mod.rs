#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use fragsync::connector::{Connector, ConnectorBase};
use fragsync::scheduler::{SchedulerSettings, Syncer};
use fragsync_core::embedding::Embedder;
use fragsync_core::models::{Document, SyncOutcome};
use fragsync_core::store::memory::InMemoryStore;
use fragsync_core::store::IndexStore;

pub const SCRIPTED: &str = "scripted";

/// One step a scripted connector performs during `sync`.
#[derive(Clone)]
pub enum Step {
    Fragment { doc: String, text: String },
    Error(String),
    Complete(String),
    /// Wait for the notify before continuing.
    Gate(Arc<Notify>),
    /// Never return; only cancellation ends the job.
    Hang,
    Fatal(String),
}

pub fn frag(doc: &str, text: &str) -> Step {
    Step::Fragment {
        doc: doc.to_string(),
        text: text.to_string(),
    }
}

pub struct ScriptedConnector {
    base: ConnectorBase,
    steps: Vec<Step>,
    creds: bool,
    calls: AtomicUsize,
    seen_since: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedConnector {
    pub fn new(id: &str, store: Arc<dyn IndexStore>, steps: Vec<Step>) -> Self {
        Self {
            base: ConnectorBase::new(SCRIPTED, Some(id.to_string()), id, store),
            steps,
            creds: true,
            calls: AtomicUsize::new(0),
            seen_since: Mutex::new(Vec::new()),
        }
    }

    pub fn without_credentials(mut self) -> Self {
        self.creds = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_since(&self) -> Vec<DateTime<Utc>> {
        self.seen_since.lock().unwrap().clone()
    }

    fn document(&self, unique_id: &str) -> Document {
        let now = Utc::now();
        Document {
            unique_id: unique_id.to_string(),
            name: unique_id.to_string(),
            source_url: format!("scripted://{}/{unique_id}", self.id()),
            connector_id: self.id().to_string(),
            connector_type: SCRIPTED.to_string(),
            created_at: now,
            updated_at: now,
            summary: None,
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }

    fn has_credentials(&self) -> bool {
        self.creds
    }

    async fn sync(&self, since: DateTime<Utc>, out: mpsc::Sender<SyncOutcome>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_since.lock().unwrap().push(since);

        for step in &self.steps {
            let outcome = match step {
                Step::Fragment { doc, text } => {
                    SyncOutcome::fragment(self.document(doc), text.clone())
                }
                Step::Error(msg) => SyncOutcome::error(anyhow::anyhow!(msg.clone())),
                Step::Complete(doc) => SyncOutcome::DocumentComplete {
                    unique_id: doc.clone(),
                },
                Step::Gate(notify) => {
                    notify.notified().await;
                    continue;
                }
                Step::Hang => std::future::pending::<SyncOutcome>().await,
                Step::Fatal(msg) => bail!("{msg}"),
            };
            if out.send(outcome).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Embeds everything except text containing "poison".
pub struct TestEmbedder;

#[async_trait]
impl Embedder for TestEmbedder {
    fn model_name(&self) -> &str {
        "test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("poison") {
            bail!("embedding backend rejected input");
        }
        Ok(vec![text.len() as f32, 0.5, 0.25])
    }
}

/// [`TestEmbedder`] behind a fixed delay per call.
pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        TestEmbedder.embed(text).await
    }
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        tick_interval: Duration::from_millis(50),
        stale_threshold: chrono::Duration::zero(),
        ..SchedulerSettings::default()
    }
}

pub fn syncer(store: Arc<InMemoryStore>, settings: SchedulerSettings) -> Arc<Syncer> {
    syncer_with(store, settings, Arc::new(TestEmbedder))
}

pub fn syncer_with(
    store: Arc<InMemoryStore>,
    settings: SchedulerSettings,
    embedder: Arc<dyn Embedder>,
) -> Arc<Syncer> {
    Arc::new(Syncer::new(store, embedder, settings))
}

/// Build, init and register a scripted connector.
pub async fn register(syncer: &Syncer, connector: ScriptedConnector) -> Arc<ScriptedConnector> {
    let connector = Arc::new(connector);
    connector.init().await.unwrap();
    assert!(syncer.add_connector(connector.clone()));
    connector
}

/// Poll until `cond` holds, failing after two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A distinct fragment text long enough to pass the length filter.
pub fn text(n: usize) -> String {
    format!("fragment number {n} with enough words to index")
}

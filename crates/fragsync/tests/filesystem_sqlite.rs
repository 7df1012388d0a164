use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fragsync::boot;
use fragsync::config::{Config, FilesystemConnectorConfig};
use fragsync::error::SyncError;
use fragsync::job::JobExit;
use fragsync::report::NoReporter;
use fragsync::scheduler::Evaluation;
use fragsync_core::store::IndexStore;

async fn ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3, 0.4]],
        })))
        .mount(&server)
        .await;
    server
}

fn config(tmp: &Path, embed_url: &str) -> Config {
    let mut cfg = Config::minimal();
    cfg.db.path = tmp.join("data").join("fragsync.sqlite");
    cfg.embedding.provider = "ollama".to_string();
    cfg.embedding.url = embed_url.to_string();
    cfg.sync.stale_threshold_secs = 0;
    cfg.connectors.filesystem.insert(
        "notes".to_string(),
        FilesystemConnectorConfig {
            root: tmp.join("notes"),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        },
    );
    cfg
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn configured_folder_syncs_incrementally_into_sqlite() {
    let tmp = TempDir::new().unwrap();
    let notes = tmp.path().join("notes");
    write(&notes, "a.md", "# Alpha\n\nThe alpha note talks about deployment windows.");
    write(&notes, "sub/b.txt", "Beta notes cover the on-call rotation schedule.");
    write(&notes, "skip.rs", "fn main() { println!(\"not indexed\"); }");

    let server = ollama().await;
    let cfg = config(tmp.path(), &server.uri());

    let engine = boot::boot(&cfg, Arc::new(NoReporter)).await.unwrap();
    assert_eq!(engine.syncer.len(), 1);

    let round = engine.syncer.sync_now().await;
    assert_eq!(round.connectors.len(), 1);
    let id = round.connectors[0].connector_id.clone();
    match &round.connectors[0].evaluation {
        Evaluation::Synced { report } => assert_eq!(report.exit, JobExit::Drained),
        other => panic!("expected a sync, got {other:?}"),
    }

    let states = engine.syncer.connector_states(false).await.unwrap();
    assert_eq!(states.len(), 1);
    let first = &states[0];
    assert_eq!(first.user, "notes");
    assert_eq!(first.num_documents, 2);
    assert_eq!(first.num_chunks, 2);
    assert_eq!(first.num_errors, 0);
    assert!(!first.syncing);

    // Only files changed after the checkpoint are read on the next pass.
    tokio::time::sleep(Duration::from_millis(20)).await;
    write(&notes, "c.md", "Gamma is a brand new note about release trains.");
    engine.syncer.sync_now().await;

    let states_after = engine.syncer.connector_states(false).await.unwrap();
    let second = &states_after[0];
    assert_eq!(second.num_documents, 3);
    assert_eq!(second.num_chunks, 3);
    assert!(second.last_sync > first.last_sync);

    // A restarted process restores the persisted connector instead of
    // registering the configured instance a second time.
    let restarted = boot::boot(&cfg, Arc::new(NoReporter)).await.unwrap();
    assert_eq!(restarted.syncer.len(), 1);
    assert!(restarted.syncer.get_connector(&id).is_some());
}

#[tokio::test]
async fn missing_root_is_auth_required() {
    let tmp = TempDir::new().unwrap();
    let server = ollama().await;
    let cfg = config(tmp.path(), &server.uri());

    let engine = boot::boot(&cfg, Arc::new(NoReporter)).await.unwrap();
    assert!(engine.syncer.connector_states(false).await.unwrap().is_empty());

    let all = engine.syncer.connector_states(true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].auth_valid);

    let round = engine.syncer.sync_now().await;
    assert!(matches!(
        round.connectors[0].evaluation,
        Evaluation::Skipped { .. }
    ));
}

#[tokio::test]
async fn embedding_outage_counts_fragment_errors_and_still_advances_checkpoint() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("notes"), "a.md", "A note that will fail to embed today.");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let cfg = config(tmp.path(), &server.uri());

    let engine = boot::boot(&cfg, Arc::new(NoReporter)).await.unwrap();
    engine.syncer.sync_now().await;

    let states = engine.syncer.connector_states(false).await.unwrap();
    let state = &states[0];
    assert_eq!(state.num_chunks, 0);
    assert_eq!(state.num_errors, 1);
    assert!(state.last_sync > chrono::DateTime::<chrono::Utc>::default());
}

#[tokio::test]
async fn cli_add_and_remove_leave_a_running_job_alone() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("notes"), "a.md", "Notes that a serving process is syncing.");
    let server = ollama().await;
    let mut cfg = config(tmp.path(), &server.uri());

    // Stands in for a serving process that is mid-job on "notes".
    let engine = boot::boot(&cfg, Arc::new(NoReporter)).await.unwrap();
    let store = engine.syncer.store();
    let notes = store.all_connector_states().await.unwrap()[0].connector_id.clone();
    store.set_connector_syncing(&notes, true).await.unwrap();

    cfg.connectors.filesystem.insert(
        "docs".to_string(),
        FilesystemConnectorConfig {
            root: tmp.path().join("docs"),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        },
    );
    let docs = boot::add_connector(&cfg, "filesystem", "docs").await.unwrap();
    assert_eq!(docs.user, "docs");
    assert!(boot::add_connector(&cfg, "filesystem", "docs").await.is_err());
    let locked = store.get_connector_state(&notes).await.unwrap().unwrap();
    assert!(locked.syncing);

    let err = boot::remove_connector(&cfg, &notes, false).await.unwrap_err();
    assert!(err.to_string().contains("is syncing"));
    assert!(store.get_connector_state(&notes).await.unwrap().is_some());

    boot::remove_connector(&cfg, &docs.connector_id, false)
        .await
        .unwrap();
    assert!(store
        .get_connector_state(&docs.connector_id)
        .await
        .unwrap()
        .is_none());
    let locked = store.get_connector_state(&notes).await.unwrap().unwrap();
    assert!(locked.syncing);

    boot::remove_connector(&cfg, &notes, true).await.unwrap();
    assert!(store.all_connector_states().await.unwrap().is_empty());

    let err = boot::remove_connector(&cfg, &notes, false)
        .await
        .unwrap_err();
    assert!(matches!(
        SyncError::find(&err),
        Some(SyncError::UnknownConnector(_))
    ));
}

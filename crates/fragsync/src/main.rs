//! # fragsync CLI
//!
//! ```bash
//! fragsync --config ./config/fragsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fragsync init` | Create the SQLite database and run schema migrations |
//! | `fragsync serve` | Run the scheduler and the HTTP trigger surface |
//! | `fragsync sync` | Run one sync round and exit |
//! | `fragsync connectors [--all]` | List connector states |
//! | `fragsync add <type> <name>` | Create a connector instance |
//! | `fragsync remove <id> [--force]` | Delete a connector and everything it indexed |
//! | `fragsync completions <shell>` | Print shell completions |

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fragsync::boot::{self, Engine};
use fragsync::config::{self, Config};
use fragsync::db;
use fragsync::migrate;
use fragsync::report::{ReportMode, SyncReporter};
use fragsync::scheduler::{sort_states, Evaluation, SyncRound};
use fragsync::server::{self, AppState};
use fragsync::sqlite_store::SqliteStore;
use fragsync_core::store::IndexStore;

#[derive(Parser)]
#[command(
    name = "fragsync",
    version,
    about = "fragsync: keep an embedded fragment index in sync with your data sources"
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fragsync.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Per-job summaries: off, log or json. Defaults to log on a TTY.
    #[arg(long, global = true)]
    report: Option<ReportMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run the periodic scheduler and the HTTP trigger surface until Ctrl-C.
    Serve,

    /// Evaluate every connector once, wait for the jobs, and exit.
    Sync,

    /// List connector states.
    Connectors {
        /// Include connectors without valid credentials.
        #[arg(long)]
        all: bool,
    },

    /// Create and initialize a connector instance.
    Add {
        /// Connector type, e.g. `filesystem`.
        connector_type: String,
        /// Instance name, e.g. the `notes` in `[connectors.filesystem.notes]`.
        name: String,
    },

    /// Delete a connector, its documents and its chunks.
    Remove {
        id: String,
        /// Remove even if the connector is marked as syncing.
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fragsync=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "fragsync", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(cli.log_json);
    let cfg = config::load_config(&cli.config)?;
    let reporter: Arc<dyn SyncReporter> = Arc::from(
        cli.report
            .unwrap_or_else(ReportMode::default_for_tty)
            .reporter(),
    );

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let engine = boot::boot(&cfg, reporter).await?;
            serve(&cfg, engine).await?;
        }
        Commands::Sync => {
            let engine = boot::boot(&cfg, reporter).await?;
            let round = engine.syncer.sync_now().await;
            print_round(&round);
        }
        Commands::Connectors { all } => {
            // Read-only: does not re-init connectors under a running server.
            let store = SqliteStore::new(db::connect(&cfg).await?);
            let states = sort_states(store.all_connector_states().await?, all);
            if states.is_empty() {
                println!("No connectors registered.");
            }
            for s in states {
                println!(
                    "{:<38} {:<12} {:<16} auth={:<5} chunks={:<6} docs={:<6} errors={:<4} last_sync={}",
                    s.connector_id,
                    s.connector_type,
                    s.user,
                    s.auth_valid,
                    s.num_chunks,
                    s.num_documents,
                    s.num_errors,
                    s.last_sync.to_rfc3339()
                );
            }
        }
        Commands::Add {
            connector_type,
            name,
        } => {
            let state = boot::add_connector(&cfg, &connector_type, &name).await?;
            println!("{}", state.connector_id);
            if !state.auth_valid {
                println!("warning: connector has no valid credentials yet");
            }
        }
        Commands::Remove { id, force } => {
            boot::remove_connector(&cfg, &id, force).await?;
            println!("Removed connector {id}.");
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn serve(cfg: &Config, engine: Engine) -> Result<()> {
    let shutdown = engine.syncer.shutdown_token();

    let syncer = Arc::clone(&engine.syncer);
    let scheduler = tokio::spawn(syncer.run());

    let ctrl_c_syncer = Arc::clone(&engine.syncer);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        ctrl_c_syncer.shutdown();
    });

    let state = AppState {
        syncer: Arc::clone(&engine.syncer),
        factory: Arc::clone(&engine.factory),
    };
    let served = server::run_server(&cfg.server.bind, state, shutdown.clone()).await;
    if served.is_err() {
        shutdown.cancel();
    }

    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task failed");
    }
    served
}

fn print_round(round: &SyncRound) {
    if round.connectors.is_empty() {
        println!("No connectors registered.");
        return;
    }
    for c in &round.connectors {
        let outcome = match &c.evaluation {
            Evaluation::Skipped { reason } => format!("skipped ({reason:?})"),
            Evaluation::Synced { report } => {
                let (chunks, documents, errors) = fragsync::report::deltas(report);
                format!(
                    "synced: +{chunks} chunks, +{documents} documents, +{errors} errors ({:?})",
                    report.exit
                )
            }
            Evaluation::Failed { error } => format!("failed: {error}"),
        };
        println!("{:<38} {:<12} {}", c.connector_id, c.connector_type, outcome);
    }
}

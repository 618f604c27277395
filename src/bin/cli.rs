//! Dossier Ingest CLI
//!
//! Run one sync pass and exit. Configuration comes from the environment.

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dossier_ingest::{IngestConfig, RunOptions, SyncMode, SyncOrchestrator};

#[derive(Parser)]
#[command(name = "dossier-ingest")]
#[command(about = "Sync Nextcloud dossiers into the search index")]
#[command(version)]
struct Cli {
    /// State database path (overrides INGEST_DB_PATH)
    #[arg(long, env = "INGEST_DB_PATH")]
    db_path: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild every dossier from scratch
    Full {
        /// Log index writes instead of applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply activities recorded since the last run
    Incremental {
        /// Fail instead of falling back to a full rebuild
        #[arg(long)]
        no_fallback: bool,
        /// Log index writes instead of applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print cursor and run state
    Status,
}

fn init_logging(json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = IngestConfig::from_env()?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    let orchestrator = SyncOrchestrator::from_config(&config)?;

    let (mode, options) = match cli.command {
        Commands::Status => {
            let status = orchestrator.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        Commands::Full { dry_run } => (
            SyncMode::Full,
            RunOptions {
                fallback: false,
                dry_run: dry_run || config.sync.dry_run,
            },
        ),
        Commands::Incremental {
            no_fallback,
            dry_run,
        } => (
            SyncMode::Incremental,
            RunOptions {
                fallback: !no_fallback,
                dry_run: dry_run || config.sync.dry_run,
            },
        ),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current file");
            on_signal.cancel();
        }
    });

    let report = orchestrator.run(mode, options, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

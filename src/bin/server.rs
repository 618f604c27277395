//! Dossier Ingest HTTP trigger
//!
//! Run with: dossier-ingest-server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dossier_ingest::{IngestConfig, IngestError, RunOptions, SyncMode, SyncOrchestrator, SyncState};

#[derive(Parser, Debug)]
#[command(name = "dossier-ingest-server")]
#[command(about = "HTTP trigger for dossier ingestion runs")]
struct Args {
    /// Listen port
    #[arg(long, env = "INGEST_PORT", default_value = "8000")]
    port: u16,

    /// State database path (overrides INGEST_DB_PATH)
    #[arg(long, env = "INGEST_DB_PATH")]
    db_path: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<SyncOrchestrator>,
    /// Token of the run started through this server, if any
    current: Arc<Mutex<Option<CancellationToken>>>,
    default_dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerParams {
    dry_run: Option<bool>,
    fallback: Option<bool>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ingest/full", post(full_handler))
        .route("/ingest/incremental", post(incremental_handler))
        .route("/ingest/cancel", post(cancel_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "dossier-ingest",
        "version": dossier_ingest::VERSION,
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "state": state.orchestrator.state(),
    }))
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.status() {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn full_handler(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Response {
    let options = RunOptions {
        fallback: false,
        dry_run: params.dry_run.unwrap_or(state.default_dry_run),
    };
    start_run(state, SyncMode::Full, options)
}

async fn incremental_handler(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Response {
    let options = RunOptions {
        fallback: params.fallback.unwrap_or(false),
        dry_run: params.dry_run.unwrap_or(state.default_dry_run),
    };
    start_run(state, SyncMode::Incremental, options)
}

async fn cancel_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = match state.current.lock().as_ref() {
        Some(token) => {
            token.cancel();
            true
        }
        None => false,
    };
    Json(json!({ "cancelled": cancelled }))
}

/// Spawn a run in the background; 409 when one is already active
fn start_run(state: AppState, mode: SyncMode, options: RunOptions) -> Response {
    let token = {
        let mut current = state.current.lock();
        let locked_elsewhere = state
            .orchestrator
            .status()
            .map(|s| s.run.is_running)
            .unwrap_or(false);
        if current.is_some() || state.orchestrator.state() != SyncState::Idle || locked_elsewhere {
            return error_response(
                StatusCode::CONFLICT,
                &IngestError::RunInProgress("a run is already active".to_string()),
            );
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        token
    };

    let orchestrator = state.orchestrator.clone();
    let current = state.current.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(mode, options, token).await {
            tracing::error!("Background {} run ended with {}: {}", mode, e.kind(), e);
        }
        *current.lock() = None;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": format!("{} ingestion started", mode),
            "dry_run": options.dry_run,
            "fallback": options.fallback,
        })),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: &IngestError) -> Response {
    (
        status,
        Json(json!({
            "error": error.kind(),
            "message": error.to_string(),
        })),
    )
        .into_response()
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
    let args = Args::parse();
    init_logging(args.log_json);

    let mut config = IngestConfig::from_env()?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    let state = AppState {
        orchestrator: Arc::new(SyncOrchestrator::from_config(&config)?),
        current: Arc::new(Mutex::new(None)),
        default_dry_run: config.sync.dry_run,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Ingest server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

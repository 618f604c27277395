//! Sync orchestration
//!
//! [`SyncOrchestrator`] drives full and incremental runs:
//!
//! ```text
//! Idle -> FullSync | IncrementalSync -> Committing -> Idle
//! ```
//!
//! Only one run executes at a time, guarded in process by an async mutex and
//! across processes by the durable [`RunLock`]. The cursor is written last,
//! after every index mutation of the run succeeded, so a crash replays the
//! same events instead of losing them.

mod containers;
mod full;
mod incremental;
mod stats;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityClassifier, ActivityClient, ActivityFeed};
use crate::config::{IngestConfig, SyncSettings};
use crate::document::{DocumentAssembler, TextExtractor, TikaExtractor};
use crate::error::{IngestError, Result};
use crate::index::{DryRunIndex, ElasticIndex, IndexSink};
use crate::locator::{DossierLocator, DossierPath};
use crate::permissions::PermissionResolver;
use crate::remote::{NextcloudClient, RemoteFiles};
use crate::storage::{CursorStore, RunLock, Storage};
use crate::types::{Container, Cursor, DirEntry, EventId, RunReport, RunStatus, SyncMode, SyncState};

pub use containers::{walk_files, TreeStats};
pub use stats::StatsLedger;

/// External collaborators of a sync run
#[derive(Clone)]
pub struct SyncComponents {
    pub remote: Arc<dyn RemoteFiles>,
    pub feed: Arc<dyn ActivityFeed>,
    pub extractor: Arc<dyn TextExtractor>,
    pub index: Arc<dyn IndexSink>,
    pub storage: Storage,
}

/// Per-run switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Replace a failed incremental run with a full run
    pub fallback: bool,
    /// Log index writes instead of applying them and keep the cursor
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fallback: true,
            dry_run: false,
        }
    }
}

/// Snapshot served by the status surfaces
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: SyncState,
    pub cursor: Cursor,
    pub run: RunStatus,
}

/// State shared by the phases of one run
struct RunContext {
    index: Arc<dyn IndexSink>,
    dry_run: bool,
    cancel: CancellationToken,
}

impl RunContext {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        Ok(())
    }
}

/// Drives full and incremental synchronization
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteFiles>,
    index: Arc<dyn IndexSink>,
    activity: ActivityClient,
    classifier: ActivityClassifier,
    permissions: Arc<PermissionResolver>,
    assembler: DocumentAssembler,
    cursor: CursorStore,
    lock: RunLock,
    locator: DossierLocator,
    settings: SyncSettings,
    state: watch::Sender<SyncState>,
    running: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        components: SyncComponents,
        locator: DossierLocator,
        settings: SyncSettings,
    ) -> Result<Self> {
        let cursor = CursorStore::new(components.storage.clone());
        cursor.initialize()?;
        let lock = RunLock::new(
            components.storage,
            std::time::Duration::from_secs(settings.lock_timeout_secs),
        );

        let activity = ActivityClient::new(components.feed, &settings);
        let permissions = Arc::new(PermissionResolver::new(
            components.remote.clone(),
            settings.group_cache_ttl(),
        ));
        let assembler = DocumentAssembler::new(
            components.remote.clone(),
            components.extractor,
            permissions.clone(),
            activity.clone(),
        );
        let (state, _) = watch::channel(SyncState::Idle);

        Ok(Self {
            remote: components.remote,
            index: components.index,
            activity,
            classifier: ActivityClassifier::new(),
            permissions,
            assembler,
            cursor,
            lock,
            locator,
            settings,
            state,
            running: Mutex::new(()),
        })
    }

    /// Wire the production collaborators: Nextcloud, Tika, Elasticsearch
    /// and the on-disk state database
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        config.validate()?;
        let nextcloud = Arc::new(NextcloudClient::new(&config.nextcloud, &config.sync)?);
        let components = SyncComponents {
            remote: nextcloud.clone(),
            feed: nextcloud,
            extractor: Arc::new(TikaExtractor::new(&config.tika_url, &config.sync)?),
            index: Arc::new(ElasticIndex::new(&config.elastic, &config.sync)?),
            storage: Storage::open(&config.expanded_db_path())?,
        };
        let locator = DossierLocator::new(
            config.nextcloud.dossier_parent_path.as_str(),
            config.nextcloud.username.as_str(),
        );
        Self::new(components, locator, config.sync.clone())
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            state: self.state(),
            cursor: self.cursor.get()?,
            run: self.lock.status()?,
        })
    }

    /// Execute one run. Fails with `RunInProgress` when another run holds
    /// the lock, and with `Cancelled` when `cancel` fires mid-run.
    pub async fn run(
        &self,
        mode: SyncMode,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| IngestError::RunInProgress("run active in this process".to_string()))?;
        let guard = self.lock.try_acquire(mode)?;

        let dry_run = options.dry_run;
        let index: Arc<dyn IndexSink> = if dry_run {
            tracing::info!("Dry run mode enabled");
            Arc::new(DryRunIndex::new(self.index.clone()))
        } else {
            self.index.clone()
        };
        let ctx = RunContext {
            index,
            dry_run,
            cancel,
        };

        self.permissions.invalidate().await;
        tracing::info!("Starting {} sync", mode);

        let result = match mode {
            SyncMode::Full => self.full_sync(&ctx).await,
            SyncMode::Incremental => match self.incremental_sync(&ctx).await {
                Err(e) if options.fallback && e.allows_fallback() => {
                    tracing::error!("Incremental sync failed: {}; falling back to full sync", e);
                    self.full_sync(&ctx).await.map(|mut report| {
                        report.fell_back = true;
                        report
                    })
                }
                other => other,
            },
        };

        self.set_state(SyncState::Idle);

        let final_mode = result.as_ref().map(|r| r.mode).unwrap_or(mode);
        if let Err(e) = guard.finish(final_mode, result.as_ref().map(|_| ())) {
            tracing::error!("Failed to record run outcome: {}", e);
        }

        match &result {
            Ok(report) => tracing::info!(
                mode = %report.mode,
                fell_back = report.fell_back,
                dry_run = report.dry_run,
                events = report.events_fetched,
                actionable = report.events_actionable,
                containers = report.containers_indexed,
                indexed = report.files_indexed,
                deleted = report.files_deleted,
                skipped = report.files_skipped,
                failed = report.files_failed,
                cursor_before = report.cursor_before,
                cursor_after = report.cursor_after,
                "Sync complete"
            ),
            Err(e) => tracing::error!("{} sync failed: {}", mode, e),
        }
        result
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Sync state {:?} -> {:?}", previous, state);
        }
    }

    /// Walk-derived container document, upserted immediately
    async fn index_container(
        &self,
        ctx: &RunContext,
        located: &DossierPath,
        files: &[DirEntry],
    ) -> Result<Container> {
        let stats = TreeStats::from_files(files);
        let members = self.permissions.resolve(&located.root, &located.owner).await;
        let remote_id = self
            .assembler
            .resolve_stable_id(&located.root, &located.owner)
            .await;

        let container = Container {
            id: located.container_id(),
            name: located.name.clone(),
            path: located.root.clone(),
            owner: located.owner.clone(),
            members,
            file_count: stats.file_count,
            total_size: stats.total_size,
            created_at: stats.first_created,
            remote_id,
        };
        tracing::info!(
            "Indexing dossier {} at {}: {} files, {} bytes",
            container.name,
            container.path,
            container.file_count,
            container.total_size
        );
        ctx.index.upsert_container(&container).await?;
        Ok(container)
    }

    /// Advance the cursor, the last step of a successful run
    fn commit(&self, ctx: &RunContext, report: &mut RunReport, event_id: EventId) -> Result<()> {
        self.set_state(SyncState::Committing);
        if ctx.dry_run {
            tracing::info!("Dry run: cursor stays at {} (would be {})", report.cursor_before, event_id);
            return Ok(());
        }
        let cursor = self.cursor.set(event_id, Utc::now())?;
        report.cursor_after = cursor.last_event_id;
        tracing::info!("Cursor committed at {}", cursor.last_event_id);
        Ok(())
    }
}

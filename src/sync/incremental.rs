use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};

use super::containers::walk_files;
use super::stats::StatsLedger;
use super::{RunContext, SyncOrchestrator};
use crate::error::{IngestError, Result};
use crate::types::{ActivityEvent, IndexedFile, RunReport, StatsDelta, SyncMode, SyncState};

/// Result of rebuilding one changed path
enum FileOutcome {
    Indexed(Vec<(String, StatsDelta)>),
    Skipped,
    Cancelled,
}

impl SyncOrchestrator {
    /// Apply the activity log since the cursor
    pub(super) async fn incremental_sync(&self, ctx: &RunContext) -> Result<RunReport> {
        self.set_state(SyncState::IncrementalSync);
        let cursor = self.cursor.get()?;
        let since = cursor.last_event_id;
        let mut report = RunReport::new(SyncMode::Incremental, ctx.dry_run, since);

        let raw = self.activity.fetch_all_since(since).await?;
        report.events_fetched = raw.len();
        let max_raw = raw.iter().map(|e| e.id).max();
        let kept: Vec<ActivityEvent> = raw.into_iter().filter(|e| e.id > since).collect();

        let Some(max_kept) = kept.iter().map(|e| e.id).max() else {
            match max_raw {
                Some(id) if id > since => {
                    tracing::info!("No new activities past {}, fast-forwarding to {}", since, id);
                    self.commit(ctx, &mut report, id)?;
                }
                _ => tracing::info!("No new activities since {}", since),
            }
            report.finished_at = chrono::Utc::now();
            return Ok(report);
        };
        report.events_actionable = kept
            .iter()
            .filter(|e| self.classifier.is_relevant(e))
            .count();
        tracing::info!(
            "Processing {} activities ({} actionable) after {}",
            kept.len(),
            report.events_actionable,
            since
        );

        let mut ledger = StatsLedger::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for candidate in self.classifier.container_candidates(&kept, &self.locator) {
            ctx.check_cancelled()?;
            let id = candidate.container_id();
            if ctx.index.container_exists(&id).await? {
                continue;
            }
            match self.remote.stat(&candidate.root).await? {
                Some(meta) if meta.is_dir => {}
                _ => {
                    tracing::debug!("Dossier {} no longer exists", candidate.root);
                    continue;
                }
            }
            let files = walk_files(self.remote.as_ref(), &candidate.root).await?;
            self.index_container(ctx, &candidate, &files).await?;
            ledger.exclude(id);
            report.containers_indexed += 1;
            pending.extend(files.into_iter().map(|f| f.path));
        }

        let changes = self.classifier.extract_paths(&kept);
        let mut cancelled = false;

        for path in &changes.deleted {
            if ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(located) = self.locator.locate(path) else {
                tracing::debug!("Ignoring deletion outside dossiers: {}", path);
                report.files_skipped += 1;
                continue;
            };
            match self.delete_path(ctx, &located.canonical).await {
                Ok(Some((container_id, delta))) => {
                    ledger.record(&container_id, delta);
                    report.files_deleted += 1;
                }
                Ok(None) => report.files_skipped += 1,
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", located.canonical, e);
                    report.files_failed += 1;
                }
            }
        }

        for path in changes.changed() {
            match self.locator.locate(&path) {
                Some(located) if !located.is_root => {
                    pending.insert(located.canonical);
                }
                _ => {
                    tracing::debug!("Ignoring change outside dossiers: {}", path);
                    report.files_skipped += 1;
                }
            }
        }

        if !cancelled {
            let outcomes: Vec<(String, Result<FileOutcome>)> = stream::iter(pending)
                .map(|path| async move {
                    let outcome = self.upsert_path(ctx, &path).await;
                    (path, outcome)
                })
                .buffer_unordered(self.settings.assembly_concurrency.max(1))
                .collect()
                .await;

            for (path, outcome) in outcomes {
                match outcome {
                    Ok(FileOutcome::Indexed(deltas)) => {
                        for (container_id, delta) in deltas {
                            ledger.record(&container_id, delta);
                        }
                        report.files_indexed += 1;
                    }
                    Ok(FileOutcome::Skipped) => report.files_skipped += 1,
                    Ok(FileOutcome::Cancelled) => cancelled = true,
                    Err(e) => {
                        tracing::warn!("Failed to index {}: {}", path, e);
                        report.files_failed += 1;
                    }
                }
            }
        }

        for (container_id, delta) in ledger.drain() {
            tracing::debug!(
                "Dossier {}: count {:+}, size {:+}",
                container_id,
                delta.file_count,
                delta.total_size
            );
            ctx.index.apply_container_delta(&container_id, delta).await?;
        }

        if cancelled {
            tracing::warn!("Cancelled after {} files; cursor stays at {}", report.files_indexed, since);
            return Err(IngestError::Cancelled);
        }

        self.commit(ctx, &mut report, max_kept)?;
        report.finished_at = chrono::Utc::now();
        Ok(report)
    }

    /// Delete the record at a canonical path, returning the counter change
    async fn delete_path(
        &self,
        ctx: &RunContext,
        path: &str,
    ) -> Result<Option<(String, StatsDelta)>> {
        let previous = ctx.index.lookup_file(path).await?;
        let deleted = ctx.index.delete_file(path).await?;
        tracing::debug!("Deleted {} record(s) at {}", deleted, path);
        Ok(match previous {
            Some(prev) if deleted > 0 => Some((
                prev.container_id,
                StatsDelta::new(-(deleted as i64), -prev.size),
            )),
            _ => None,
        })
    }

    /// Rebuild the record at a canonical path
    async fn upsert_path(&self, ctx: &RunContext, path: &str) -> Result<FileOutcome> {
        if ctx.cancel.is_cancelled() {
            return Ok(FileOutcome::Cancelled);
        }
        let Some(located) = self.locator.locate(path) else {
            return Ok(FileOutcome::Skipped);
        };
        let metadata = match self.remote.stat(path).await? {
            Some(meta) if !meta.is_dir => meta,
            Some(_) => return Ok(FileOutcome::Skipped),
            None => {
                tracing::debug!("{} vanished before indexing", path);
                return Ok(FileOutcome::Skipped);
            }
        };

        let record = self
            .assembler
            .build_with_metadata(path, &located.container_ref(), metadata)
            .await?;

        // A moved file keeps its document id but not its path.
        let previous = match ctx.index.lookup_file(path).await? {
            Some(prev) => Some(prev),
            None if record.remote_id.is_some() => {
                ctx.index.lookup_document(&record.document_id()).await?
            }
            None => None,
        };

        ctx.index.upsert_file(&record).await?;
        Ok(FileOutcome::Indexed(file_deltas(
            previous,
            &record.container_id,
            record.size,
        )))
    }
}

/// Counter changes for a file now stored in `container_id` with `size`
fn file_deltas(
    previous: Option<IndexedFile>,
    container_id: &str,
    size: i64,
) -> Vec<(String, StatsDelta)> {
    match previous {
        None => vec![(container_id.to_string(), StatsDelta::new(1, size))],
        Some(prev) if prev.container_id == container_id => {
            vec![(container_id.to_string(), StatsDelta::new(0, size - prev.size))]
        }
        Some(prev) => vec![
            (prev.container_id, StatsDelta::new(-1, -prev.size)),
            (container_id.to_string(), StatsDelta::new(1, size)),
        ],
    }
}

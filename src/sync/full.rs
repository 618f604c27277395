use futures::stream::{self, StreamExt, TryStreamExt};

use super::containers::walk_files;
use super::{RunContext, SyncOrchestrator};
use crate::error::{IngestError, Result};
use crate::locator::DossierPath;
use crate::types::{ContainerRef, DirEntry, RunReport, SyncMode, SyncState};

impl SyncOrchestrator {
    /// Rebuild every dossier of every user. Any failure aborts the run with
    /// the cursor untouched.
    pub(super) async fn full_sync(&self, ctx: &RunContext) -> Result<RunReport> {
        self.set_state(SyncState::FullSync);
        let cursor = self.cursor.get()?;
        let mut report = RunReport::new(SyncMode::Full, ctx.dry_run, cursor.last_event_id);

        ctx.index.ensure_indices().await?;

        // Read before walking: events that land mid-walk replay next run.
        let latest = self.activity.get_latest_id().await;

        let users = self.remote.list_users().await?;
        tracing::info!("Full sync over {} users", users.len());

        for user in &users {
            ctx.check_cancelled()?;
            let parent = self.locator.parent_path(user);
            let entries = match self.remote.list_dir(&parent).await {
                Ok(entries) => entries,
                Err(IngestError::NotFound(_)) => {
                    tracing::debug!("User {} has no {}", user, parent);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for dir in entries.into_iter().filter(|e| e.is_dir) {
                ctx.check_cancelled()?;
                let Some(located) = self.locator.locate(&dir.path) else {
                    tracing::warn!("Skipping unexpected folder {}", dir.path);
                    continue;
                };
                let files = walk_files(self.remote.as_ref(), &located.root).await?;
                self.index_container(ctx, &located, &files).await?;
                report.containers_indexed += 1;
                report.files_indexed += self.index_files(ctx, &located, files).await?;
            }
        }

        if latest > 0 {
            self.commit(ctx, &mut report, latest)?;
        } else {
            tracing::info!("No activities seen, cursor stays at {}", report.cursor_before);
        }
        report.finished_at = chrono::Utc::now();
        Ok(report)
    }

    /// Assemble and upsert walked files concurrently; the first failure wins
    async fn index_files(
        &self,
        ctx: &RunContext,
        located: &DossierPath,
        files: Vec<DirEntry>,
    ) -> Result<usize> {
        let container = located.container_ref();
        let container = &container;
        let indexed: Vec<()> = stream::iter(files)
            .map(|entry| self.index_one(ctx, container, entry))
            .buffer_unordered(self.settings.assembly_concurrency.max(1))
            .try_collect()
            .await?;
        Ok(indexed.len())
    }

    async fn index_one(
        &self,
        ctx: &RunContext,
        container: &ContainerRef,
        entry: DirEntry,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let record = self
            .assembler
            .build_with_metadata(&entry.path, container, entry.metadata)
            .await?;
        ctx.index.upsert_file(&record).await
    }
}

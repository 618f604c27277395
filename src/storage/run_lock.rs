//! Run lock backed by the `run_state` row
//!
//! Only one sync run may hold the row at a time. The flag is flipped by a
//! conditional UPDATE so two processes sharing the database cannot both win.
//! Each acquisition writes a fresh owner token; only the holder of the
//! current token can release the row, so a run whose lock was taken over as
//! stale cannot free the lock of the run that replaced it.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::params;

use super::Storage;
use crate::error::{IngestError, Result};
use crate::types::{RunStatus, SyncMode};

/// Durable mutual exclusion between sync runs
#[derive(Clone)]
pub struct RunLock {
    storage: Storage,
    stale_after: Duration,
}

/// Proof of holding the run lock; released on `finish` or drop
pub struct RunGuard {
    storage: Storage,
    mode: SyncMode,
    token: String,
    released: bool,
}

impl RunLock {
    pub fn new(storage: Storage, stale_after: std::time::Duration) -> Self {
        Self {
            storage,
            stale_after: Duration::from_std(stale_after).unwrap_or_else(|_| Duration::hours(6)),
        }
    }

    /// Take the lock for a run of the given mode
    pub fn try_acquire(&self, mode: SyncMode) -> Result<RunGuard> {
        let now = Utc::now();
        let stale_before = timestamp(now - self.stale_after);
        let token = format!("{:016x}", rand::random::<u64>());

        self.storage.with_transaction(|conn| {
            let holder: (i64, Option<String>, Option<String>) = conn.query_row(
                "SELECT is_running, current_mode, started_at FROM run_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let changed = conn.execute(
                "UPDATE run_state
                 SET is_running = 1, current_mode = ?, started_at = ?, run_token = ?
                 WHERE id = 1 AND (is_running = 0 OR started_at IS NULL OR started_at < ?)",
                params![mode.to_string(), timestamp(now), token, stale_before],
            )?;

            if changed == 0 {
                let (_, current, started) = holder;
                return Err(IngestError::RunInProgress(format!(
                    "{} run started at {}",
                    current.unwrap_or_else(|| "unknown".to_string()),
                    started.unwrap_or_else(|| "unknown".to_string())
                )));
            }

            if holder.0 != 0 {
                tracing::warn!(
                    previous_mode = holder.1.as_deref().unwrap_or("unknown"),
                    previous_start = holder.2.as_deref().unwrap_or("unknown"),
                    "Taking over stale run lock"
                );
            }
            Ok(())
        })?;

        tracing::debug!(mode = %mode, "Run lock acquired");
        Ok(RunGuard {
            storage: self.storage.clone(),
            mode,
            token,
            released: false,
        })
    }

    /// Current and last run status
    pub fn status(&self) -> Result<RunStatus> {
        self.storage.with_connection(|conn| {
            let status = conn.query_row(
                "SELECT is_running, current_mode, started_at, last_mode, last_finished_at,
                        last_error_kind, last_error
                 FROM run_state WHERE id = 1",
                [],
                |row| {
                    let is_running: i64 = row.get(0)?;
                    let current_mode: Option<String> = row.get(1)?;
                    let started_at: Option<String> = row.get(2)?;
                    let last_mode: Option<String> = row.get(3)?;
                    let last_finished_at: Option<String> = row.get(4)?;
                    Ok(RunStatus {
                        is_running: is_running != 0,
                        current_mode: current_mode.and_then(|m| m.parse().ok()),
                        started_at: started_at.as_deref().and_then(parse_time),
                        last_mode: last_mode.and_then(|m| m.parse().ok()),
                        last_finished_at: last_finished_at.as_deref().and_then(parse_time),
                        last_error_kind: row.get(5)?,
                        last_error: row.get(6)?,
                    })
                },
            )?;
            Ok(status)
        })
    }
}

impl RunGuard {
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Release the lock and record how the run ended
    pub fn finish(
        mut self,
        mode: SyncMode,
        outcome: std::result::Result<(), &IngestError>,
    ) -> Result<()> {
        let (kind, message) = match outcome {
            Ok(()) => (None, None),
            Err(e) => (Some(e.kind().to_string()), Some(e.to_string())),
        };
        let result = release(&self.storage, &self.token, Some(mode), kind, message);
        self.released = true;
        result
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(mode = %self.mode, "Run ended without reporting an outcome");
        if let Err(e) = release(
            &self.storage,
            &self.token,
            Some(self.mode),
            Some("abandoned".to_string()),
            Some("run ended without reporting an outcome".to_string()),
        ) {
            tracing::error!("Failed to release run lock: {}", e);
        }
    }
}

/// Clear the row if `token` still owns it; a taken-over row is left alone
fn release(
    storage: &Storage,
    token: &str,
    mode: Option<SyncMode>,
    error_kind: Option<String>,
    error: Option<String>,
) -> Result<()> {
    storage.with_connection(|conn| {
        let changed = conn.execute(
            "UPDATE run_state
             SET is_running = 0,
                 current_mode = NULL,
                 started_at = NULL,
                 run_token = NULL,
                 last_mode = ?,
                 last_finished_at = ?,
                 last_error_kind = ?,
                 last_error = ?
             WHERE id = 1 AND run_token = ?",
            params![
                mode.map(|m| m.to_string()),
                timestamp(Utc::now()),
                error_kind,
                error,
                token
            ],
        )?;
        if changed == 0 {
            tracing::warn!(
                mode = ?mode,
                "Run lock was taken over by another run; leaving it held"
            );
        }
        Ok(())
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

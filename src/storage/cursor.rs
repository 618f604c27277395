//! Durable activity cursor
//!
//! A single row in `activity_state` records the highest activity id whose
//! effects are committed to the index.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::Storage;
use crate::error::{IngestError, Result};
use crate::types::{Cursor, EventId};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Reads and advances the sync cursor
#[derive(Clone)]
pub struct CursorStore {
    storage: Storage,
}

impl CursorStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Ensure the cursor row exists, creating it at id 0
    pub fn initialize(&self) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO activity_state (id, last_event_id, last_check_time)
                 VALUES (1, 0, ?)",
                params![Utc::now().format(TIME_FORMAT).to_string()],
            )?;
            Ok(())
        })
    }

    /// Current cursor
    pub fn get(&self) -> Result<Cursor> {
        self.storage.with_connection(|conn| {
            read_cursor(conn)?.ok_or_else(|| {
                IngestError::Storage("cursor row missing; run initialize first".to_string())
            })
        })
    }

    /// Overwrite the cursor, never moving it backwards
    pub fn set(&self, event_id: EventId, timestamp: DateTime<Utc>) -> Result<Cursor> {
        self.storage.with_transaction(|conn| {
            let current = read_cursor(conn)?.ok_or_else(|| {
                IngestError::Storage("cursor row missing; run initialize first".to_string())
            })?;

            if event_id < current.last_event_id {
                tracing::warn!(
                    requested = event_id,
                    stored = current.last_event_id,
                    "Refusing to move cursor backwards"
                );
                return Ok(current);
            }

            conn.execute(
                "UPDATE activity_state
                 SET last_event_id = ?, last_check_time = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = 1",
                params![event_id, timestamp.format(TIME_FORMAT).to_string()],
            )?;

            tracing::debug!(from = current.last_event_id, to = event_id, "Cursor advanced");
            Ok(Cursor {
                last_event_id: event_id,
                last_check_time: timestamp,
            })
        })
    }
}

fn read_cursor(conn: &Connection) -> Result<Option<Cursor>> {
    let row = conn
        .query_row(
            "SELECT last_event_id, last_check_time FROM activity_state WHERE id = 1",
            [],
            |row| {
                let id: i64 = row.get(0)?;
                let time: String = row.get(1)?;
                Ok((id, time))
            },
        )
        .optional()?;

    Ok(row.map(|(last_event_id, time)| Cursor {
        last_event_id,
        last_check_time: parse_time(&time).unwrap_or_else(Utc::now),
    }))
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> CursorStore {
        let store = CursorStore::new(Storage::open_in_memory().unwrap());
        store.initialize().unwrap();
        store
    }

    #[test]
    fn test_initial_cursor_is_zero() {
        let store = store();
        store.initialize().unwrap();
        assert_eq!(store.get().unwrap().last_event_id, 0);
    }

    #[test]
    fn test_set_and_get() {
        let store = store();
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        store.set(101, when).unwrap();

        let cursor = store.get().unwrap();
        assert_eq!(cursor.last_event_id, 101);
        assert_eq!(cursor.last_check_time, when);
    }

    #[test]
    fn test_never_moves_backwards() {
        let store = store();
        store.set(200, Utc::now()).unwrap();
        let kept = store.set(150, Utc::now()).unwrap();
        assert_eq!(kept.last_event_id, 200);
        assert_eq!(store.get().unwrap().last_event_id, 200);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let path = path.to_str().unwrap();
        {
            let store = CursorStore::new(Storage::open(path).unwrap());
            store.initialize().unwrap();
            store.set(77, Utc::now()).unwrap();
        }
        let store = CursorStore::new(Storage::open(path).unwrap());
        assert_eq!(store.get().unwrap().last_event_id, 77);
    }
}

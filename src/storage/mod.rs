//! Local state for the ingestor
//!
//! Handles the SQLite database, WAL mode, schema management, the activity
//! cursor and the run lock.

mod connection;
mod cursor;
mod migrations;
mod run_lock;

pub use connection::Storage;
pub use cursor::CursorStore;
pub use migrations::SCHEMA_VERSION;
pub use run_lock::{RunGuard, RunLock};

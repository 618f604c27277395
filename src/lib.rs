//! Dossier Ingest - Nextcloud to search index synchronization
//!
//! Keeps a search index of case dossiers in step with a Nextcloud host,
//! driven by the host's activity log, with full rebuilds as a fallback.

pub mod activity;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod locator;
pub mod permissions;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::{IngestConfig, SyncSettings};
pub use error::{IngestError, Result};
pub use storage::Storage;
pub use sync::{RunOptions, StatusReport, SyncComponents, SyncOrchestrator};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

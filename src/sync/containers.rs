//! Dossier tree walking and container documents

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::document::parse_timestamp;
use crate::error::Result;
use crate::remote::RemoteFiles;
use crate::types::DirEntry;

/// Every file below `root`, breadth first. Uses an explicit FIFO worklist
/// so deep trees do not grow the stack.
pub async fn walk_files(remote: &dyn RemoteFiles, root: &str) -> Result<Vec<DirEntry>> {
    let mut pending = VecDeque::from([root.to_string()]);
    let mut files = Vec::new();

    while let Some(dir) = pending.pop_front() {
        for entry in remote.list_dir(&dir).await? {
            if entry.is_dir {
                pending.push_back(entry.path);
            } else {
                files.push(entry);
            }
        }
    }

    tracing::debug!("Walked {}: {} files", root, files.len());
    Ok(files)
}

/// Counters derived from a walked tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub file_count: i64,
    pub total_size: i64,
    /// Earliest creation (or modification) time of any file
    pub first_created: Option<DateTime<Utc>>,
}

impl TreeStats {
    pub fn from_files(files: &[DirEntry]) -> Self {
        let first_created = files
            .iter()
            .filter_map(|f| {
                f.metadata
                    .created
                    .as_deref()
                    .or(f.metadata.modified.as_deref())
                    .and_then(parse_timestamp)
            })
            .min();
        Self {
            file_count: files.len() as i64,
            total_size: files.iter().map(|f| f.metadata.size.max(0)).sum(),
            first_created,
        }
    }
}

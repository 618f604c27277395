use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::IndexSink;
use crate::error::Result;
use crate::types::{Container, FileRecord, IndexedFile, StatsDelta};

#[derive(Default)]
struct MemoryState {
    ready: bool,
    containers: BTreeMap<String, Container>,
    /// Keyed by document id
    files: BTreeMap<String, FileRecord>,
    mutations: u64,
}

/// In-process index
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    pub fn container(&self, id: &str) -> Option<Container> {
        self.state.lock().containers.get(id).cloned()
    }

    pub fn containers(&self) -> Vec<Container> {
        self.state.lock().containers.values().cloned().collect()
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.state.lock().files.values().cloned().collect()
    }

    pub fn file_by_path(&self, path: &str) -> Option<FileRecord> {
        self.state
            .lock()
            .files
            .values()
            .find(|r| r.path == path)
            .cloned()
    }

    /// Number of writes applied so far (upserts, effective deletes, deltas)
    pub fn mutation_count(&self) -> u64 {
        self.state.lock().mutations
    }
}

#[async_trait]
impl IndexSink for MemoryIndex {
    async fn ensure_indices(&self) -> Result<()> {
        self.state.lock().ready = true;
        Ok(())
    }

    async fn upsert_container(&self, container: &Container) -> Result<()> {
        let mut state = self.state.lock();
        state.containers.insert(container.id.clone(), container.clone());
        state.mutations += 1;
        Ok(())
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        Ok(self.state.lock().containers.contains_key(container_id))
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.files.insert(record.document_id(), record.clone());
        state.mutations += 1;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.files.len();
        state.files.retain(|_, r| r.path != path);
        let deleted = (before - state.files.len()) as u64;
        if deleted > 0 {
            state.mutations += 1;
        }
        Ok(deleted)
    }

    async fn lookup_file(&self, path: &str) -> Result<Option<IndexedFile>> {
        Ok(self
            .state
            .lock()
            .files
            .values()
            .find(|r| r.path == path)
            .map(|r| IndexedFile {
                container_id: r.container_id.clone(),
                size: r.size,
            }))
    }

    async fn lookup_document(&self, document_id: &str) -> Result<Option<IndexedFile>> {
        Ok(self.state.lock().files.get(document_id).map(|r| IndexedFile {
            container_id: r.container_id.clone(),
            size: r.size,
        }))
    }

    async fn apply_container_delta(&self, container_id: &str, delta: StatsDelta) -> Result<()> {
        let mut state = self.state.lock();
        match state.containers.get_mut(container_id) {
            Some(container) => {
                container.file_count = (container.file_count + delta.file_count).max(0);
                container.total_size = (container.total_size + delta.total_size).max(0);
                state.mutations += 1;
            }
            None => tracing::warn!("Stats delta for unknown container {}", container_id),
        }
        Ok(())
    }
}

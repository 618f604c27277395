use std::sync::Arc;

use async_trait::async_trait;

use super::IndexSink;
use crate::error::Result;
use crate::types::{Container, FileRecord, IndexedFile, StatsDelta};

/// Logs writes instead of applying them; reads go to the wrapped sink
pub struct DryRunIndex {
    inner: Arc<dyn IndexSink>,
}

impl DryRunIndex {
    pub fn new(inner: Arc<dyn IndexSink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl IndexSink for DryRunIndex {
    async fn ensure_indices(&self) -> Result<()> {
        tracing::info!("Dry run: skipping index creation");
        Ok(())
    }

    async fn upsert_container(&self, container: &Container) -> Result<()> {
        tracing::info!(
            "Dry run: would index dossier {} ({} files, {} bytes)",
            container.name,
            container.file_count,
            container.total_size
        );
        Ok(())
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        self.inner.container_exists(container_id).await
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        tracing::info!("Dry run: would index {}", record.path);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<u64> {
        let existing = self.inner.lookup_file(path).await?;
        tracing::info!("Dry run: would delete {}", path);
        Ok(existing.map(|_| 1).unwrap_or(0))
    }

    async fn lookup_file(&self, path: &str) -> Result<Option<IndexedFile>> {
        self.inner.lookup_file(path).await
    }

    async fn lookup_document(&self, document_id: &str) -> Result<Option<IndexedFile>> {
        self.inner.lookup_document(document_id).await
    }

    async fn apply_container_delta(&self, container_id: &str, delta: StatsDelta) -> Result<()> {
        tracing::info!(
            "Dry run: would update dossier {} stats: count {:+}, size {:+}",
            container_id,
            delta.file_count,
            delta.total_size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::types::container_id;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_writes_are_swallowed_reads_forwarded() {
        let inner = Arc::new(MemoryIndex::new());
        let container = Container {
            id: container_id("u", "D1"),
            name: "D1".into(),
            path: "/u/dossiers/D1".into(),
            owner: "u".into(),
            members: BTreeSet::new(),
            file_count: 0,
            total_size: 0,
            created_at: None,
            remote_id: None,
        };
        inner.upsert_container(&container).await.unwrap();

        let dry = DryRunIndex::new(inner.clone());
        dry.ensure_indices().await.unwrap();
        dry.apply_container_delta(&container.id, StatsDelta::new(1, 10))
            .await
            .unwrap();
        assert!(dry.container_exists(&container.id).await.unwrap());
        assert_eq!(dry.delete_file("/u/dossiers/D1/x.txt").await.unwrap(), 0);

        assert!(!inner.is_ready());
        assert_eq!(inner.container(&container.id).unwrap().file_count, 0);
        assert_eq!(inner.mutation_count(), 1);
    }
}

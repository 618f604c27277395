//! Search index sinks
//!
//! The sync engine writes through [`IndexSink`]. [`ElasticIndex`] talks to
//! Elasticsearch over REST, [`MemoryIndex`] keeps everything in process and
//! [`DryRunIndex`] logs writes while forwarding reads to a real sink.

mod dry_run;
mod elastic;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Container, FileRecord, IndexedFile, StatsDelta};

pub use dry_run::DryRunIndex;
pub use elastic::{EsDocument, EsDossier, ElasticIndex};
pub use memory::MemoryIndex;

/// Storage engine for file records and container documents
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create missing indices with their mappings
    async fn ensure_indices(&self) -> Result<()>;

    /// Insert or replace a container document, counters included
    async fn upsert_container(&self, container: &Container) -> Result<()>;

    async fn container_exists(&self, container_id: &str) -> Result<bool>;

    /// Insert or replace a file record under its document id
    async fn upsert_file(&self, record: &FileRecord) -> Result<()>;

    /// Remove every record stored at `path`, returning how many went
    async fn delete_file(&self, path: &str) -> Result<u64>;

    /// Container and size of the record stored at `path`
    async fn lookup_file(&self, path: &str) -> Result<Option<IndexedFile>>;

    /// Container and size of the record with a given document id
    async fn lookup_document(&self, document_id: &str) -> Result<Option<IndexedFile>>;

    /// Add a delta to a container's counters, clamping each at zero.
    /// A missing container is not an error.
    async fn apply_container_delta(&self, container_id: &str, delta: StatsDelta) -> Result<()>;
}

//! Index-ready record assembly
//!
//! [`DocumentAssembler`] gathers everything a [`FileRecord`] needs: host
//! metadata, extracted text split into paragraphs, a stable remote id, the
//! access set and the last modifier.

mod extract;
mod paragraphs;
mod timestamps;

use std::sync::Arc;

use crate::activity::ActivityClient;
use crate::error::{IngestError, Result};
use crate::permissions::PermissionResolver;
use crate::remote::RemoteFiles;
use crate::types::{ContainerRef, FileMetadata, FileRecord};

pub use extract::{extension, is_supported, TextExtractor, TikaExtractor, SUPPORTED_EXTENSIONS};
pub use paragraphs::segment;
pub use timestamps::parse_timestamp;

/// Builds [`FileRecord`]s from remote paths
#[derive(Clone)]
pub struct DocumentAssembler {
    remote: Arc<dyn RemoteFiles>,
    extractor: Arc<dyn TextExtractor>,
    permissions: Arc<PermissionResolver>,
    activity: ActivityClient,
}

impl DocumentAssembler {
    pub fn new(
        remote: Arc<dyn RemoteFiles>,
        extractor: Arc<dyn TextExtractor>,
        permissions: Arc<PermissionResolver>,
        activity: ActivityClient,
    ) -> Self {
        Self {
            remote,
            extractor,
            permissions,
            activity,
        }
    }

    /// Fetch metadata for `path` and build its record
    pub async fn build(&self, path: &str, container: &ContainerRef) -> Result<FileRecord> {
        let metadata = self
            .remote
            .stat(path)
            .await?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        self.build_with_metadata(path, container, metadata).await
    }

    /// Build a record from metadata already at hand (e.g. from a listing)
    pub async fn build_with_metadata(
        &self,
        path: &str,
        container: &ContainerRef,
        metadata: FileMetadata,
    ) -> Result<FileRecord> {
        let extracted_text = if is_supported(path) {
            let bytes = self.remote.read_file(path).await?;
            match self.extractor.extract(path, &bytes).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("{}", e);
                    String::new()
                }
            }
        } else {
            String::new()
        };
        let paragraphs = segment(&extracted_text);

        let modified_at = metadata.modified.as_deref().and_then(parse_timestamp);
        let created_at = metadata
            .created
            .as_deref()
            .and_then(parse_timestamp)
            .or(modified_at);

        let remote_id = match metadata.file_id.clone() {
            Some(id) => Some(id),
            None => self.resolve_stable_id(path, &container.owner).await,
        };

        let last_modified_by = match remote_id.as_deref() {
            Some(id) => self.activity.last_modifier(id).await,
            None => None,
        }
        .or_else(|| Some(container.owner.clone()));

        let accessible_principals = self.permissions.resolve(path, &container.owner).await;

        let title = path.rsplit('/').next().unwrap_or(path).to_string();

        Ok(FileRecord {
            path: path.to_string(),
            title,
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            owner: container.owner.clone(),
            size: metadata.size,
            content_type: metadata.content_type,
            created_at,
            modified_at,
            remote_id,
            last_modified_by,
            accessible_principals,
            extracted_text,
            paragraphs,
        })
    }

    /// Stable remote id: single-property fetch, then full metadata, then
    /// the activity log. The first strategy that yields an id wins.
    pub async fn resolve_stable_id(&self, path: &str, owner: &str) -> Option<String> {
        match self.remote.file_id(path).await {
            Ok(Some(id)) => return Some(id),
            Ok(None) => {}
            Err(e) => tracing::debug!("Id lookup for {} failed: {}", path, e),
        }

        match self.remote.stat(path).await {
            Ok(Some(FileMetadata {
                file_id: Some(id), ..
            })) => return Some(id),
            Ok(_) => {}
            Err(e) => tracing::debug!("Metadata lookup for {} failed: {}", path, e),
        }

        let id = self.activity.find_object_id(path, owner).await;
        if id.is_none() {
            tracing::warn!("No stable id for {}", path);
        }
        id
    }
}

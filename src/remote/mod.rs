//! Remote file host access
//!
//! [`RemoteFiles`] is everything the sync engine needs from the file host:
//! listing, metadata, bytes, sharing registry, group membership, the group
//! folder registry and per-path ACL entries. [`NextcloudClient`] implements
//! it over WebDAV and the OCS APIs.
//!
//! All paths are canonical user-rooted paths such as
//! `/alice/dossiers/D1/report.pdf`.

mod http;
mod nextcloud;
pub mod ocs;
pub mod webdav;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DirEntry, FileMetadata, GovernedFolder, PermissionGrant, ShareEntry};

pub use http::{check_status, with_retry};
pub use nextcloud::NextcloudClient;

/// Operations consumed from the remote file host
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// All user ids known to the host
    async fn list_users(&self) -> Result<Vec<String>>;

    /// Direct children of a directory
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Metadata for a path, `None` when it does not exist
    async fn stat(&self, path: &str) -> Result<Option<FileMetadata>>;

    /// Raw file bytes
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Lightweight stable id lookup (single property fetch)
    async fn file_id(&self, path: &str) -> Result<Option<String>>;

    /// Shares registered on a path relative to the user root
    async fn shares(&self, relative_path: &str) -> Result<Vec<ShareEntry>>;

    /// All group ids
    async fn list_groups(&self) -> Result<Vec<String>>;

    /// Members of one group
    async fn group_members(&self, group: &str) -> Result<Vec<String>>;

    /// Group folder registry
    async fn governed_folders(&self) -> Result<Vec<GovernedFolder>>;

    /// Direct and inherited ACL entries scoped to a path inside a group folder
    async fn acl_entries(&self, path: &str) -> Result<Vec<PermissionGrant>>;
}

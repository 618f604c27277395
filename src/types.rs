//! Core types for the ingestor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of an entry in the remote activity log
pub type EventId = i64;

/// A user or group identity usable as a grant target
pub type Principal = String;

/// Durable marker of the highest activity id fully processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_event_id: EventId,
    pub last_check_time: DateTime<Utc>,
}

/// Kind of change recorded by an activity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    Changed,
    Deleted,
    Moved,
    Renamed,
    FolderCreated,
    FolderDeleted,
    FolderMoved,
    FolderRenamed,
    /// Anything else the activity app emits (shares, comments, tags, ...)
    Other(String),
}

impl ActivityKind {
    /// Parse the activity app's `type` field
    pub fn from_wire(value: &str) -> Self {
        match value {
            "file_created" => ActivityKind::Created,
            "file_changed" => ActivityKind::Changed,
            "file_deleted" => ActivityKind::Deleted,
            "file_moved" => ActivityKind::Moved,
            "file_renamed" => ActivityKind::Renamed,
            "folder_created" => ActivityKind::FolderCreated,
            "folder_deleted" => ActivityKind::FolderDeleted,
            "folder_moved" => ActivityKind::FolderMoved,
            "folder_renamed" => ActivityKind::FolderRenamed,
            other => ActivityKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActivityKind::Created => "file_created",
            ActivityKind::Changed => "file_changed",
            ActivityKind::Deleted => "file_deleted",
            ActivityKind::Moved => "file_moved",
            ActivityKind::Renamed => "file_renamed",
            ActivityKind::FolderCreated => "folder_created",
            ActivityKind::FolderDeleted => "folder_deleted",
            ActivityKind::FolderMoved => "folder_moved",
            ActivityKind::FolderRenamed => "folder_renamed",
            ActivityKind::Other(s) => s.as_str(),
        }
    }

    pub fn is_creation(&self) -> bool {
        matches!(self, ActivityKind::Created | ActivityKind::FolderCreated)
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, ActivityKind::Deleted | ActivityKind::FolderDeleted)
    }

    /// Move or rename of a file or folder
    pub fn is_relocation(&self) -> bool {
        matches!(
            self,
            ActivityKind::Moved
                | ActivityKind::Renamed
                | ActivityKind::FolderMoved
                | ActivityKind::FolderRenamed
        )
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object parameter of an activity subject (`file`, `oldfile`, `newfile`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichObject {
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// One entry of the remote activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: EventId,
    pub kind: ActivityKind,
    pub app: String,
    pub object_type: String,
    pub object_id: Option<i64>,
    /// Main object path; may be empty for grouped events
    pub primary_path: String,
    /// Every object touched by a grouped event, keyed by remote file id
    pub related_objects: BTreeMap<String, String>,
    /// Rich subject parameters keyed by parameter name
    pub rich_objects: BTreeMap<String, RichObject>,
    pub user: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ActivityEvent {
    /// Minimal event, mostly useful for tests and tooling
    pub fn new(id: EventId, kind: ActivityKind, primary_path: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            app: "files".to_string(),
            object_type: "files".to_string(),
            object_id: None,
            primary_path: primary_path.into(),
            related_objects: BTreeMap::new(),
            rich_objects: BTreeMap::new(),
            user: None,
            timestamp: None,
        }
    }
}

/// A top-level case folder ("dossier")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    /// Canonical folder path (`/{owner}/{parent}/{name}`)
    pub path: String,
    pub owner: Principal,
    pub members: BTreeSet<Principal>,
    pub file_count: i64,
    pub total_size: i64,
    pub created_at: Option<DateTime<Utc>>,
    /// Stable id of the folder on the remote host
    pub remote_id: Option<String>,
}

impl Container {
    pub fn to_ref(&self) -> ContainerRef {
        ContainerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// The parts of a container a file record needs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub owner: Principal,
}

impl ContainerRef {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            id: container_id(owner, name),
            name: name.to_string(),
            owner: owner.to_string(),
        }
    }
}

/// Stable container id: hex SHA-256 of `owner:name`
pub fn container_id(owner: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", owner, name).as_bytes());
    hex::encode(hasher.finalize())
}

/// A paragraph of extracted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub index: usize,
    pub text: String,
}

/// An index-ready file document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub title: String,
    pub container_id: String,
    pub container_name: String,
    pub owner: Principal,
    pub size: i64,
    pub content_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    pub last_modified_by: Option<Principal>,
    pub accessible_principals: BTreeSet<Principal>,
    pub extracted_text: String,
    pub paragraphs: Vec<Paragraph>,
}

impl FileRecord {
    /// Index document id: derived from the remote id, or the path when none was resolved
    pub fn document_id(&self) -> String {
        let key = self.remote_id.as_deref().unwrap_or(&self.path);
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Grant target kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    User,
    Group,
}

/// Whether a grant was set on the path itself or inherited from a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantScope {
    Direct,
    Inherited,
}

/// A path-scoped, bitmask-encoded permission grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal: Principal,
    pub mapping_type: MappingType,
    pub permission_bits: u32,
    pub scope: GrantScope,
}

/// Metadata of a remote file or folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: i64,
    /// Raw timestamp strings as the host reported them
    pub modified: Option<String>,
    pub created: Option<String>,
    pub content_type: Option<String>,
    pub file_id: Option<String>,
    pub etag: Option<String>,
    pub is_dir: bool,
}

/// One child of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    /// Canonical absolute path of the child
    pub path: String,
    pub is_dir: bool,
    pub metadata: FileMetadata,
}

/// A share registered on a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    pub share_with: Principal,
    pub mapping_type: MappingType,
}

/// A centrally managed shared folder from the container registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernedFolder {
    pub id: String,
    pub mount_point: String,
    /// Groups granted access at folder level
    pub groups: BTreeSet<Principal>,
    pub acl_enabled: bool,
}

/// What the index knows about a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub container_id: String,
    pub size: i64,
}

/// Change applied to a container's running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDelta {
    pub file_count: i64,
    pub total_size: i64,
}

impl StatsDelta {
    pub fn new(file_count: i64, total_size: i64) -> Self {
        Self {
            file_count,
            total_size,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.file_count == 0 && self.total_size == 0
    }
}

impl std::ops::AddAssign for StatsDelta {
    fn add_assign(&mut self, other: Self) {
        self.file_count += other.file_count;
        self.total_size += other.total_size;
    }
}

/// File paths touched by a batch of events, by change category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathChanges {
    pub created: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl PathChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Paths that must be (re)built, in stable order
    pub fn changed(&self) -> BTreeSet<String> {
        self.created.union(&self.updated).cloned().collect()
    }
}

/// Kind of sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            _ => Err(format!("Unknown sync mode: {}", s)),
        }
    }
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    FullSync,
    IncrementalSync,
    Committing,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Mode that actually completed
    pub mode: SyncMode,
    /// An incremental run failed and a full run replaced it
    pub fell_back: bool,
    pub dry_run: bool,
    pub events_fetched: usize,
    pub events_actionable: usize,
    pub containers_indexed: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub cursor_before: EventId,
    pub cursor_after: EventId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(mode: SyncMode, dry_run: bool, cursor_before: EventId) -> Self {
        let now = Utc::now();
        Self {
            mode,
            fell_back: false,
            dry_run,
            events_fetched: 0,
            events_actionable: 0,
            containers_indexed: 0,
            files_indexed: 0,
            files_deleted: 0,
            files_skipped: 0,
            files_failed: 0,
            cursor_before,
            cursor_after: cursor_before,
            started_at: now,
            finished_at: now,
        }
    }
}

/// Persisted status of the run lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub current_mode: Option<SyncMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_mode: Option<SyncMode>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error_kind: Option<String>,
    pub last_error: Option<String>,
}

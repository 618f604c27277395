//! In-memory collaborators for sync scenarios

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dossier_ingest::activity::{ActivityFeed, ActivityQuery, FeedResponse, SortOrder};
use dossier_ingest::config::{RetryPolicy, SyncSettings};
use dossier_ingest::document::TextExtractor;
use dossier_ingest::index::MemoryIndex;
use dossier_ingest::locator::DossierLocator;
use dossier_ingest::remote::RemoteFiles;
use dossier_ingest::{
    ActivityEvent, ActivityKind, DirEntry, FileMetadata, GovernedFolder, IngestError,
    PermissionGrant, Result, RichObject, ShareEntry, Storage, SyncComponents, SyncOrchestrator,
};

pub const SERVICE_USER: &str = "admin";
pub const PARENT: &str = "dossiers";

#[derive(Debug, Clone)]
struct Node {
    is_dir: bool,
    content: Vec<u8>,
    file_id: String,
    modified: String,
}

/// How the host answers single-property id lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdLookup {
    #[default]
    Answer,
    Missing,
    Fail,
}

#[derive(Default)]
struct HostState {
    users: Vec<String>,
    nodes: BTreeMap<String, Node>,
    shares: BTreeMap<String, Vec<ShareEntry>>,
    failing_shares: BTreeSet<String>,
    groups: BTreeMap<String, Vec<String>>,
    folders: Vec<GovernedFolder>,
    acl: BTreeMap<String, Vec<PermissionGrant>>,
    next_id: u64,
    listing_ids_hidden: bool,
    stat_ids_hidden: bool,
    id_lookup: IdLookup,
}

/// File host kept in memory, paths user-rooted
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    pub reads: AtomicUsize,
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: &str) {
        let mut state = self.state.lock();
        state.users.push(user.to_string());
        Self::insert_dir(&mut state, &format!("/{}", user));
    }

    fn insert_dir(state: &mut HostState, path: &str) {
        if path == "/" || state.nodes.contains_key(path) {
            return;
        }
        Self::insert_dir(state, &parent_of(path));
        state.next_id += 1;
        let file_id = state.next_id.to_string();
        state.nodes.insert(
            path.to_string(),
            Node {
                is_dir: true,
                content: Vec::new(),
                file_id,
                modified: "2024-01-01T00:00:00Z".to_string(),
            },
        );
    }

    pub fn add_dir(&self, path: &str) {
        Self::insert_dir(&mut self.state.lock(), path);
    }

    /// Create or overwrite a file, returning its stable id
    pub fn put_file(&self, path: &str, content: &str) -> String {
        let mut state = self.state.lock();
        Self::insert_dir(&mut state, &parent_of(path));
        if let Some(node) = state.nodes.get_mut(path) {
            node.content = content.as_bytes().to_vec();
            node.modified = "2024-02-01T00:00:00Z".to_string();
            return node.file_id.clone();
        }
        state.next_id += 1;
        let file_id = state.next_id.to_string();
        state.nodes.insert(
            path.to_string(),
            Node {
                is_dir: false,
                content: content.as_bytes().to_vec(),
                file_id: file_id.clone(),
                modified: "2024-01-15T10:00:00Z".to_string(),
            },
        );
        file_id
    }

    /// Remove a path and everything below it
    pub fn remove(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.state
            .lock()
            .nodes
            .retain(|p, _| p != path && !p.starts_with(&prefix));
    }

    /// Move a file, keeping its stable id
    pub fn rename(&self, from: &str, to: &str) {
        let mut state = self.state.lock();
        Self::insert_dir(&mut state, &parent_of(to));
        if let Some(node) = state.nodes.remove(from) {
            state.nodes.insert(to.to_string(), node);
        }
    }

    pub fn file_id_of(&self, path: &str) -> String {
        self.state.lock().nodes[path].file_id.clone()
    }

    pub fn add_share(&self, relative: &str, share: ShareEntry) {
        self.state
            .lock()
            .shares
            .entry(relative.to_string())
            .or_default()
            .push(share);
    }

    pub fn fail_shares_for(&self, relative: &str) {
        self.state.lock().failing_shares.insert(relative.to_string());
    }

    pub fn add_group(&self, group: &str, members: &[&str]) {
        self.state.lock().groups.insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn add_governed(&self, folder: GovernedFolder) {
        self.state.lock().folders.push(folder);
    }

    pub fn set_acl(&self, path: &str, entries: Vec<PermissionGrant>) {
        self.state.lock().acl.insert(path.to_string(), entries);
    }

    /// Leave `oc:fileid` out of directory listings
    pub fn hide_ids_in_listing(&self) {
        self.state.lock().listing_ids_hidden = true;
    }

    /// Leave `oc:fileid` out of single-path metadata
    pub fn hide_ids_in_stat(&self) {
        self.state.lock().stat_ids_hidden = true;
    }

    pub fn set_id_lookup(&self, lookup: IdLookup) {
        self.state.lock().id_lookup = lookup;
    }
}

#[async_trait]
impl RemoteFiles for FakeHost {
    async fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().users.clone())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            Some(node) if node.is_dir => {}
            _ => return Err(IngestError::NotFound(path.to_string())),
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| parent_of(p) == path)
            .map(|(p, node)| DirEntry {
                name: p.rsplit('/').next().unwrap_or_default().to_string(),
                path: p.clone(),
                is_dir: node.is_dir,
                metadata: metadata(node, !state.listing_ids_hidden),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMetadata>> {
        let state = self.state.lock();
        Ok(state
            .nodes
            .get(path)
            .map(|node| metadata(node, !state.stat_ids_hidden)))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|n| n.content.clone())
            .ok_or_else(|| IngestError::NotFound(path.to_string()))
    }

    async fn file_id(&self, path: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        match state.id_lookup {
            IdLookup::Answer => Ok(state.nodes.get(path).map(|n| n.file_id.clone())),
            IdLookup::Missing => Ok(None),
            IdLookup::Fail => Err(IngestError::from_status(503, "property lookup unavailable")),
        }
    }

    async fn shares(&self, relative_path: &str) -> Result<Vec<ShareEntry>> {
        let state = self.state.lock();
        if state.failing_shares.contains(relative_path) {
            return Err(IngestError::from_status(500, "share lookup exploded"));
        }
        Ok(state.shares.get(relative_path).cloned().unwrap_or_default())
    }

    async fn list_groups(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().groups.keys().cloned().collect())
    }

    async fn group_members(&self, group: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    async fn governed_folders(&self) -> Result<Vec<GovernedFolder>> {
        Ok(self.state.lock().folders.clone())
    }

    async fn acl_entries(&self, path: &str) -> Result<Vec<PermissionGrant>> {
        Ok(self.state.lock().acl.get(path).cloned().unwrap_or_default())
    }
}

fn metadata(node: &Node, with_id: bool) -> FileMetadata {
    FileMetadata {
        size: node.content.len() as i64,
        modified: Some(node.modified.clone()),
        created: None,
        content_type: (!node.is_dir).then(|| "text/plain".to_string()),
        file_id: with_id.then(|| node.file_id.clone()),
        etag: None,
        is_dir: node.is_dir,
    }
}

/// Activity log kept in memory
#[derive(Default)]
pub struct FakeFeed {
    events: Mutex<Vec<ActivityEvent>>,
    failure: Mutex<Option<u16>>,
    pub page_calls: AtomicUsize,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }

    /// Make every page request fail with `status` until cleared
    pub fn fail_with(&self, status: Option<u16>) {
        *self.failure.lock() = status;
    }
}

#[async_trait]
impl ActivityFeed for FakeFeed {
    async fn fetch_page(&self, query: &ActivityQuery) -> Result<FeedResponse> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.failure.lock() {
            return Err(IngestError::from_status(status, "injected failure"));
        }
        let mut events = self.events.lock().clone();
        if events.is_empty() {
            return Ok(FeedResponse::NoContent);
        }
        match query.sort {
            SortOrder::Asc => {
                // inclusive, like a host that cannot be trusted on `since`
                events.retain(|e| e.id >= query.since);
                events.sort_by_key(|e| e.id);
            }
            SortOrder::Desc => events.sort_by_key(|e| std::cmp::Reverse(e.id)),
        }
        if events.is_empty() {
            return Ok(FeedResponse::NotModified);
        }
        events.truncate(query.limit);
        Ok(FeedResponse::Data(events))
    }

    async fn object_activities(&self, object_id: &str) -> Result<FeedResponse> {
        let id: i64 = object_id.parse().unwrap_or(-1);
        Ok(FeedResponse::Data(
            self.events
                .lock()
                .iter()
                .filter(|e| e.object_id == Some(id))
                .cloned()
                .collect(),
        ))
    }
}

/// Treats every file as UTF-8 text
#[derive(Default)]
pub struct PlainExtractor {
    failing: AtomicBool,
}

impl PlainExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every extraction fail until cleared
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextExtractor for PlainExtractor {
    async fn extract(&self, path: &str, bytes: &[u8]) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IngestError::Extraction {
                path: path.to_string(),
                message: "unreadable document".to_string(),
            });
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub fn event(id: i64, kind: ActivityKind, path: &str, object_id: &str, user: &str) -> ActivityEvent {
    let mut event = ActivityEvent::new(id, kind, path);
    event.object_id = object_id.parse().ok();
    event.user = Some(user.to_string());
    event
        .related_objects
        .insert(object_id.to_string(), path.to_string());
    event
}

pub fn renamed(id: i64, from: &str, to: &str, object_id: &str, user: &str) -> ActivityEvent {
    let mut event = event(id, ActivityKind::Renamed, to, object_id, user);
    for (param, path) in [("oldfile", from), ("newfile", to)] {
        event.rich_objects.insert(
            param.to_string(),
            RichObject {
                object_type: "file".to_string(),
                id: Some(object_id.to_string()),
                name: path.rsplit('/').next().map(str::to_string),
                path: Some(path.to_string()),
            },
        );
    }
    event
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        },
        ..SyncSettings::default()
    }
}

/// A wired orchestrator over fakes, sharing one in-memory database
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub feed: Arc<FakeFeed>,
    pub extractor: Arc<PlainExtractor>,
    pub index: Arc<MemoryIndex>,
    pub storage: Storage,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Storage::open_in_memory().unwrap())
    }

    pub fn with_storage(storage: Storage) -> Self {
        let host = Arc::new(FakeHost::new());
        let feed = Arc::new(FakeFeed::new());
        let extractor = Arc::new(PlainExtractor::new());
        let index = Arc::new(MemoryIndex::new());
        let orchestrator =
            Self::orchestrator_over(&host, &feed, &extractor, &index, storage.clone());
        Self {
            host,
            feed,
            extractor,
            index,
            storage,
            orchestrator,
        }
    }

    /// A second orchestrator sharing this harness's collaborators and database
    pub fn sibling(&self) -> Arc<SyncOrchestrator> {
        Self::orchestrator_over(
            &self.host,
            &self.feed,
            &self.extractor,
            &self.index,
            self.storage.clone(),
        )
    }

    fn orchestrator_over(
        host: &Arc<FakeHost>,
        feed: &Arc<FakeFeed>,
        extractor: &Arc<PlainExtractor>,
        index: &Arc<MemoryIndex>,
        storage: Storage,
    ) -> Arc<SyncOrchestrator> {
        let components = SyncComponents {
            remote: host.clone(),
            feed: feed.clone(),
            extractor: extractor.clone(),
            index: index.clone(),
            storage,
        };
        Arc::new(
            SyncOrchestrator::new(
                components,
                DossierLocator::new(PARENT, SERVICE_USER),
                settings(),
            )
            .unwrap(),
        )
    }

    pub fn cursor(&self) -> i64 {
        self.orchestrator.status().unwrap().cursor.last_event_id
    }
}

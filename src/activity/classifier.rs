use std::collections::{BTreeMap, BTreeSet};

use crate::error::IngestError;
use crate::locator::{DossierLocator, DossierPath};
use crate::types::{ActivityEvent, ActivityKind, PathChanges};

const RELEVANT_APPS: &[&str] = &["files", "files_sharing"];
const EXTENSIONLESS_FILES: &[&str] = &["readme", "makefile", "dockerfile", "license", "changelog"];

/// Filters raw activities and sorts their paths into change sets
#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    apps: BTreeSet<String>,
}

impl Default for ActivityClassifier {
    fn default() -> Self {
        Self {
            apps: RELEVANT_APPS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ActivityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// File or folder event from an allowed app that names at least one path
    pub fn is_relevant(&self, event: &ActivityEvent) -> bool {
        if event.object_type != "files" {
            tracing::debug!(id = event.id, "Skipping activity on {:?}", event.object_type);
            return false;
        }
        if !self.apps.contains(&event.app) {
            tracing::debug!(id = event.id, "Skipping activity from app {}", event.app);
            return false;
        }
        // an untyped activity is kept and treated as an update
        if let ActivityKind::Other(kind) = &event.kind {
            if !kind.is_empty() {
                tracing::debug!(id = event.id, "Skipping activity type {}", kind);
                return false;
            }
        }
        if all_paths(event).is_empty() {
            tracing::debug!(id = event.id, "Skipping activity without a path");
            return false;
        }
        true
    }

    /// Categorize every file path of the relevant events
    pub fn extract_paths(&self, events: &[ActivityEvent]) -> PathChanges {
        let mut changes = PathChanges::default();

        for event in events.iter().filter(|e| self.is_relevant(e)) {
            if event.kind.is_relocation() {
                let new_paths = match rich_path(event, "newfile") {
                    Some(p) => vec![p],
                    None => object_paths(event),
                };
                match rich_path(event, "oldfile") {
                    Some(old) if !new_paths.contains(&old) => {
                        add_file(&mut changes.deleted, &old);
                    }
                    Some(_) => {}
                    None => {
                        let ambiguity = IngestError::ClassificationAmbiguity {
                            event_id: event.id,
                            reason: "relocation without an old path".to_string(),
                        };
                        tracing::debug!("{}", ambiguity);
                    }
                }
                for path in &new_paths {
                    add_file(&mut changes.created, path);
                }
                continue;
            }

            let target = if event.kind.is_creation() {
                &mut changes.created
            } else if event.kind.is_deletion() {
                &mut changes.deleted
            } else {
                &mut changes.updated
            };
            for path in all_paths(event) {
                add_file(target, &path);
            }
        }

        let created = changes.created.clone();
        changes.updated.retain(|p| !created.contains(p));

        tracing::info!(
            "Extracted paths - created: {}, updated: {}, deleted: {}",
            changes.created.len(),
            changes.updated.len(),
            changes.deleted.len()
        );
        changes
    }

    /// Dossier roots referenced by creation events, deduplicated
    pub fn container_candidates(
        &self,
        events: &[ActivityEvent],
        locator: &DossierLocator,
    ) -> Vec<DossierPath> {
        let mut roots: BTreeMap<String, DossierPath> = BTreeMap::new();

        for event in events.iter().filter(|e| self.is_relevant(e)) {
            if !(event.kind.is_creation() || event.kind.is_relocation()) {
                continue;
            }
            for path in all_paths(event) {
                let Some(located) = locator.locate(&path) else {
                    continue;
                };
                let root = match located.is_root {
                    true => located,
                    false => match locator.locate(&located.root) {
                        Some(root) => root,
                        None => continue,
                    },
                };
                roots.entry(root.root.clone()).or_insert(root);
            }
        }

        roots.into_values().collect()
    }
}

/// Single leading slash, no trailing slash, no empty segments
pub fn normalize_path(path: &str) -> String {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segs.join("/"))
}

/// Paths with an extension, or a well-known extensionless file name
pub fn is_likely_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or_default();
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return true;
        }
    }
    EXTENSIONLESS_FILES.contains(&name.to_lowercase().as_str())
}

fn add_file(set: &mut BTreeSet<String>, path: &str) {
    if is_likely_file(path) {
        set.insert(path.to_string());
    } else {
        tracing::debug!("Skipping directory path: {}", path);
    }
}

fn rich_path(event: &ActivityEvent, param: &str) -> Option<String> {
    event
        .rich_objects
        .get(param)
        .and_then(|o| o.path.as_deref())
        .filter(|p| !p.trim_matches('/').is_empty())
        .map(normalize_path)
}

/// The grouped objects map, else the primary path
fn object_paths(event: &ActivityEvent) -> Vec<String> {
    let mut paths: Vec<String> = event
        .related_objects
        .values()
        .filter(|p| !p.trim_matches('/').is_empty())
        .map(|p| normalize_path(p))
        .collect();
    if paths.is_empty() && !event.primary_path.trim_matches('/').is_empty() {
        paths.push(normalize_path(&event.primary_path));
    }
    paths
}

/// Object paths plus every rich parameter that carries a path
fn all_paths(event: &ActivityEvent) -> Vec<String> {
    let mut paths: BTreeSet<String> = object_paths(event).into_iter().collect();
    for obj in event.rich_objects.values() {
        if let Some(p) = obj.path.as_deref().filter(|p| !p.trim_matches('/').is_empty()) {
            paths.insert(normalize_path(p));
        }
    }
    paths.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RichObject;
    use pretty_assertions::assert_eq;

    fn rich(path: &str) -> RichObject {
        RichObject {
            object_type: "file".to_string(),
            id: Some("1".to_string()),
            name: None,
            path: Some(path.to_string()),
        }
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relevance_filter() {
        let c = ActivityClassifier::new();
        assert!(c.is_relevant(&ActivityEvent::new(1, ActivityKind::Created, "/d/a.txt")));

        let mut other_app = ActivityEvent::new(2, ActivityKind::Created, "/d/a.txt");
        other_app.app = "comments".into();
        assert!(!c.is_relevant(&other_app));

        let mut other_type = ActivityEvent::new(3, ActivityKind::Created, "/d/a.txt");
        other_type.object_type = "calendar".into();
        assert!(!c.is_relevant(&other_type));

        assert!(!c.is_relevant(&ActivityEvent::new(4, ActivityKind::Other("tag".into()), "/d/a.txt")));
        assert!(!c.is_relevant(&ActivityEvent::new(5, ActivityKind::Changed, "")));
    }

    #[test]
    fn test_untyped_activity_counts_as_update() {
        let c = ActivityClassifier::new();
        let untyped = ActivityEvent::new(1, ActivityKind::from_wire(""), "/dossiers/D1/a.txt");
        assert!(c.is_relevant(&untyped));

        let events = vec![
            untyped,
            ActivityEvent::new(2, ActivityKind::Other("".into()), "/dossiers/D1/b.txt"),
            ActivityEvent::new(3, ActivityKind::Created, "/dossiers/D1/b.txt"),
        ];
        let changes = c.extract_paths(&events);
        assert_eq!(changes.updated, set(&["/dossiers/D1/a.txt"]));
        assert_eq!(changes.created, set(&["/dossiers/D1/b.txt"]));
        assert!(changes.deleted.is_empty());
        assert!(c.container_candidates(&events[..1], &DossierLocator::new("dossiers", "admin")).is_empty());
    }

    #[test]
    fn test_categorizes_and_normalizes() {
        let mut grouped = ActivityEvent::new(1, ActivityKind::Created, "dossiers/D1/a.txt");
        grouped.related_objects.insert("11".into(), "dossiers/D1/a.txt".into());
        grouped.related_objects.insert("12".into(), "/dossiers/D1/b.pdf".into());
        let events = vec![
            grouped,
            ActivityEvent::new(2, ActivityKind::Changed, "/dossiers/D1/a.txt"),
            ActivityEvent::new(3, ActivityKind::Changed, "/dossiers/D1/c.docx"),
            ActivityEvent::new(4, ActivityKind::Deleted, "/dossiers/D1/old.md"),
            ActivityEvent::new(5, ActivityKind::FolderCreated, "/dossiers/D2"),
        ];

        let changes = ActivityClassifier::new().extract_paths(&events);
        assert_eq!(changes.created, set(&["/dossiers/D1/a.txt", "/dossiers/D1/b.pdf"]));
        assert_eq!(changes.updated, set(&["/dossiers/D1/c.docx"]));
        assert_eq!(changes.deleted, set(&["/dossiers/D1/old.md"]));
    }

    #[test]
    fn test_rename_yields_delete_and_create() {
        let mut event = ActivityEvent::new(7, ActivityKind::Renamed, "/dossiers/D1/new.txt");
        event.rich_objects.insert("oldfile".into(), rich("dossiers/D1/old.txt"));
        event.rich_objects.insert("newfile".into(), rich("dossiers/D1/new.txt"));

        let changes = ActivityClassifier::new().extract_paths(&[event]);
        assert_eq!(changes.deleted, set(&["/dossiers/D1/old.txt"]));
        assert_eq!(changes.created, set(&["/dossiers/D1/new.txt"]));
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn test_move_without_old_path_creates_only() {
        let event = ActivityEvent::new(8, ActivityKind::Moved, "/dossiers/D2/x.pdf");
        let changes = ActivityClassifier::new().extract_paths(&[event]);
        assert_eq!(changes.created, set(&["/dossiers/D2/x.pdf"]));
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_is_likely_file() {
        assert!(is_likely_file("/d/D1/report.pdf"));
        assert!(is_likely_file("/d/D1/README"));
        assert!(is_likely_file("/d/D1/Makefile"));
        assert!(!is_likely_file("/d/D1"));
        assert!(!is_likely_file("/d/D1/.hidden"));
        assert!(!is_likely_file("/d/D1/trailing."));
    }

    #[test]
    fn test_container_candidates() {
        let locator = DossierLocator::new("dossiers", "admin");
        let mut folder = ActivityEvent::new(1, ActivityKind::FolderCreated, "/dossiers/New");
        folder.rich_objects.insert("file".into(), rich("dossiers/New"));
        let events = vec![
            folder,
            ActivityEvent::new(2, ActivityKind::Created, "/dossiers/New/a.txt"),
            ActivityEvent::new(3, ActivityKind::Changed, "/dossiers/Old/b.txt"),
            ActivityEvent::new(4, ActivityKind::Created, "/photos/p.jpg"),
        ];
        let roots: Vec<_> = ActivityClassifier::new()
            .container_candidates(&events, &locator)
            .into_iter()
            .map(|d| d.root)
            .collect();
        assert_eq!(roots, vec!["/admin/dossiers/New".to_string()]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a//b/"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
    }
}

//! Mapping between remote paths and dossier containers
//!
//! Activity paths are relative to the account that reads the feed
//! (`/dossiers/D1/a.txt`), WebDAV paths are user-rooted
//! (`/alice/dossiers/D1/a.txt`). Both resolve to the same canonical form.

use crate::types::{container_id, ContainerRef};

/// Where a path sits relative to its dossier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DossierPath {
    pub owner: String,
    pub name: String,
    /// Canonical path of the dossier folder
    pub root: String,
    /// Canonical form of the located path
    pub canonical: String,
    /// The located path is the dossier folder itself
    pub is_root: bool,
}

impl DossierPath {
    pub fn container_id(&self) -> String {
        container_id(&self.owner, &self.name)
    }

    pub fn container_ref(&self) -> ContainerRef {
        ContainerRef::new(&self.owner, &self.name)
    }
}

/// Knows the configured parent folder and the feed's account
#[derive(Debug, Clone)]
pub struct DossierLocator {
    parent: String,
    service_user: String,
}

impl DossierLocator {
    pub fn new(parent: impl Into<String>, service_user: impl Into<String>) -> Self {
        Self {
            parent: parent.into().trim_matches('/').to_string(),
            service_user: service_user.into(),
        }
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn service_user(&self) -> &str {
        &self.service_user
    }

    /// `/{user}/{parent}`
    pub fn parent_path(&self, user: &str) -> String {
        format!("/{}/{}", user, self.parent)
    }

    /// `/{user}/{parent}/{name}`
    pub fn container_root_path(&self, user: &str, name: &str) -> String {
        format!("/{}/{}/{}", user, self.parent, name)
    }

    /// Resolve a path to its dossier, or `None` outside the dossier tree
    pub fn locate(&self, path: &str) -> Option<DossierPath> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (owner, idx) = if segs.first() == Some(&self.parent.as_str()) {
            (self.service_user.as_str(), 0)
        } else if segs.get(1) == Some(&self.parent.as_str()) {
            (segs[0], 1)
        } else {
            return None;
        };

        let name = *segs.get(idx + 1)?;
        let rest = &segs[idx + 2..];

        let root = self.container_root_path(owner, name);
        let canonical = if rest.is_empty() {
            root.clone()
        } else {
            format!("{}/{}", root, rest.join("/"))
        };

        Some(DossierPath {
            owner: owner.to_string(),
            name: name.to_string(),
            root,
            canonical,
            is_root: rest.is_empty(),
        })
    }

    /// Path is a dossier folder itself
    pub fn is_container_root(&self, path: &str) -> bool {
        self.locate(path).map(|d| d.is_root).unwrap_or(false)
    }

    /// Path relative to its owner's root (`/dossiers/D1/a.txt`)
    pub fn user_relative(&self, canonical: &str, owner: &str) -> String {
        let prefix = format!("/{}", owner);
        match canonical.strip_prefix(&prefix) {
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => canonical.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> DossierLocator {
        DossierLocator::new("dossiers", "admin")
    }

    #[test]
    fn test_user_rooted_path() {
        let loc = locator().locate("/u/dossiers/D1/sub/a.txt").unwrap();
        assert_eq!(loc.owner, "u");
        assert_eq!(loc.name, "D1");
        assert_eq!(loc.root, "/u/dossiers/D1");
        assert_eq!(loc.canonical, "/u/dossiers/D1/sub/a.txt");
        assert!(!loc.is_root);
    }

    #[test]
    fn test_feed_relative_path_belongs_to_service_user() {
        let loc = locator().locate("dossiers/D1/a.txt").unwrap();
        assert_eq!(loc.owner, "admin");
        assert_eq!(loc.canonical, "/admin/dossiers/D1/a.txt");
    }

    #[test]
    fn test_roots_and_outsiders() {
        let l = locator();
        assert!(l.is_container_root("/u/dossiers/D1/"));
        assert!(!l.is_container_root("/u/dossiers/D1/a.txt"));
        assert!(l.locate("/u/dossiers").is_none());
        assert!(l.locate("/u/photos/x.jpg").is_none());
        assert!(l.locate("/u/other/dossiers/D1/a.txt").is_none());
    }

    #[test]
    fn test_user_relative() {
        let l = locator();
        assert_eq!(l.user_relative("/u/dossiers/D1/a.txt", "u"), "/dossiers/D1/a.txt");
        assert_eq!(l.user_relative("/uu/dossiers/D1", "u"), "/uu/dossiers/D1");
    }
}

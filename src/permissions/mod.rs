//! Read-access resolution for remote paths
//!
//! Two models coexist on the host:
//!
//! - **Governed folders** (group folders): access comes from the folder's
//!   group grants, optionally narrowed by path-scoped ACL entries.
//! - **Flat shares**: access is the union of every share on the path and
//!   its ancestors.
//!
//! Which one applies is decided by the group folder registry: a path whose
//! leading segments (below the user root) equal a registered mount point is
//! governed. The owner always has access, and any failed lookup falls back
//! to the owner alone.

mod bits;
mod cache;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;

use crate::error::{IngestError, Result};
use crate::remote::RemoteFiles;
use crate::types::{GovernedFolder, GrantScope, MappingType, PermissionGrant, Principal};

pub use bits::{decode, grants_read, Permission};
pub use cache::{load_group_membership, CacheStats, GroupMembership, TtlCell};

/// Computes who may read a path
pub struct PermissionResolver {
    remote: Arc<dyn RemoteFiles>,
    groups: TtlCell<GroupMembership>,
    registry: TtlCell<Vec<GovernedFolder>>,
}

impl PermissionResolver {
    pub fn new(remote: Arc<dyn RemoteFiles>, ttl: Duration) -> Self {
        Self {
            remote,
            groups: TtlCell::new(ttl),
            registry: TtlCell::new(ttl),
        }
    }

    /// Principals allowed to read `path`; `{owner}` when the lookup fails
    pub async fn resolve(&self, path: &str, owner: &str) -> BTreeSet<Principal> {
        match self.try_resolve(path, owner).await {
            Ok(principals) => principals,
            Err(e) => {
                tracing::warn!("{}; restricting to owner {}", e, owner);
                BTreeSet::from([owner.to_string()])
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but surfaces lookup failures
    pub async fn try_resolve(&self, path: &str, owner: &str) -> Result<BTreeSet<Principal>> {
        let lookup_error = |e: IngestError| IngestError::PermissionLookup {
            path: path.to_string(),
            message: e.to_string(),
        };

        let relative = below_user_root(path);
        let registry = self.registry().await.map_err(lookup_error)?;
        let groups = self.membership().await.map_err(lookup_error)?;

        let mut principals = match match_mount_point(&registry, &relative) {
            Some(folder) => self
                .governed(folder, path, &groups)
                .await
                .map_err(lookup_error)?,
            None => self.flat(&relative, &groups).await.map_err(lookup_error)?,
        };
        principals.insert(owner.to_string());

        tracing::debug!("Access for {}: {:?}", path, principals);
        Ok(principals)
    }

    /// Drop the cached membership and registry snapshots
    pub async fn invalidate(&self) {
        self.groups.invalidate().await;
        self.registry.invalidate().await;
    }

    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.groups.stats(), self.registry.stats())
    }

    async fn membership(&self) -> Result<Arc<GroupMembership>> {
        self.groups
            .get_or_try_load(|| load_group_membership(self.remote.as_ref()))
            .await
    }

    async fn registry(&self) -> Result<Arc<Vec<GovernedFolder>>> {
        self.registry
            .get_or_try_load(|| async {
                match self.remote.governed_folders().await {
                    Ok(folders) => Ok(folders),
                    // group folders app not installed
                    Err(IngestError::ClientProtocol { status: 404, .. }) => {
                        tracing::debug!("No group folder registry on the host");
                        Ok(Vec::new())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn governed(
        &self,
        folder: &GovernedFolder,
        path: &str,
        groups: &GroupMembership,
    ) -> Result<BTreeSet<Principal>> {
        let folder_level = expand_groups(folder.groups.iter(), groups);
        if !folder.acl_enabled {
            return Ok(folder_level);
        }

        let entries = self.remote.acl_entries(path).await?;
        match acl_principals(&entries, groups) {
            Some(principals) => {
                tracing::debug!("ACL entries on {} replace folder-level access", path);
                Ok(principals)
            }
            None => Ok(folder_level),
        }
    }

    async fn flat(&self, relative: &str, groups: &GroupMembership) -> Result<BTreeSet<Principal>> {
        let candidates = path_and_ancestors(relative);
        let shares = try_join_all(candidates.iter().map(|c| self.remote.shares(c))).await?;

        let mut principals = BTreeSet::new();
        for share in shares.into_iter().flatten() {
            match share.mapping_type {
                MappingType::User => {
                    principals.insert(share.share_with);
                }
                MappingType::Group => match groups.get(&share.share_with) {
                    Some(members) => principals.extend(members.iter().cloned()),
                    None => tracing::warn!("Share with unknown group {}", share.share_with),
                },
            }
        }
        Ok(principals)
    }
}

/// Registry entry whose mount point equals the leading segments of
/// `relative` (case-insensitive). The longest mount point wins.
pub fn match_mount_point<'a>(
    registry: &'a [GovernedFolder],
    relative: &str,
) -> Option<&'a GovernedFolder> {
    let segs: Vec<String> = segments(relative).map(str::to_lowercase).collect();
    registry
        .iter()
        .filter(|folder| {
            let mount: Vec<String> = segments(&folder.mount_point).map(str::to_lowercase).collect();
            !mount.is_empty() && segs.starts_with(&mount)
        })
        .max_by_key(|folder| segments(&folder.mount_point).count())
}

/// Read-granting principals of the ACL entries, or `None` when there are no
/// entries. A direct entry overrides an inherited one for the same principal.
pub fn acl_principals(
    entries: &[PermissionGrant],
    groups: &GroupMembership,
) -> Option<BTreeSet<Principal>> {
    if entries.is_empty() {
        return None;
    }

    let mut effective: BTreeMap<(MappingType, &str), &PermissionGrant> = BTreeMap::new();
    for entry in entries {
        let key = (entry.mapping_type, entry.principal.as_str());
        match effective.get(&key) {
            Some(existing)
                if existing.scope == GrantScope::Direct && entry.scope == GrantScope::Inherited => {}
            _ => {
                effective.insert(key, entry);
            }
        }
    }

    let mut principals = BTreeSet::new();
    for grant in effective.values().filter(|g| grants_read(g.permission_bits)) {
        match grant.mapping_type {
            MappingType::User => {
                principals.insert(grant.principal.clone());
            }
            MappingType::Group => {
                if let Some(members) = groups.get(&grant.principal) {
                    principals.extend(members.iter().cloned());
                }
            }
        }
    }
    Some(principals)
}

fn expand_groups<'a>(
    names: impl Iterator<Item = &'a String>,
    groups: &GroupMembership,
) -> BTreeSet<Principal> {
    names
        .filter_map(|g| groups.get(g))
        .flat_map(|members| members.iter().cloned())
        .collect()
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// `/alice/dossiers/D1/a.txt` -> `/dossiers/D1/a.txt`
fn below_user_root(path: &str) -> String {
    let rest: Vec<&str> = segments(path).skip(1).collect();
    format!("/{}", rest.join("/"))
}

/// `/a/b/c` -> `[/a/b/c, /a/b, /a]`
fn path_and_ancestors(relative: &str) -> Vec<String> {
    let segs: Vec<&str> = segments(relative).collect();
    (1..=segs.len())
        .rev()
        .map(|n| format!("/{}", segs[..n].join("/")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn folder(mount: &str, groups: &[&str], acl: bool) -> GovernedFolder {
        GovernedFolder {
            id: "1".into(),
            mount_point: mount.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            acl_enabled: acl,
        }
    }

    fn grant(who: &str, kind: MappingType, bits: u32, scope: GrantScope) -> PermissionGrant {
        PermissionGrant {
            principal: who.into(),
            mapping_type: kind,
            permission_bits: bits,
            scope,
        }
    }

    fn membership() -> GroupMembership {
        let mut m = GroupMembership::new();
        m.insert("staff".into(), ["ann".to_string(), "ben".to_string()].into());
        m.insert("audit".into(), ["cid".to_string()].into());
        m
    }

    #[test]
    fn test_mount_point_match_is_segment_exact() {
        let registry = vec![folder("Dossiers", &[], false), folder("Dossiers/Archive", &[], false)];
        assert_eq!(
            match_mount_point(&registry, "/dossiers/D1/a.txt").map(|f| f.mount_point.as_str()),
            Some("Dossiers")
        );
        assert_eq!(
            match_mount_point(&registry, "/Dossiers/Archive/x.pdf").map(|f| f.mount_point.as_str()),
            Some("Dossiers/Archive")
        );
        assert!(match_mount_point(&registry, "/DossiersOld/a.txt").is_none());
        assert!(match_mount_point(&registry, "/home/Dossiers/a.txt").is_none());
    }

    #[test]
    fn test_acl_direct_entry_wins() {
        let entries = vec![
            grant("staff", MappingType::Group, 31, GrantScope::Inherited),
            grant("staff", MappingType::Group, 0, GrantScope::Direct),
            grant("cid", MappingType::User, 1, GrantScope::Direct),
        ];
        let principals = acl_principals(&entries, &membership()).unwrap();
        assert_eq!(principals, BTreeSet::from(["cid".to_string()]));
    }

    #[test]
    fn test_acl_inherited_only() {
        let entries = vec![grant("staff", MappingType::Group, 21, GrantScope::Inherited)];
        let principals = acl_principals(&entries, &membership()).unwrap();
        assert_eq!(principals, BTreeSet::from(["ann".to_string(), "ben".to_string()]));
        assert!(acl_principals(&[], &membership()).is_none());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(below_user_root("/u/dossiers/D1/a.txt"), "/dossiers/D1/a.txt");
        assert_eq!(
            path_and_ancestors("/dossiers/D1/a.txt"),
            vec!["/dossiers/D1/a.txt", "/dossiers/D1", "/dossiers"]
        );
    }

    #[test]
    fn test_expand_groups_skips_unknown() {
        let names = vec!["staff".to_string(), "ghosts".to_string()];
        assert_eq!(expand_groups(names.iter(), &membership()).len(), 2);
    }
}

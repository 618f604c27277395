//! Lazily loaded, TTL-bounded snapshots owned by the resolver

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::Result;
use crate::remote::RemoteFiles;
use crate::types::Principal;

/// Hit/miss counters of a [`TtlCell`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub loads: u64,
}

/// A single cached value that expires after `ttl`.
///
/// Loading happens under the lock so concurrent callers share one fetch.
pub struct TtlCell<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, Arc<T>)>>,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl<T> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Cached value, or the result of `load` when empty or expired.
    /// A failed load leaves the cell empty.
    pub async fn get_or_try_load<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((loaded_at, value)) = slot.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(value));
            }
        }

        let value = Arc::new(load().await?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        *slot = Some((Instant::now(), Arc::clone(&value)));
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

/// Group id to member user ids
pub type GroupMembership = BTreeMap<String, BTreeSet<Principal>>;

/// Fetch every group and its members. A group whose member list cannot be
/// read is kept empty so one broken group does not blind the whole map.
pub async fn load_group_membership(remote: &dyn RemoteFiles) -> Result<GroupMembership> {
    let groups = remote.list_groups().await?;
    let mut membership = GroupMembership::new();
    for group in groups {
        let members = match remote.group_members(&group).await {
            Ok(members) => members.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Failed to read members of group {}: {}", group, e);
                BTreeSet::new()
            }
        };
        membership.insert(group, members);
    }
    tracing::debug!("Loaded membership of {} groups", membership.len());
    Ok(membership)
}

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{ActivityFeed, ActivityQuery, SortOrder};
use crate::config::{RetryPolicy, SyncSettings};
use crate::error::Result;
use crate::remote::with_retry;
use crate::types::{ActivityEvent, ActivityKind, EventId};

/// Retrying, paging reader of the activity log
#[derive(Clone)]
pub struct ActivityClient {
    feed: Arc<dyn ActivityFeed>,
    retry: RetryPolicy,
    limit: usize,
    max_pages: usize,
}

impl ActivityClient {
    pub fn new(feed: Arc<dyn ActivityFeed>, settings: &SyncSettings) -> Self {
        Self {
            feed,
            retry: settings.retry,
            limit: settings.activity_limit.max(1),
            max_pages: settings.max_pages.max(1),
        }
    }

    /// One page of events after `since`, ascending by id.
    ///
    /// The server's interpretation of `since` is not trusted; callers
    /// filter on ids themselves.
    pub async fn fetch_since(&self, since: EventId, limit: usize) -> Result<Vec<ActivityEvent>> {
        let query = ActivityQuery {
            since,
            limit,
            sort: SortOrder::Asc,
        };
        let mut events = with_retry(&self.retry, "activity fetch", || self.feed.fetch_page(&query))
            .await?
            .into_events();
        events.sort_by_key(|e| e.id);
        tracing::debug!("Retrieved {} activities since {}", events.len(), since);
        Ok(events)
    }

    /// Keep fetching while pages come back full, up to the page budget
    pub async fn fetch_all_since(&self, since: EventId) -> Result<Vec<ActivityEvent>> {
        let mut all: Vec<ActivityEvent> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut next = since;

        for page in 0..self.max_pages {
            let events = self.fetch_since(next, self.limit).await?;
            let full = events.len() >= self.limit;
            let page_max = events.iter().map(|e| e.id).max();

            all.extend(events.into_iter().filter(|e| seen.insert(e.id)));

            match page_max {
                Some(max) if full && max > next => next = max,
                _ => break,
            }
            if page + 1 == self.max_pages {
                tracing::warn!(
                    "Activity paging stopped after {} pages at id {}; the rest is picked up next run",
                    self.max_pages,
                    next
                );
            }
        }

        all.sort_by_key(|e| e.id);
        Ok(all)
    }

    /// Highest event id known to the host; 0 when it cannot be determined
    pub async fn get_latest_id(&self) -> EventId {
        let query = ActivityQuery {
            since: 0,
            limit: 1,
            sort: SortOrder::Desc,
        };
        match with_retry(&self.retry, "latest activity id", || self.feed.fetch_page(&query)).await {
            Ok(response) => {
                let latest = response
                    .into_events()
                    .iter()
                    .map(|e| e.id)
                    .max()
                    .unwrap_or(0);
                tracing::info!("Latest activity id: {}", latest);
                latest
            }
            Err(e) => {
                tracing::error!("Failed to get latest activity id: {}", e);
                0
            }
        }
    }

    /// Find a file id by scanning the log for an object at `path`.
    ///
    /// `path` may be user-rooted or relative to the feed account; both
    /// forms are compared with surrounding slashes ignored.
    pub async fn find_object_id(&self, path: &str, owner: &str) -> Option<String> {
        let full = path.trim_matches('/');
        let relative = full
            .strip_prefix(owner)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full);
        let matches = |candidate: &str| {
            let candidate = candidate.trim_matches('/');
            candidate == full || candidate == relative
        };

        let events = match self.fetch_since(0, self.limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Activity lookup for {} failed: {}", path, e);
                return None;
            }
        };

        for event in &events {
            for obj in event.rich_objects.values() {
                if let (Some(p), Some(id)) = (obj.path.as_deref(), obj.id.as_deref()) {
                    if matches(p) && !id.is_empty() {
                        tracing::debug!("Found id {} for {} in activity {}", id, path, event.id);
                        return Some(id.to_string());
                    }
                }
            }
            if let Some((id, _)) = event.related_objects.iter().find(|(_, p)| matches(p)) {
                return Some(id.clone());
            }
        }

        tracing::debug!("No activity references {}", path);
        None
    }

    /// User of the newest create/change activity on a file id
    pub async fn last_modifier(&self, object_id: &str) -> Option<String> {
        let response = with_retry(&self.retry, "object activities", || {
            self.feed.object_activities(object_id)
        })
        .await;

        match response {
            Ok(response) => response
                .into_events()
                .into_iter()
                .filter(|e| matches!(e.kind, ActivityKind::Created | ActivityKind::Changed))
                .max_by_key(|e| e.id)
                .and_then(|e| e.user),
            Err(e) => {
                tracing::debug!("No modifier for object {}: {}", object_id, e);
                None
            }
        }
    }
}

//! Activity log access
//!
//! The remote host exposes an append-only, id-ordered feed of change
//! events. [`ActivityFeed`] is one page request against it; the
//! [`ActivityClient`] layers retry, paging and the id lookups on top, and
//! [`ActivityClassifier`] turns events into path change sets.

mod classifier;
mod client;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::remote::ocs::{self, OcsEnvelope};
use crate::types::{ActivityEvent, ActivityKind, EventId, RichObject};

pub use classifier::{is_likely_file, normalize_path, ActivityClassifier};
pub use client::ActivityClient;

/// Sort order of a feed page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Parameters of one page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub since: EventId,
    pub limit: usize,
    pub sort: SortOrder,
}

/// Outcome of a page request
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse {
    Data(Vec<ActivityEvent>),
    /// 204: no activities at all
    NoContent,
    /// 304: nothing newer than `since`
    NotModified,
}

impl FeedResponse {
    pub fn into_events(self) -> Vec<ActivityEvent> {
        match self {
            FeedResponse::Data(events) => events,
            FeedResponse::NoContent | FeedResponse::NotModified => Vec::new(),
        }
    }
}

/// One request against the activity log, without retry
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn fetch_page(&self, query: &ActivityQuery) -> Result<FeedResponse>;

    /// Activities recorded for one file id
    async fn object_activities(&self, object_id: &str) -> Result<FeedResponse>;
}

/// Wire shape of an activity
#[derive(Debug, Deserialize)]
pub struct RawActivity {
    pub activity_id: EventId,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub object_id: Value,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default, deserialize_with = "ocs::map_or_empty")]
    pub objects: BTreeMap<String, Value>,
    #[serde(default)]
    pub subject_rich: Vec<Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
}

impl RawActivity {
    pub fn into_event(self) -> ActivityEvent {
        let object_id = match &self.object_id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };

        let related_objects = self
            .objects
            .into_iter()
            .filter_map(|(id, path)| match path {
                Value::String(p) if !p.is_empty() => Some((id, p)),
                _ => None,
            })
            .collect();

        // subject_rich is `[subject_template, {param: object}]`
        let rich_objects = self
            .subject_rich
            .get(1)
            .and_then(Value::as_object)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(name, value)| {
                        serde_json::from_value::<RichObject>(value.clone())
                            .ok()
                            .map(|obj| (name.clone(), obj))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let timestamp = self
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        ActivityEvent {
            id: self.activity_id,
            kind: ActivityKind::from_wire(&self.kind),
            app: self.app,
            object_type: self.object_type,
            object_id,
            primary_path: self.object_name.unwrap_or_default(),
            related_objects,
            rich_objects,
            user: self.user.filter(|u| !u.is_empty()),
            timestamp,
        }
    }
}

/// Decode a `{ocs: {data: [...]}}` activity page. Entries that do not
/// decode are skipped with a warning.
pub fn parse_activity_page(body: &str) -> Result<Vec<ActivityEvent>> {
    let envelope: OcsEnvelope<Option<Vec<Value>>> = serde_json::from_str(body)?;
    let mut events = Vec::new();
    for value in envelope.into_data().unwrap_or_default() {
        match serde_json::from_value::<RawActivity>(value) {
            Ok(raw) => events.push(raw.into_event()),
            Err(e) => tracing::warn!("Skipping undecodable activity: {}", e),
        }
    }
    Ok(events)
}

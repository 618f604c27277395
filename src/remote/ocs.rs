//! OCS response envelopes
//!
//! Nextcloud wraps every OCS payload in `{"ocs": {"meta": .., "data": ..}}`
//! and, being PHP, encodes an empty associative array as `[]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// `{"ocs": {"data": T}}`
#[derive(Debug, Deserialize)]
pub struct OcsEnvelope<T> {
    pub ocs: OcsBody<T>,
}

#[derive(Debug, Deserialize)]
pub struct OcsBody<T> {
    pub data: T,
}

impl<T> OcsEnvelope<T> {
    pub fn into_data(self) -> T {
        self.ocs.data
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
#[serde(bound(deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"))]
enum MapOrSeq<K, V> {
    Map(BTreeMap<K, V>),
    Seq(Vec<serde_json::Value>),
}

/// Deserialize a JSON object, accepting `[]` and `null` as the empty map
pub fn map_or_empty<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    let value: Option<MapOrSeq<K, V>> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(MapOrSeq::Map(map)) => map,
        Some(MapOrSeq::Seq(_)) | None => BTreeMap::new(),
    })
}

/// Users listing payload
#[derive(Debug, Deserialize)]
pub struct UsersData {
    #[serde(default)]
    pub users: Vec<String>,
}

/// Groups listing payload
#[derive(Debug, Deserialize)]
pub struct GroupsData {
    #[serde(default)]
    pub groups: Vec<String>,
}

/// One entry of the files_sharing API
#[derive(Debug, Deserialize)]
pub struct RawShare {
    #[serde(default)]
    pub share_with: Option<String>,
    #[serde(default)]
    pub share_type: Option<i64>,
}

/// One entry of the group folder registry
#[derive(Debug, Deserialize)]
pub struct RawGroupFolder {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub mount_point: String,
    #[serde(default, deserialize_with = "map_or_empty")]
    pub groups: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub acl: bool,
}

/// Render an id that may arrive as a JSON number or string
pub fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

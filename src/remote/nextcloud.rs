//! Nextcloud implementation of [`RemoteFiles`] and [`ActivityFeed`]

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::http::{check_status, with_retry};
use super::ocs::{self, GroupsData, OcsEnvelope, RawGroupFolder, RawShare, UsersData};
use super::webdav::{self, DavResponse};
use super::RemoteFiles;
use crate::activity::{parse_activity_page, ActivityFeed, ActivityQuery, FeedResponse};
use crate::config::{NextcloudConfig, RetryPolicy, SyncSettings};
use crate::error::{IngestError, Result};
use crate::types::{DirEntry, FileMetadata, GovernedFolder, MappingType, PermissionGrant, ShareEntry};

const FILES_ROOT: &str = "/remote.php/dav/files";
const GROUPFOLDERS_ROOT: &str = "/remote.php/dav/groupfolders";
const ACTIVITY_API: &str = "ocs/v2.php/apps/activity/api/v2/activity";

/// Share types of the files_sharing API that name a principal
const SHARE_TYPE_USER: i64 = 0;
const SHARE_TYPE_GROUP: i64 = 1;

#[derive(Deserialize)]
struct Registry(#[serde(deserialize_with = "ocs::map_or_empty")] BTreeMap<String, RawGroupFolder>);

/// Client for the Nextcloud WebDAV and OCS endpoints
#[derive(Clone)]
pub struct NextcloudClient {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    retry: RetryPolicy,
}

impl NextcloudClient {
    pub fn new(config: &NextcloudConfig, settings: &SyncSettings) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| IngestError::Config(format!("Invalid NEXTCLOUD_URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(url = %base_url, user = %config.username, "Nextcloud client initialized");

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            retry: settings.retry,
        })
    }

    /// Build `{base}/{prefix...}/{path segments}` with every segment encoded
    fn url_for(&self, prefix: &str, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| IngestError::Config("NEXTCLOUD_URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(prefix.split('/').filter(|s| !s.is_empty()));
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn ocs_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header("OCS-APIRequest", "true")
            .header("Accept", "application/json")
    }

    async fn ocs_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url_for(endpoint, "")?;
        with_retry(&self.retry, endpoint, || async {
            let response = self
                .ocs_request(Method::GET, url.clone())
                .query(query)
                .send()
                .await?;
            let response = check_status(response).await?;
            let envelope: OcsEnvelope<T> = response.json().await.map_err(|e| {
                IngestError::ServerProtocol {
                    status: 200,
                    message: format!("Undecodable OCS payload from {}: {}", endpoint, e),
                }
            })?;
            Ok(envelope.into_data())
        })
        .await
    }

    /// PROPFIND returning `None` on 404
    async fn propfind(&self, url: &Url, depth: &str, body: &'static str) -> Result<Option<Vec<DavResponse>>> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| IngestError::Internal(e.to_string()))?;
        with_retry(&self.retry, "PROPFIND", || async {
            let response = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&self.username, Some(&self.password))
                .header("Depth", depth)
                .header("Content-Type", "application/xml")
                .body(body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let text = check_status(response).await?.text().await?;
            Ok(Some(webdav::parse_multistatus(&text)?))
        })
        .await
    }

    async fn activity_request(&self, url: Url, query: Vec<(&'static str, String)>) -> Result<FeedResponse> {
        let response = self
            .ocs_request(Method::GET, url)
            .query(&query)
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(FeedResponse::NoContent),
            StatusCode::NOT_MODIFIED => Ok(FeedResponse::NotModified),
            _ => {
                let body = check_status(response).await?.text().await?;
                Ok(FeedResponse::Data(parse_activity_page(&body)?))
            }
        }
    }
}

#[async_trait]
impl RemoteFiles for NextcloudClient {
    async fn list_users(&self) -> Result<Vec<String>> {
        let data: UsersData = self.ocs_get("ocs/v1.php/cloud/users", &[]).await?;
        tracing::info!("Found {} users", data.users.len());
        Ok(data.users)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let url = self.url_for(FILES_ROOT, path)?;
        let responses = self
            .propfind(&url, "1", webdav::FILE_PROPS)
            .await?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;

        let own = format!("/{}", path.trim_matches('/'));
        let mut entries = Vec::new();
        for resp in responses {
            let Some(child) = webdav::href_to_path(&resp.href, FILES_ROOT) else {
                tracing::debug!("Skipping href outside the files root: {}", resp.href);
                continue;
            };
            if child == own {
                continue;
            }
            let name = child.rsplit('/').next().unwrap_or_default().to_string();
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            entries.push(DirEntry {
                name,
                path: child,
                is_dir: resp.is_collection,
                metadata: resp.metadata(),
            });
        }
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMetadata>> {
        let url = self.url_for(FILES_ROOT, path)?;
        Ok(self
            .propfind(&url, "0", webdav::FILE_PROPS)
            .await?
            .and_then(|responses| responses.into_iter().next())
            .map(|resp| resp.metadata()))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(FILES_ROOT, path)?;
        with_retry(&self.retry, "GET file", || async {
            let response = self
                .client
                .get(url.clone())
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(IngestError::NotFound(path.to_string()));
            }
            let bytes = check_status(response).await?.bytes().await?;
            Ok(bytes.to_vec())
        })
        .await
    }

    async fn file_id(&self, path: &str) -> Result<Option<String>> {
        let url = self.url_for(FILES_ROOT, path)?;
        Ok(self
            .propfind(&url, "0", webdav::ID_PROPS)
            .await?
            .and_then(|responses| responses.into_iter().next())
            .and_then(|resp| resp.stable_id()))
    }

    async fn shares(&self, relative_path: &str) -> Result<Vec<ShareEntry>> {
        let raw: Vec<RawShare> = self
            .ocs_get(
                "ocs/v2.php/apps/files_sharing/api/v1/shares",
                &[
                    ("path", relative_path.to_string()),
                    ("reshares", "true".to_string()),
                    ("subfiles", "false".to_string()),
                ],
            )
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|share| {
                let mapping_type = match share.share_type {
                    Some(SHARE_TYPE_USER) => MappingType::User,
                    Some(SHARE_TYPE_GROUP) => MappingType::Group,
                    other => {
                        tracing::debug!("Ignoring share of type {:?} on {}", other, relative_path);
                        return None;
                    }
                };
                share
                    .share_with
                    .filter(|w| !w.is_empty())
                    .map(|share_with| ShareEntry {
                        share_with,
                        mapping_type,
                    })
            })
            .collect())
    }

    async fn list_groups(&self) -> Result<Vec<String>> {
        let data: GroupsData = self.ocs_get("ocs/v1.php/cloud/groups", &[]).await?;
        Ok(data.groups)
    }

    async fn group_members(&self, group: &str) -> Result<Vec<String>> {
        let endpoint = format!("ocs/v1.php/cloud/groups/{}", group);
        let data: UsersData = self.ocs_get(&endpoint, &[]).await?;
        Ok(data.users)
    }

    async fn governed_folders(&self) -> Result<Vec<GovernedFolder>> {
        let Registry(folders) = self.ocs_get("index.php/apps/groupfolders/folders", &[]).await?;
        Ok(folders
            .into_iter()
            .map(|(key, folder)| GovernedFolder {
                id: ocs::id_string(&folder.id).unwrap_or(key),
                mount_point: folder.mount_point.trim_matches('/').to_string(),
                groups: folder.groups.into_keys().collect(),
                acl_enabled: folder.acl,
            })
            .filter(|folder| !folder.mount_point.is_empty())
            .collect())
    }

    async fn acl_entries(&self, path: &str) -> Result<Vec<PermissionGrant>> {
        let url = self.url_for(GROUPFOLDERS_ROOT, path)?;
        Ok(self
            .propfind(&url, "0", webdav::ACL_PROPS)
            .await?
            .map(|responses| responses.into_iter().flat_map(|resp| resp.acl).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ActivityFeed for NextcloudClient {
    async fn fetch_page(&self, query: &ActivityQuery) -> Result<FeedResponse> {
        let url = self.url_for(ACTIVITY_API, "")?;
        self.activity_request(
            url,
            vec![
                ("since", query.since.to_string()),
                ("limit", query.limit.to_string()),
                ("sort", query.sort.as_str().to_string()),
                ("format", "json".to_string()),
            ],
        )
        .await
    }

    async fn object_activities(&self, object_id: &str) -> Result<FeedResponse> {
        let url = self.url_for(ACTIVITY_API, "filter")?;
        self.activity_request(
            url,
            vec![
                ("format", "json".to_string()),
                ("object_type", "files".to_string()),
                ("object_id", object_id.to_string()),
            ],
        )
        .await
    }
}

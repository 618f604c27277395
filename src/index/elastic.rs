//! Elasticsearch sink over the REST API

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::IndexSink;
use crate::config::{ElasticConfig, RetryPolicy, SyncSettings};
use crate::error::{IngestError, Result};
use crate::remote::{check_status, with_retry};
use crate::types::{Container, FileRecord, IndexedFile, StatsDelta};

/// Paragraph as stored in the documents index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsParagraph {
    pub id: usize,
    pub text: String,
}

/// File record in the documents index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsDocument {
    pub title: String,
    pub raw_title: String,
    pub nextcloud_id: Option<String>,
    pub url: String,
    pub author: String,
    pub author_id: String,
    pub created_date: Option<String>,
    pub accessible_to_users: Vec<String>,
    pub dossier_id: String,
    pub dossier_name: String,
    pub filepath: String,
    pub lastmodifiedtime: Option<String>,
    pub filetype: Option<String>,
    pub full_text: String,
    pub keywords: Vec<String>,
    pub lastmodified_user_id: String,
    pub needs_download: String,
    pub needs_annotation: String,
    pub paragraphs: Vec<EsParagraph>,
    pub size: i64,
}

impl From<&FileRecord> for EsDocument {
    fn from(r: &FileRecord) -> Self {
        Self {
            title: r.title.clone(),
            raw_title: r.title.clone(),
            nextcloud_id: r.remote_id.clone(),
            url: r.path.clone(),
            author: r.owner.clone(),
            author_id: r.owner.clone(),
            created_date: r.created_at.map(es_date),
            accessible_to_users: r.accessible_principals.iter().cloned().collect(),
            dossier_id: r.container_id.clone(),
            dossier_name: r.container_name.clone(),
            filepath: r.path.clone(),
            lastmodifiedtime: r.modified_at.map(es_date),
            filetype: r.content_type.clone(),
            full_text: r.extracted_text.clone(),
            keywords: Vec::new(),
            lastmodified_user_id: r.last_modified_by.clone().unwrap_or_else(|| r.owner.clone()),
            needs_download: "no".to_string(),
            needs_annotation: "no".to_string(),
            paragraphs: r
                .paragraphs
                .iter()
                .map(|p| EsParagraph {
                    id: p.index,
                    text: p.text.clone(),
                })
                .collect(),
            size: r.size,
        }
    }
}

/// Container in the dossiers index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsDossier {
    pub dossier_id: String,
    pub dossier_name: String,
    #[serde(rename = "webURL")]
    pub web_url: String,
    pub file_id: Option<String>,
    pub owner_userid: String,
    pub members: Vec<String>,
    pub created_datetime: Option<String>,
    pub lastmodified_datetime: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub unopened: bool,
    pub description: String,
    pub file_count: i64,
    pub total_size: i64,
}

impl From<&Container> for EsDossier {
    fn from(c: &Container) -> Self {
        // the web UI addresses dossiers relative to the owner's root
        let owner_prefix = format!("/{}", c.owner);
        let web_url = c
            .path
            .strip_prefix(&owner_prefix)
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(&c.path)
            .to_string();
        Self {
            dossier_id: c.id.clone(),
            dossier_name: c.name.clone(),
            web_url,
            file_id: c.remote_id.clone(),
            owner_userid: c.owner.clone(),
            members: c.members.iter().cloned().collect(),
            created_datetime: c.created_at.map(es_date),
            lastmodified_datetime: es_date(Utc::now()),
            doc_type: "dossier".to_string(),
            unopened: true,
            description: String::new(),
            file_count: c.file_count,
            total_size: c.total_size,
        }
    }
}

/// Document PUT target. Path lookups and delete-by-query go through search,
/// so the write must be visible there before the call returns.
fn document_endpoint(index: &str, document_id: &str) -> String {
    format!("{}/_doc/{}?refresh=wait_for", index, document_id)
}

fn es_date(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn text_with_keyword() -> Value {
    json!({"type": "text", "fields": {"keyword": {"type": "keyword", "ignore_above": 256}}})
}

fn documents_mapping() -> Value {
    json!({
        "settings": {"index": {"number_of_shards": 1, "number_of_replicas": 0}},
        "mappings": {"properties": {
            "paragraphs": {"properties": {"text": {"type": "text"}, "id": {"type": "long"}}},
            "title": text_with_keyword(),
            "raw_title": text_with_keyword(),
            "nextcloud_id": {"type": "keyword"},
            "url": text_with_keyword(),
            "author": text_with_keyword(),
            "author_id": text_with_keyword(),
            "created_date": {"type": "date"},
            "accessible_to_users": text_with_keyword(),
            "dossier_id": {"type": "keyword"},
            "dossier_name": text_with_keyword(),
            // paths are matched exactly on delete and lookup, so no length cap
            "filepath": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
            "lastmodifiedtime": {"type": "date"},
            "filetype": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
            "full_text": {"type": "text"},
            "keywords": text_with_keyword(),
            "lastmodified_user_id": text_with_keyword(),
            "needs_download": {"type": "keyword"},
            "needs_annotation": {"type": "keyword"},
            "size": {"type": "long", "fields": {"keyword": {"type": "keyword"}}}
        }}
    })
}

fn dossiers_mapping() -> Value {
    json!({
        "settings": {"index": {"number_of_shards": 1, "number_of_replicas": 0}},
        "mappings": {"properties": {
            "webURL": text_with_keyword(),
            "file_id": {"type": "keyword"},
            "members": text_with_keyword(),
            "unopened": {"type": "boolean"},
            "description": text_with_keyword(),
            "dossier_id": text_with_keyword(),
            "dossier_name": text_with_keyword(),
            "owner_userid": {"type": "keyword"},
            "created_datetime": {"type": "date"},
            "lastmodified_datetime": {"type": "date"},
            "type": text_with_keyword(),
            "file_count": {"type": "long"},
            "total_size": {"type": "long"}
        }}
    })
}

const STATS_SCRIPT: &str = "ctx._source.file_count = Math.max(0, (ctx._source.file_count ?: 0) + params.file_count_delta); \
     ctx._source.total_size = Math.max(0, (ctx._source.total_size ?: 0) + params.size_delta);";

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<HitSource>,
}

#[derive(Deserialize)]
struct HitSource {
    #[serde(default)]
    dossier_id: String,
    #[serde(default)]
    size: i64,
}

impl From<HitSource> for IndexedFile {
    fn from(s: HitSource) -> Self {
        IndexedFile {
            container_id: s.dossier_id,
            size: s.size,
        }
    }
}

/// Elasticsearch REST client for the documents and dossiers indices
#[derive(Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    base_url: String,
    documents: String,
    dossiers: String,
    username: Option<String>,
    password: Option<String>,
    retry: RetryPolicy,
}

impl ElasticIndex {
    pub fn new(config: &ElasticConfig, settings: &SyncSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            url = %config.url,
            documents = %config.documents_index,
            dossiers = %config.dossiers_index,
            "Elasticsearch sink initialized"
        );

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            documents: config.documents_index.clone(),
            dossiers: config.dossiers_index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            retry: settings.retry,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Accept", "application/json");
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => builder.basic_auth(user, Some(password)),
            _ => builder,
        }
    }

    /// Send with retry; returns the status and the body of any 2xx or 404
    async fn send(&self, label: &str, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, String)> {
        with_retry(&self.retry, label, || async {
            let mut builder = self.request(method.clone(), path);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let response = builder.send().await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok((status, String::new()));
            }
            let text = check_status(response).await?.text().await?;
            Ok((status, text))
        })
        .await
    }

    async fn create_index(&self, index: &str, mapping: Value) -> Result<()> {
        let (status, _) = self.send("index exists", Method::HEAD, index, None).await?;
        if status != StatusCode::NOT_FOUND {
            tracing::info!("Index {} already exists", index);
            return Ok(());
        }

        tracing::info!("Creating index {}", index);
        match self.send("create index", Method::PUT, index, Some(&mapping)).await {
            Ok(_) => Ok(()),
            Err(IngestError::ClientProtocol { message, .. })
                if message.contains("resource_already_exists_exception") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl IndexSink for ElasticIndex {
    async fn ensure_indices(&self) -> Result<()> {
        self.create_index(&self.documents, documents_mapping()).await?;
        self.create_index(&self.dossiers, dossiers_mapping()).await
    }

    async fn upsert_container(&self, container: &Container) -> Result<()> {
        let body = serde_json::to_value(EsDossier::from(container))?;
        let path = format!("{}/_doc/{}?refresh=true", self.dossiers, container.id);
        let (status, _) = self.send("index dossier", Method::PUT, &path, Some(&body)).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(IngestError::NotFound(format!("index {}", self.dossiers)));
        }
        tracing::info!("Indexed dossier {} ({})", container.name, container.id);
        Ok(())
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        let path = format!("{}/_doc/{}", self.dossiers, container_id);
        let (status, _) = self.send("dossier exists", Method::HEAD, &path, None).await?;
        Ok(status != StatusCode::NOT_FOUND)
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let body = serde_json::to_value(EsDocument::from(record))?;
        let path = document_endpoint(&self.documents, &record.document_id());
        let (status, _) = self.send("index document", Method::PUT, &path, Some(&body)).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(IngestError::NotFound(format!("index {}", self.documents)));
        }
        tracing::debug!("Indexed {}", record.path);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<u64> {
        let query = json!({"query": {"term": {"filepath.keyword": path}}});
        let endpoint = format!("{}/_delete_by_query?refresh=true", self.documents);
        let (status, body) = self
            .send("delete by path", Method::POST, &endpoint, Some(&query))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let deleted = serde_json::from_str::<Value>(&body)?
            .get("deleted")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if deleted > 0 {
            tracing::info!("Deleted {} documents for path: {}", deleted, path);
        } else {
            tracing::debug!("No documents found to delete for path: {}", path);
        }
        Ok(deleted)
    }

    async fn lookup_file(&self, path: &str) -> Result<Option<IndexedFile>> {
        let query = json!({
            "query": {"term": {"filepath.keyword": path}},
            "_source": ["dossier_id", "size"],
            "size": 1
        });
        let endpoint = format!("{}/_search", self.documents);
        let (status, body) = self.send("lookup by path", Method::POST, &endpoint, Some(&query)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response: SearchResponse = serde_json::from_str(&body)?;
        Ok(response.hits.hits.into_iter().next().map(|hit| hit.source.into()))
    }

    async fn lookup_document(&self, document_id: &str) -> Result<Option<IndexedFile>> {
        let endpoint = format!("{}/_doc/{}?_source=dossier_id,size", self.documents, document_id);
        let (status, body) = self.send("lookup by id", Method::GET, &endpoint, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response: GetResponse = serde_json::from_str(&body)?;
        Ok(response
            .source
            .filter(|_| response.found)
            .map(IndexedFile::from))
    }

    async fn apply_container_delta(&self, container_id: &str, delta: StatsDelta) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let body = json!({
            "script": {
                "source": STATS_SCRIPT,
                "lang": "painless",
                "params": {"file_count_delta": delta.file_count, "size_delta": delta.total_size}
            }
        });
        let endpoint = format!(
            "{}/_update/{}?retry_on_conflict=5&refresh=true",
            self.dossiers, container_id
        );
        let (status, _) = self.send("dossier stats", Method::POST, &endpoint, Some(&body)).await?;
        if status == StatusCode::NOT_FOUND {
            tracing::warn!("Stats delta for unknown dossier {}", container_id);
        } else {
            tracing::debug!(
                "Updated dossier {} stats: count {:+}, size {:+}",
                container_id,
                delta.file_count,
                delta.total_size
            );
        }
        Ok(())
    }
}

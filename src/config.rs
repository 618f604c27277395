//! Runtime configuration
//!
//! Values come from the environment, using the variable names the
//! deployment already sets for the ingestor container.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Remote file host credentials and layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextcloudConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Folder under each user root that holds the case containers
    #[serde(default = "default_parent_path")]
    pub dossier_parent_path: String,
}

/// Search index endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub url: String,
    #[serde(default = "default_documents_index")]
    pub documents_index: String,
    #[serde(default = "default_dossiers_index")]
    pub dossiers_index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Knobs of the sync engine itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub assembly_concurrency: usize,
    #[serde(default = "default_cache_ttl")]
    pub group_cache_ttl_secs: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            activity_limit: default_activity_limit(),
            max_pages: default_max_pages(),
            retry: RetryPolicy::default(),
            http_timeout_secs: default_http_timeout(),
            assembly_concurrency: default_concurrency(),
            group_cache_ttl_secs: default_cache_ttl(),
            lock_timeout_secs: default_lock_timeout(),
            dry_run: false,
        }
    }
}

impl SyncSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn group_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.group_cache_ttl_secs)
    }
}

/// Complete ingestor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub nextcloud: NextcloudConfig,
    pub elastic: ElasticConfig,
    #[serde(default = "default_tika_url")]
    pub tika_url: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_parent_path() -> String {
    "dossiers".to_string()
}

fn default_documents_index() -> String {
    "documents".to_string()
}

fn default_dossiers_index() -> String {
    "dossiers".to_string()
}

fn default_tika_url() -> String {
    "http://localhost:9998".to_string()
}

fn default_db_path() -> String {
    "~/.local/share/dossier-ingest/state.db".to_string()
}

fn default_activity_limit() -> usize {
    1000
}

fn default_max_pages() -> usize {
    10
}

fn default_http_timeout() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_lock_timeout() -> u64 {
    6 * 60 * 60
}

impl IngestConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| {
                IngestError::Config(format!("Missing required environment variable: {}", name))
            })
        };

        let mut sync = SyncSettings::default();
        if let Some(v) = get("INGEST_ACTIVITY_LIMIT") {
            sync.activity_limit = parse_number("INGEST_ACTIVITY_LIMIT", &v)?;
        }
        if let Some(v) = get("INGEST_MAX_PAGES") {
            sync.max_pages = parse_number("INGEST_MAX_PAGES", &v)?;
        }
        if let Some(v) = get("INGEST_RETRY_ATTEMPTS") {
            sync.retry.max_attempts = parse_number("INGEST_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("INGEST_RETRY_BASE_MS") {
            sync.retry.base_delay_ms = parse_number("INGEST_RETRY_BASE_MS", &v)?;
        }
        if let Some(v) = get("INGEST_HTTP_TIMEOUT_SECS") {
            sync.http_timeout_secs = parse_number("INGEST_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("INGEST_CONCURRENCY") {
            sync.assembly_concurrency = parse_number("INGEST_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("INGEST_GROUP_CACHE_TTL_SECS") {
            sync.group_cache_ttl_secs = parse_number("INGEST_GROUP_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("INGEST_LOCK_TIMEOUT_SECS") {
            sync.lock_timeout_secs = parse_number("INGEST_LOCK_TIMEOUT_SECS", &v)?;
        }
        sync.dry_run = get("DRY_RUN")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let config = Self {
            nextcloud: NextcloudConfig {
                base_url: required("NEXTCLOUD_URL")?,
                username: required("NEXTCLOUD_ADMIN_USERNAME")?,
                password: required("NEXTCLOUD_ADMIN_PASSWORD")?,
                dossier_parent_path: get("NEXTCLOUD_DOSSIER_PARENT_PATH")
                    .unwrap_or_else(default_parent_path),
            },
            elastic: ElasticConfig {
                url: get("ELASTICSEARCH_URL")
                    .unwrap_or_else(|| "http://localhost:9200".to_string()),
                documents_index: get("ELASTICSEARCH_INDEX_DOCUMENTS")
                    .unwrap_or_else(default_documents_index),
                dossiers_index: get("ELASTICSEARCH_INDEX_DOSSIERS")
                    .unwrap_or_else(default_dossiers_index),
                username: get("ELASTICSEARCH_USER"),
                password: get("ELASTICSEARCH_PASSWORD"),
            },
            tika_url: get("TIKA_SERVER_URL").unwrap_or_else(default_tika_url),
            db_path: get("INGEST_DB_PATH").unwrap_or_else(default_db_path),
            sync,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let parent = self.nextcloud.dossier_parent_path.trim_matches('/');
        if parent.is_empty() || parent.contains('/') {
            return Err(IngestError::Config(format!(
                "NEXTCLOUD_DOSSIER_PARENT_PATH must be a single folder name, got '{}'",
                self.nextcloud.dossier_parent_path
            )));
        }
        let elastic_path = self
            .elastic
            .url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split_once('/'))
            .map(|(_, path)| path)
            .unwrap_or("");
        if !elastic_path.is_empty() {
            return Err(IngestError::Config(format!(
                "ELASTICSEARCH_URL must not include a path: {}",
                self.elastic.url
            )));
        }
        if self.sync.activity_limit == 0 || self.sync.assembly_concurrency == 0 {
            return Err(IngestError::Config(
                "activity limit and concurrency must be positive".to_string(),
            ));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(IngestError::Config(
                "INGEST_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn expanded_db_path(&self) -> String {
        shellexpand::tilde(&self.db_path).to_string()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{} must be a number, got '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("NEXTCLOUD_URL", "https://cloud.example.org"),
        ("NEXTCLOUD_ADMIN_USERNAME", "admin"),
        ("NEXTCLOUD_ADMIN_PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.nextcloud.dossier_parent_path, "dossiers");
        assert_eq!(config.elastic.documents_index, "documents");
        assert_eq!(config.sync.activity_limit, 1000);
        assert!(!config.sync.dry_run);
    }

    #[test]
    fn test_missing_required() {
        let err = IngestConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(err.to_string().contains("NEXTCLOUD_ADMIN_PASSWORD"));
    }

    #[test]
    fn test_overrides_and_validation() {
        let mut vars = BASE.to_vec();
        vars.push(("DRY_RUN", "TRUE"));
        vars.push(("INGEST_RETRY_ATTEMPTS", "2"));
        let config = IngestConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(config.sync.dry_run);
        assert_eq!(config.sync.retry.max_attempts, 2);

        vars.push(("ELASTICSEARCH_URL", "http://es:9200/prefix"));
        assert!(matches!(
            IngestConfig::from_lookup(lookup(&vars)),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_retry_delay_grows() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 100,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }
}

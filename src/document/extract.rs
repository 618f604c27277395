//! Raw text extraction

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use crate::config::SyncSettings;
use crate::error::{IngestError, Result};
use crate::remote::check_status;

/// Extensions worth sending to the extractor
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "ppt", "pptx", "xls", "xlsx", "txt", "md"];

/// Lowercased extension of the last path segment
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub fn is_supported(path: &str) -> bool {
    extension(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_plain_text(path: &str) -> bool {
    matches!(extension(path).as_deref(), Some("txt") | Some("md"))
}

/// Turns file bytes into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &str, bytes: &[u8]) -> Result<String>;
}

/// Apache Tika server client
#[derive(Clone)]
pub struct TikaExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl TikaExtractor {
    pub fn new(base_url: &str, settings: &SyncSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/tika", base_url.trim_end_matches('/')),
        })
    }

    async fn request(&self, bytes: &[u8]) -> Result<String> {
        let response = self
            .client
            .put(&self.endpoint)
            .header(ACCEPT, "text/plain")
            .body(bytes.to_vec())
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }
}

#[async_trait]
impl TextExtractor for TikaExtractor {
    async fn extract(&self, path: &str, bytes: &[u8]) -> Result<String> {
        match self.request(bytes).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) if is_plain_text(path) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Ok(_) => Ok(String::new()),
            Err(e) if is_plain_text(path) => {
                tracing::debug!("Tika failed for {} ({}); decoding as UTF-8", path, e);
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Err(e) => Err(IngestError::Extraction {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported("/u/dossiers/D1/report.PDF"));
        assert!(is_supported("/u/dossiers/D1/notes.md"));
        assert!(!is_supported("/u/dossiers/D1/photo.jpg"));
        assert!(!is_supported("/u/dossiers/D1/README"));
        assert!(!is_supported("/u/dossiers/D1/.txt"));
    }

    #[tokio::test]
    async fn test_plain_text_survives_unreachable_tika() {
        let settings = SyncSettings {
            http_timeout_secs: 1,
            ..SyncSettings::default()
        };
        let tika = TikaExtractor::new("http://127.0.0.1:9", &settings).unwrap();

        let text = tika.extract("/u/d/D1/a.txt", "héllo\n\nworld".as_bytes()).await.unwrap();
        assert_eq!(text, "héllo\n\nworld");

        let err = tika.extract("/u/d/D1/a.pdf", b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction { .. }));
    }
}

//! Error types for the ingestor

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for the ingestor
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Client protocol error ({status}): {message}")]
    ClientProtocol { status: u16, message: String },

    #[error("Server protocol error ({status}): {message}")]
    ServerProtocol { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Permission lookup failed for {path}: {message}")]
    PermissionLookup { path: String, message: String },

    #[error("Text extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    #[error("Ambiguous activity {event_id}: {reason}")]
    ClassificationAmbiguity { event_id: i64, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another sync run is already active ({0})")]
    RunInProgress(String),

    #[error("Sync run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::TransientNetwork(_) | IngestError::ServerProtocol { .. }
        )
    }

    /// Whether an incremental run that failed with this error may fall back to a full run
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            IngestError::Cancelled
                | IngestError::RunInProgress(_)
                | IngestError::Storage(_)
                | IngestError::Database(_)
        )
    }

    /// Taxonomy name reported by the status surfaces
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::TransientNetwork(_) => "transient_network_error",
            IngestError::ClientProtocol { .. } => "client_protocol_error",
            IngestError::ServerProtocol { .. } => "server_protocol_error",
            IngestError::Database(_) | IngestError::Storage(_) => "storage_error",
            IngestError::PermissionLookup { .. } => "permission_lookup_error",
            IngestError::Extraction { .. } => "extraction_error",
            IngestError::ClassificationAmbiguity { .. } => "classification_ambiguity",
            IngestError::NotFound(_) => "not_found",
            IngestError::Config(_) => "config_error",
            IngestError::Serialization(_) | IngestError::Xml(_) => "decode_error",
            IngestError::Io(_) => "io_error",
            IngestError::RunInProgress(_) => "run_in_progress",
            IngestError::Cancelled => "cancelled",
            IngestError::Internal(_) => "internal_error",
        }
    }

    /// Map a non-success HTTP status into the protocol taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            IngestError::ClientProtocol { status, message }
        } else {
            IngestError::ServerProtocol { status, message }
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => IngestError::from_status(status.as_u16(), e.to_string()),
            None => IngestError::TransientNetwork(e.to_string()),
        }
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(e: quick_xml::Error) -> Self {
        IngestError::Xml(e.to_string())
    }
}

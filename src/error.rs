use thiserror::Error;

use crate::orchestrator::RunStage;

#[derive(Error, Debug)]
pub enum LedgerSyncError {
    #[error("Missing required env var: {0}")]
    MissingEnv(String),

    #[error("Invalid configuration value for {key}: {details}")]
    InvalidConfig { key: String, details: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Backend quota exceeded: {0}")]
    Quota(String),

    #[error("Backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Sync run failed after stage {stage}: {source}")]
    RunFailed {
        stage: RunStage,
        #[source]
        source: Box<LedgerSyncError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "remote")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl LedgerSyncError {
    /// True for rejections caused by the backend's request-rate quota.
    pub fn is_quota(&self) -> bool {
        match self {
            LedgerSyncError::Quota(_) => true,
            LedgerSyncError::Backend { status, message } => {
                *status == 429 || looks_like_quota_message(message)
            }
            LedgerSyncError::RunFailed { source, .. } => source.is_quota(),
            _ => false,
        }
    }
}

pub(crate) fn looks_like_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("ratelimit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
}

pub type Result<T> = std::result::Result<T, LedgerSyncError>;

use std::fmt;
use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad task file, corrupt state, missing credentials or a held run lock.
    /// The only error that aborts a whole run.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Release not found: {0}")]
    NotFound(String),

    #[error("GitHub API rate limit exhausted: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Asset '{name}' is {size} bytes, over the {limit} byte limit")]
    AssetTooLarge { name: String, size: u64, limit: u64 },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upload rejected by the storage provider: {0}")]
    Quota(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        SyncError::Network(error.to_string())
    }
}

/// The step of the per-task pipeline in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Check,
    Download,
    Upload,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Check => "CHECK",
            Stage::Download => "DOWNLOAD",
            Stage::Upload => "UPLOAD",
            Stage::Record => "RECORD",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(SyncError::Config("bad".to_string()).is_fatal());
        assert!(!SyncError::NotFound("x".to_string()).is_fatal());
        assert!(!SyncError::Auth("x".to_string()).is_fatal());
        assert!(
            !SyncError::AssetTooLarge {
                name: "a.zip".to_string(),
                size: 2,
                limit: 1
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Check.to_string(), "CHECK");
        assert_eq!(Stage::Upload.to_string(), "UPLOAD");
    }
}

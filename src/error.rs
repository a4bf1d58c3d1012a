//! Error types for the recovery engine
//!
//! Only device-open and boot-sector failures are allowed to end a scan;
//! everything else is reported and the scan moves on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an NTFS disk (OEM id {0:?})")]
    NotNtfs(String),

    #[error("Malformed structure at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("Record {record} is orphaned: {reason}")]
    Orphan { record: u64, reason: String },

    #[error("Failed to extract {path}: {reason}")]
    Extraction { path: String, reason: String },

    #[error("Invalid pattern '{0}'")]
    Pattern(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

impl RecoveryError {
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        RecoveryError::Format {
            offset,
            reason: reason.into(),
        }
    }

    pub fn orphan(record: u64, reason: impl Into<String>) -> Self {
        RecoveryError::Orphan {
            record,
            reason: reason.into(),
        }
    }

    /// Check if the scan can carry on past this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RecoveryError::NotNtfs(_))
    }
}

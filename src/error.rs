// Sidecar Sync Error Types

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed sidecar: {0}")]
    MalformedSidecar(String),

    #[error("Unreadable file {path}: {reason}")]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("Hash computation failed: {0}")]
    HashComputationFailed(String),

    #[error("Write rejected for {path}: {reason}")]
    WriteRejected { path: PathBuf, reason: String },

    #[error("Ambiguous match for {path}: {candidates} candidates")]
    AmbiguousMatch { path: PathBuf, candidates: usize },

    #[error("Directory not accessible: {0}")]
    InaccessibleDirectory(PathBuf),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool timed out after {secs}s on {path}")]
    ToolTimeout { path: PathBuf, secs: u64 },

    #[error("ExifTool error: {0}")]
    ExifTool(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Per-file failure categories recorded in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    MalformedSidecar,
    UnreadableFile,
    HashComputationFailed,
    WriteRejected,
    AmbiguousMatch,
}

impl SyncError {
    /// Category used when this error is recorded against a single file.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::MalformedSidecar(_) | SyncError::Json(_) => FailureKind::MalformedSidecar,
            SyncError::HashComputationFailed(_) => FailureKind::HashComputationFailed,
            SyncError::WriteRejected { .. } => FailureKind::WriteRejected,
            SyncError::AmbiguousMatch { .. } => FailureKind::AmbiguousMatch,
            _ => FailureKind::UnreadableFile,
        }
    }
}

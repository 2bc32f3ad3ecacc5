use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source directory not found: {path}")]
    SourceNotFound { path: String },

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend temporarily unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Workload {name} failed to {action}: {reason}")]
    Workload { name: String, action: String, reason: String },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Invalid snapshot key: {key}")]
    InvalidSnapshotKey { key: String },

    #[error("Pruning left {} object(s) behind: {}", failed.len(), failed.join(", "))]
    PruneIncomplete { failed: Vec<String> },

    #[error("A snapshot run is already in progress")]
    RunInProgress,

    #[error("Snapshot run {key} failed at: {}", stages.join(", "))]
    RunFailed { key: String, stages: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use crate::metadata::SourceSummary;
use crate::types::{SnapshotKey, TIMESTAMP_FORMAT};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Success,
    Error,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotStatus::Success => write!(f, "success"),
            SnapshotStatus::Error => write!(f, "error"),
        }
    }
}

/// Companion record uploaded next to every archive.
///
/// `status` covers capture and metadata only. The record is written before
/// the workload is resumed, so a run that later fails to resume still carries
/// `success` here and in `snapshot-latest.json`; the run report is the
/// authority on the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: String,
    pub time: DateTime<Utc>,
    pub protocol: String,
    pub network: String,
    pub version: String,
    pub hostname: String,
    pub archive: String,
    pub size_bytes: u64,
    pub file_count: u64,
    pub fingerprint: String,
    pub status: SnapshotStatus,
}

impl SnapshotRecord {
    pub fn new(key: &SnapshotKey, version: impl Into<String>, summary: &SourceSummary) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            timestamp: key.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            time: key.timestamp,
            protocol: key.category.clone(),
            network: key.environment.clone(),
            version: version.into(),
            hostname,
            archive: key.archive_key(),
            size_bytes: summary.size_bytes,
            file_count: summary.file_count,
            fingerprint: summary.fingerprint.clone(),
            status: SnapshotStatus::Success,
        }
    }

    pub fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == SnapshotStatus::Success
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Other(format!("Failed to serialize snapshot record: {}", e)))?;
        Ok(Bytes::from(json))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Other(format!("Failed to deserialize snapshot record: {}", e)))
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} at {} - {} files, {:.2} MB, sha256 {} ({})",
            self.protocol,
            self.network,
            self.time.format("%Y-%m-%d %H:%M:%S UTC"),
            self.file_count,
            self.size_bytes as f64 / 1024.0 / 1024.0,
            self.fingerprint.chars().take(12).collect::<String>(),
            self.status
        )
    }
}

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp layout embedded in every snapshot object key.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
pub const LATEST_METADATA_NAME: &str = "snapshot-latest.json";

/// Identifies one snapshot: `<category>/<environment>/<timestamp>`.
///
/// The timestamp is UTC at second resolution. It is both the object key
/// suffix and the retention sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub category: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

impl SnapshotKey {
    pub fn new(
        category: impl Into<String>,
        environment: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            category: category.into(),
            environment: environment.into(),
            timestamp: timestamp.trunc_subsecs(0),
        }
    }

    pub fn now(category: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::new(category, environment, Utc::now())
    }

    pub fn prefix(&self) -> String {
        key_prefix(&self.category, &self.environment)
    }

    pub fn stamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn object_key(&self, class: ObjectClass) -> String {
        format!("{}{}{}", self.prefix(), self.stamp(), class.suffix())
    }

    pub fn archive_key(&self) -> String {
        self.object_key(ObjectClass::Archive)
    }

    pub fn metadata_key(&self) -> String {
        self.object_key(ObjectClass::Metadata)
    }

    pub fn latest_key(&self) -> String {
        format!("{}{}", self.prefix(), LATEST_METADATA_NAME)
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.environment, self.stamp())
    }
}

pub fn key_prefix(category: &str, environment: &str) -> String {
    format!("{}/{}/", category, environment)
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a key timestamp segment. Only the exact canonical rendering is
/// accepted, so `parse(format(t)) == t` and nothing else parses.
pub fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    let timestamp = naive.and_utc();
    (format_timestamp(&timestamp) == stamp).then_some(timestamp)
}

/// Families of stored objects that are pruned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Archive,
    Metadata,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 2] = [ObjectClass::Archive, ObjectClass::Metadata];

    pub fn suffix(&self) -> &'static str {
        match self {
            ObjectClass::Archive => ".tar.gz",
            ObjectClass::Metadata => "-metadata.json",
        }
    }

    /// Extracts the timestamp from `key` if the key belongs to this class.
    ///
    /// Returns `Ok(None)` for keys outside the class (other suffixes, nested
    /// paths, the latest pointer) and an error when the key has the class
    /// shape but the timestamp segment does not parse.
    pub fn timestamp_of(&self, prefix: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(rest) = key.strip_prefix(prefix) else {
            return Ok(None);
        };
        if rest.contains('/') {
            return Ok(None);
        }
        let Some(stamp) = rest.strip_suffix(self.suffix()) else {
            return Ok(None);
        };
        parse_timestamp(stamp)
            .map(Some)
            .ok_or_else(|| Error::InvalidSnapshotKey { key: key.to_string() })
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::Archive => write!(f, "archive"),
            ObjectClass::Metadata => write!(f, "metadata"),
        }
    }
}

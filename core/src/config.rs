use crate::filter::PathFilter;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration as TimeDelta, NaiveTime, Utc};
use std::path::{Path, PathBuf};

pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Key category used for configs in the flat single-container layout.
pub const LEGACY_CATEGORY: &str = "snapshots";

/// Process-wide settings, read once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl SourceConfig {
    pub fn filter(&self) -> PathFilter {
        PathFilter::new(self.ignore.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Protocol or product name, first key segment.
    pub category: String,
    /// Network or environment name, second key segment.
    pub environment: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Docker,
    Command,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    #[serde(default)]
    pub kind: WorkloadKind,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub pause_command: Vec<String>,
    #[serde(default)]
    pub resume_command: Vec<String>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            kind: WorkloadKind::None,
            name: String::new(),
            stop_timeout_secs: default_stop_timeout(),
            pause_command: Vec::new(),
            resume_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    S3,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_true")]
    pub path_style: bool,
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    /// Destination directory for the local backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_keep")]
    pub keep: usize,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep: default_keep(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub run_on_start: bool,
    /// Wall-clock time of day (`HH:MM`, UTC) for one run per day. Takes
    /// precedence over `interval_secs`.
    #[serde(default)]
    pub daily_at: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            run_on_start: false,
            daily_at: None,
        }
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<Option<NaiveTime>> {
        self.daily_at
            .as_deref()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| {
                    Error::Config(format!("schedule.daily_at must be HH:MM, got {:?}: {}", s, e))
                })
            })
            .transpose()
    }

    /// First daily run strictly after `now`, or `None` for interval scheduling.
    pub fn next_daily_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(time) = self.daily_time()? else {
            return Ok(None);
        };
        let today = now.date_naive().and_time(time).and_utc();
        if today > now {
            Ok(Some(today))
        } else {
            Ok(Some(today + TimeDelta::days(1)))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_compression")]
    pub compression_level: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            capacity: default_capacity(),
            compression_level: default_compression(),
        }
    }
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_part_size() -> usize {
    16 * 1024 * 1024
}

fn default_keep() -> usize {
    5
}

fn default_interval() -> u64 {
    24 * 60 * 60
}

fn default_chunk_size() -> usize {
    crate::pipe::DEFAULT_CHUNK_SIZE
}

fn default_capacity() -> usize {
    crate::pipe::DEFAULT_CAPACITY
}

fn default_compression() -> u32 {
    6
}

/// Flat single-container layout: one docker container, one directory, one
/// S3 bucket. Unknown keys are ignored and missing ones are empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyConfig {
    pub container_name: String,
    pub file_path: String,
    pub bucket_name: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub region: String,
}

impl LegacyConfig {
    /// Reads `CONTAINER_NAME`, `FILE_PATH` and `BUCKET_NAME`. Returns `None`
    /// when `FILE_PATH` is unset.
    pub fn from_env<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Some(Self {
            file_path: lookup("FILE_PATH")?,
            container_name: lookup("CONTAINER_NAME").unwrap_or_default(),
            bucket_name: lookup("BUCKET_NAME").unwrap_or_default(),
            ..Default::default()
        })
    }
}

impl From<LegacyConfig> for Config {
    fn from(legacy: LegacyConfig) -> Self {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);

        let workload = if legacy.container_name.is_empty() {
            WorkloadConfig::default()
        } else {
            WorkloadConfig {
                kind: WorkloadKind::Docker,
                name: legacy.container_name.clone(),
                ..Default::default()
            }
        };
        let environment = if legacy.container_name.is_empty() {
            "default".to_string()
        } else {
            legacy.container_name
        };

        Self {
            source: SourceConfig {
                path: PathBuf::from(legacy.file_path),
                ignore: Vec::new(),
            },
            snapshot: SnapshotConfig {
                category: LEGACY_CATEGORY.to_string(),
                environment,
                version: String::new(),
            },
            workload,
            storage: StorageConfig {
                kind: StorageKind::S3,
                bucket: legacy.bucket_name,
                endpoint: non_empty(legacy.endpoint),
                region: non_empty(legacy.region).unwrap_or_else(default_region),
                access_key: non_empty(legacy.access_key),
                secret_key: non_empty(legacy.secret_key),
                path_style: true,
                part_size: default_part_size(),
                root: None,
            },
            retention: RetentionConfig::default(),
            schedule: ScheduleConfig {
                daily_at: Some("00:00".to_string()),
                ..Default::default()
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Loads a config file. `.json` files are parsed as JSON, everything
    /// else as TOML. A JSON object without a `source` section but with a
    /// `file_path` key is read as a [`LegacyConfig`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;

        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
                .map_err(|e| Error::Config(format!("Invalid JSON in {}: {}", path.display(), e)))
        } else {
            Self::from_toml(&content)
        }
    }

    fn from_json(content: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        if value.get("source").is_none() && value.get("file_path").is_some() {
            let legacy: LegacyConfig = serde_json::from_value(value)?;
            return Ok(legacy.into());
        }
        serde_json::from_value(value)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Fills secrets and deployment-specific values from the environment.
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SNAPSTREAM_ACCESS_KEY") {
            self.storage.access_key = Some(v);
        }
        if let Some(v) = lookup("SNAPSTREAM_SECRET_KEY") {
            self.storage.secret_key = Some(v);
        }
        if let Some(v) = lookup("SNAPSTREAM_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = lookup("SNAPSTREAM_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = lookup("SNAPSTREAM_SOURCE") {
            self.source.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SNAPSTREAM_WORKLOAD") {
            self.workload.name = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.path.as_os_str().is_empty() {
            return Err(Error::Config("source.path must be set".to_string()));
        }
        for name in &self.source.ignore {
            if name.is_empty() || name.contains('/') {
                return Err(Error::Config(format!(
                    "source.ignore entries are base names, got {:?}",
                    name
                )));
            }
        }

        check_segment("snapshot.category", &self.snapshot.category)?;
        check_segment("snapshot.environment", &self.snapshot.environment)?;

        match self.workload.kind {
            WorkloadKind::Docker if self.workload.name.is_empty() => {
                return Err(Error::Config(
                    "workload.name is required for docker workloads".to_string(),
                ));
            }
            WorkloadKind::Command
                if self.workload.pause_command.is_empty()
                    || self.workload.resume_command.is_empty() =>
            {
                return Err(Error::Config(
                    "workload.pause_command and workload.resume_command are required".to_string(),
                ));
            }
            _ => {}
        }

        match self.storage.kind {
            StorageKind::S3 => {
                if self.storage.bucket.is_empty() {
                    return Err(Error::Config("storage.bucket must be set".to_string()));
                }
                if self.storage.part_size < MIN_PART_SIZE {
                    return Err(Error::Config(format!(
                        "storage.part_size must be at least {} bytes",
                        MIN_PART_SIZE
                    )));
                }
            }
            StorageKind::Local => {
                if self.storage.root.is_none() {
                    return Err(Error::Config(
                        "storage.root is required for local storage".to_string(),
                    ));
                }
            }
        }

        if self.retention.keep == 0 {
            return Err(Error::Config("retention.keep must be at least 1".to_string()));
        }
        if self.schedule.interval_secs == 0 {
            return Err(Error::Config("schedule.interval_secs must be positive".to_string()));
        }
        self.schedule.daily_time()?;
        if self.pipeline.chunk_size == 0 || self.pipeline.capacity == 0 {
            return Err(Error::Config(
                "pipeline.chunk_size and pipeline.capacity must be positive".to_string(),
            ));
        }
        if self.pipeline.compression_level > 9 {
            return Err(Error::Config(
                "pipeline.compression_level must be between 0 and 9".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(Error::Config(format!(
            "{} must be a non-empty key segment without '/', got {:?}",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        path = "/var/lib/node"
        ignore = ["LOCK"]

        [snapshot]
        category = "nimiq"
        environment = "mainnet"

        [storage]
        bucket = "snapshots"
        endpoint = "https://s3.example.com"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.region, "us-east-1");
        assert!(config.storage.path_style);
        assert_eq!(config.retention.keep, 5);
        assert_eq!(config.schedule.interval_secs, 86400);
        assert_eq!(config.workload.kind, WorkloadKind::None);
        assert_eq!(config.workload.stop_timeout_secs, 30);
        assert!(!config.source.filter().included("LOCK"));
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env(|key| match key {
            "SNAPSTREAM_ACCESS_KEY" => Some("AKIA".to_string()),
            "SNAPSTREAM_SECRET_KEY" => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(config.storage.access_key.as_deref(), Some("AKIA"));
        assert_eq!(config.storage.secret_key.as_deref(), Some("secret"));
        assert_eq!(config.storage.bucket, "snapshots");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.retention.keep = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.snapshot.environment = "main/net".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.workload.kind = WorkloadKind::Docker;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.storage.part_size = 1024;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let content = format!("{}\n[extra]\nfoo = 1\n", MINIMAL);
        assert!(matches!(Config::from_toml(&content), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "source": {"path": "/data"},
                "snapshot": {"category": "nimiq", "environment": "testnet", "version": "1.0"},
                "workload": {"kind": "docker", "name": "nimiq-node"},
                "storage": {"kind": "local", "root": "/backups"}
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.workload.kind, WorkloadKind::Docker);
        assert_eq!(config.storage.kind, StorageKind::Local);
    }

    #[test]
    fn test_legacy_json_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "container_name": "nimiq-node",
                "file_path": "/home/nimiq/data",
                "bucket_name": "nimiq-snapshots",
                "access_key": "AKIA",
                "secret_key": "secret",
                "endpoint": "https://fra1.digitaloceanspaces.com",
                "region": "fra1"
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.source.path, PathBuf::from("/home/nimiq/data"));
        assert_eq!(config.workload.kind, WorkloadKind::Docker);
        assert_eq!(config.workload.name, "nimiq-node");
        assert_eq!(config.workload.stop_timeout_secs, 30);
        assert_eq!(config.snapshot.category, LEGACY_CATEGORY);
        assert_eq!(config.snapshot.environment, "nimiq-node");
        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.bucket, "nimiq-snapshots");
        assert_eq!(config.storage.region, "fra1");
        assert_eq!(config.storage.access_key.as_deref(), Some("AKIA"));
        assert_eq!(
            config.storage.endpoint.as_deref(),
            Some("https://fra1.digitaloceanspaces.com")
        );
        assert!(config.storage.path_style);
    }

    #[test]
    fn test_legacy_env_only_config() {
        assert!(LegacyConfig::from_env(|_| None).is_none());

        let legacy = LegacyConfig::from_env(|key| match key {
            "CONTAINER_NAME" => Some("node".to_string()),
            "FILE_PATH" => Some("/data".to_string()),
            "BUCKET_NAME" => Some("bucket".to_string()),
            _ => None,
        })
        .unwrap();
        let mut config = Config::from(legacy);
        config.apply_env(|key| (key == "SNAPSTREAM_SECRET_KEY").then(|| "s3cret".to_string()));

        config.validate().unwrap();
        assert_eq!(config.source.path, PathBuf::from("/data"));
        assert_eq!(config.workload.name, "node");
        assert_eq!(config.storage.bucket, "bucket");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.storage.endpoint, None);
        assert_eq!(config.storage.secret_key.as_deref(), Some("s3cret"));
        assert_eq!(config.schedule.daily_at.as_deref(), Some("00:00"));
    }

    #[test]
    fn test_daily_schedule_is_aligned_to_wall_clock() {
        use chrono::TimeZone;

        let schedule = ScheduleConfig {
            daily_at: Some("03:30".to_string()),
            ..Default::default()
        };
        let before = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        let exactly = Utc.with_ymd_and_hms(2024, 5, 1, 3, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();

        assert_eq!(schedule.next_daily_run(before).unwrap(), Some(exactly));
        assert_eq!(
            schedule.next_daily_run(exactly).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 3, 30, 0).unwrap())
        );
        assert_eq!(
            schedule.next_daily_run(after).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 3, 30, 0).unwrap())
        );
        assert_eq!(ScheduleConfig::default().next_daily_run(before).unwrap(), None);

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.schedule.daily_at = Some("25:00".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_without_source_is_not_legacy() {
        let err = Config::from_json(r#"{"snapshot": {"category": "a", "environment": "b"}}"#);
        assert!(err.is_err());
    }
}

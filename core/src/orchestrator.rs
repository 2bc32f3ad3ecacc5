use crate::archive::ArchiveEncoder;
use crate::config::Config;
use crate::metadata::{MetadataComputer, SourceSummary};
use crate::pipeline::{PipelineOutcome, SnapshotPipeline};
use crate::prune::{PruneReport, RetentionPruner};
use crate::snapshot::{SnapshotRecord, SnapshotStatus};
use crate::store::ObjectStore;
use crate::types::SnapshotKey;
use crate::workload::Workload;
use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prune,
    Pause,
    Capture,
    Metadata,
    Resume,
}

impl Stage {
    /// Prune failures are reported but never fail a run.
    pub fn fails_run(&self) -> bool {
        !matches!(self, Stage::Prune)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prune => "prune",
            Stage::Pause => "pause",
            Stage::Capture => "capture",
            Stage::Metadata => "metadata",
            Stage::Resume => "resume",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: Error,
}

/// Outcome of one snapshot run.
#[derive(Debug)]
pub struct RunReport {
    pub key: SnapshotKey,
    pub pruned: Vec<PruneReport>,
    pub archive: Option<PipelineOutcome>,
    pub summary: Option<SourceSummary>,
    pub record: Option<SnapshotRecord>,
    pub failures: Vec<StageFailure>,
    pub duration: Duration,
}

impl RunReport {
    fn new(key: SnapshotKey) -> Self {
        Self {
            key,
            pruned: Vec::new(),
            archive: None,
            summary: None,
            record: None,
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn fail(&mut self, stage: Stage, error: Error) {
        self.failures.push(StageFailure { stage, error });
    }

    pub fn status(&self) -> SnapshotStatus {
        if self.failures.iter().any(|f| f.stage.fails_run()) {
            SnapshotStatus::Error
        } else {
            SnapshotStatus::Success
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == SnapshotStatus::Success
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.failures
            .iter()
            .filter(|f| f.stage.fails_run())
            .map(|f| f.stage)
            .collect()
    }

    pub fn failed(&self, stage: Stage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }

    pub fn into_result(self) -> Result<RunReport> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::RunFailed {
            key: self.key.to_string(),
            stages: self
                .failures
                .iter()
                .filter(|f| f.stage.fails_run())
                .map(|f| format!("{} ({})", f.stage, f.error))
                .collect(),
        })
    }
}

/// Sequences one snapshot run: prune, pause, capture, resume.
///
/// Only one run executes at a time; a second caller gets
/// [`Error::RunInProgress`] instead of queueing.
pub struct SnapshotOrchestrator {
    source: PathBuf,
    category: String,
    environment: String,
    version: String,
    store: Arc<dyn ObjectStore>,
    workload: Arc<dyn Workload>,
    pipeline: SnapshotPipeline,
    metadata: MetadataComputer,
    pruner: Option<RetentionPruner>,
    running: Mutex<()>,
}

impl SnapshotOrchestrator {
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>, workload: Arc<dyn Workload>) -> Self {
        let filter = config.source.filter();
        let encoder = ArchiveEncoder::new(filter.clone())
            .with_compression(config.pipeline.compression_level);
        let pipeline = SnapshotPipeline::new(encoder, store.clone())
            .with_buffering(config.pipeline.capacity, config.pipeline.chunk_size);
        let pruner = config.retention.enabled.then(|| {
            RetentionPruner::new(store.clone(), config.retention.keep)
                .with_dry_run(config.retention.dry_run)
        });

        Self {
            source: config.source.path.clone(),
            category: config.snapshot.category.clone(),
            environment: config.snapshot.environment.clone(),
            version: config.snapshot.version.clone(),
            store,
            workload,
            pipeline,
            metadata: MetadataComputer::new(filter),
            pruner,
            running: Mutex::new(()),
        }
    }

    /// Compressed bytes uploaded so far by the run in progress.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.pipeline.progress()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let _guard = self.running.try_lock().map_err(|_| Error::RunInProgress)?;

        let started = Instant::now();
        let key = SnapshotKey::now(&self.category, &self.environment);
        let mut report = RunReport::new(key.clone());
        info!(snapshot = %key, workload = self.workload.name(), "Starting snapshot run");

        if let Some(pruner) = &self.pruner {
            for (class, result) in pruner.prune_all(&key.prefix()).await {
                match result {
                    Ok(pruned) => report.pruned.push(pruned),
                    Err(e) => {
                        warn!(%class, error = %e, "Retention pass failed, continuing with capture");
                        report.fail(Stage::Prune, e);
                    }
                }
            }
        }

        info!(workload = self.workload.name(), "Pausing workload");
        if let Err(e) = self.workload.pause().await {
            error!(
                workload = self.workload.name(),
                error = %e,
                "Failed to pause workload, skipping capture"
            );
            report.fail(Stage::Pause, e);
            report.duration = started.elapsed();
            return Ok(report);
        }

        self.capture(&key, cancel, &mut report).await;

        info!(workload = self.workload.name(), "Resuming workload");
        if let Err(e) = self.workload.resume().await {
            error!(
                workload = self.workload.name(),
                error = %e,
                "WORKLOAD DID NOT RESUME - service is down until restarted manually"
            );
            report.fail(Stage::Resume, e);
        }

        report.duration = started.elapsed();
        if report.is_success() {
            info!(snapshot = %key, elapsed_s = report.duration.as_secs(), "Snapshot run succeeded");
        } else {
            let stages: Vec<String> =
                report.failed_stages().iter().map(|s| s.to_string()).collect();
            error!(snapshot = %key, stages = %stages.join(","), "Snapshot run failed");
        }
        Ok(report)
    }

    async fn capture(&self, key: &SnapshotKey, cancel: &CancellationToken, report: &mut RunReport) {
        let archive_key = key.archive_key();
        let computer = self.metadata.clone();
        let root = self.source.clone();
        let metadata = async move {
            tokio::task::spawn_blocking(move || computer.compute(&root))
                .await
                .map_err(|e| Error::Other(format!("Metadata task panicked: {}", e)))?
        };

        let (archive, summary) = tokio::join!(
            self.pipeline.run(&self.source, &archive_key, cancel),
            metadata
        );

        match archive {
            Ok(outcome) => report.archive = Some(outcome),
            Err(e) => {
                error!(key = %archive_key, error = %e, "Archive capture failed");
                report.fail(Stage::Capture, e);
            }
        }

        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Metadata computation failed");
                report.fail(Stage::Metadata, e);
                return;
            }
        };

        let status = if report.archive.is_some() {
            SnapshotStatus::Success
        } else {
            SnapshotStatus::Error
        };
        let record = SnapshotRecord::new(key, &self.version, &summary).with_status(status);
        report.summary = Some(summary);

        match self.write_record(key, &record).await {
            Ok(()) => report.record = Some(record),
            Err(e) => {
                error!(error = %e, "Failed to store snapshot record");
                report.fail(Stage::Metadata, e);
            }
        }
    }

    /// Stores the timestamped record and, for successful snapshots only,
    /// the `latest` pointer.
    async fn write_record(&self, key: &SnapshotKey, record: &SnapshotRecord) -> Result<()> {
        let data = record.to_bytes()?;
        self.store.put(&key.metadata_key(), data.clone()).await?;
        if record.is_success() {
            self.store.put(&key.latest_key(), data).await?;
        }
        info!(
            key = %key.metadata_key(),
            status = %record.status,
            fingerprint = %record.fingerprint,
            size_bytes = record.size_bytes,
            "Stored snapshot record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, RecordingWorkload};
    use std::fs;
    use tempfile::TempDir;

    fn config(source: &std::path::Path, keep: usize) -> Config {
        let mut config = Config::from_toml(&format!(
            r#"
            [source]
            path = "{}"
            ignore = ["LOCK"]

            [snapshot]
            category = "nimiq"
            environment = "testnet"
            version = "1.3.0"

            [storage]
            bucket = "snapshots"
            "#,
            source.display()
        ))
        .unwrap();
        config.retention.keep = keep;
        config
    }

    fn stored_record(store: &MemoryStore, key: &str) -> SnapshotRecord {
        SnapshotRecord::from_slice(&store.object(key).unwrap()).unwrap()
    }

    fn source() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("chain")).unwrap();
        fs::write(dir.path().join("chain/data.mdb"), vec![1u8; 4096]).unwrap();
        fs::write(dir.path().join("chain/LOCK"), b"").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_successful_run_writes_archive_and_records() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(workload.calls(), vec!["pause", "resume"]);

        let key = report.key.clone();
        assert!(store.object(&key.archive_key()).is_some());
        let record = stored_record(&store, &key.metadata_key());
        let latest = stored_record(&store, &key.latest_key());
        assert_eq!(record, latest);
        assert_eq!(record.size_bytes, 4096);
        assert_eq!(record.file_count, 1);
        assert_eq!(record.version, "1.3.0");
        assert_eq!(record.status, SnapshotStatus::Success);
        assert_eq!(
            record.fingerprint,
            MetadataComputer::new(crate::filter::PathFilter::new(["LOCK"]))
                .fingerprint(dir.path())
                .unwrap()
        );
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_pause_failure_skips_capture_and_resume() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload {
            fail_pause: true,
            ..Default::default()
        });
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.status(), SnapshotStatus::Error);
        assert_eq!(report.failed_stages(), vec![Stage::Pause]);
        assert_eq!(workload.calls(), vec!["pause"]);
        assert!(store.keys().is_empty());
        assert!(matches!(report.into_result(), Err(Error::RunFailed { .. })));
    }

    #[tokio::test]
    async fn test_capture_failure_still_resumes() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        store.fail_stream_after(0);
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(workload.calls(), vec!["pause", "resume"]);
        assert_eq!(report.status(), SnapshotStatus::Error);
        assert_eq!(report.failed_stages(), vec![Stage::Capture]);

        let key = report.key.clone();
        assert!(store.object(&key.archive_key()).is_none());
        // the failed run is recorded, but latest keeps pointing at a good snapshot
        let record = stored_record(&store, &key.metadata_key());
        assert_eq!(record.status, SnapshotStatus::Error);
        assert!(store.object(&key.latest_key()).is_none());
    }

    #[tokio::test]
    async fn test_missing_source_fails_capture_and_metadata() {
        let dir = source();
        let mut config = config(dir.path(), 5);
        config.source.path = dir.path().join("gone");
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator = SnapshotOrchestrator::new(&config, store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(workload.calls(), vec!["pause", "resume"]);
        assert!(report.failed(Stage::Capture));
        assert!(report.failed(Stage::Metadata));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_resume_failure_fails_run() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload {
            fail_resume: true,
            ..Default::default()
        });
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed_stages(), vec![Stage::Resume]);
        assert_eq!(report.status(), SnapshotStatus::Error);
        // the snapshot itself made it, and its record predates the resume
        assert!(store.object(&report.key.archive_key()).is_some());
        let latest = stored_record(&store, &report.key.latest_key());
        assert_eq!(latest.status, SnapshotStatus::Success);
    }

    #[tokio::test]
    async fn test_prune_runs_before_capture_and_does_not_block_it() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        for day in 1..=4 {
            store.insert(&format!("nimiq/testnet/2020010{}-000000.tar.gz", day), b"old");
        }
        store.insert("nimiq/testnet/garbage.tar.gz", b"?");
        store.insert("nimiq/testnet/20200101-000000-metadata.json", b"{}");
        store.insert("nimiq/testnet/20200102-000000-metadata.json", b"{}");

        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 1), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        // archive class aborted on the foreign key, metadata class pruned
        assert!(report.failed(Stage::Prune));
        assert!(report.is_success());
        assert_eq!(
            store.deleted(),
            vec!["nimiq/testnet/20200101-000000-metadata.json".to_string()]
        );
        assert!(store.object(&report.key.archive_key()).is_some());
        // the fresh snapshot was written after pruning, so it was not counted
        assert!(store.object("nimiq/testnet/20200102-000000-metadata.json").is_some());
    }

    #[tokio::test]
    async fn test_empty_source_is_a_successful_zero_size_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.record.as_ref().unwrap().size_bytes, 0);
        assert_eq!(report.archive.unwrap().archive.entries, 0);
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_rejected() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator = SnapshotOrchestrator::new(&config(dir.path(), 5), store, workload);

        let _held = orchestrator.running.try_lock().unwrap();
        assert!(orchestrator.is_running());
        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::RunInProgress));
    }

    #[tokio::test]
    async fn test_cancelled_run_still_resumes() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let token = CancellationToken::new();
        token.cancel();
        let report = orchestrator.run(&token).await.unwrap();

        assert_eq!(workload.calls(), vec!["pause", "resume"]);
        assert!(report.failed(Stage::Capture));
        assert!(store.object(&report.key.archive_key()).is_none());
    }

    #[tokio::test]
    async fn test_record_upload_failure_fails_metadata_stage() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        store.fail_puts();
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 5), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(workload.calls(), vec!["pause", "resume"]);
        assert_eq!(report.failed_stages(), vec![Stage::Metadata]);
        assert_eq!(report.status(), SnapshotStatus::Error);
        assert!(report.record.is_none());
        // the archive went through put_stream and is kept
        assert_eq!(store.keys(), vec![report.key.archive_key()]);
    }

    #[tokio::test]
    async fn test_failed_listing_does_not_stop_capture() {
        let dir = source();
        let store = Arc::new(MemoryStore::new());
        store.insert("nimiq/testnet/20200101-000000.tar.gz", b"old");
        store.fail_lists();
        let workload = Arc::new(RecordingWorkload::default());
        let orchestrator =
            SnapshotOrchestrator::new(&config(dir.path(), 1), store.clone(), workload.clone());

        let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert!(report.failed(Stage::Prune));
        assert!(report.is_success());
        assert!(report.pruned.is_empty());
        assert!(store.deleted().is_empty());
        assert!(store.object(&report.key.archive_key()).is_some());
        assert!(store.object(&report.key.latest_key()).is_some());
    }
}

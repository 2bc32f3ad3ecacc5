use crate::archive::{ArchiveEncoder, ArchiveStats};
use crate::pipe::{DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE, pipe};
use crate::store::ObjectStore;
use crate::{Error, Result};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub archive: ArchiveStats,
    pub uploaded_bytes: u64,
}

/// Directory in, stored archive object out.
///
/// The encoder runs on a blocking thread and writes into a bounded pipe; the
/// upload reads the other end on the async runtime. Neither side ever holds
/// more than `capacity * chunk_size` bytes of archive in memory.
pub struct SnapshotPipeline {
    encoder: ArchiveEncoder,
    store: Arc<dyn ObjectStore>,
    capacity: usize,
    chunk_size: usize,
    progress: Arc<AtomicU64>,
}

impl SnapshotPipeline {
    pub fn new(encoder: ArchiveEncoder, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            encoder,
            store,
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_buffering(mut self, capacity: usize, chunk_size: usize) -> Self {
        self.capacity = capacity;
        self.chunk_size = chunk_size;
        self
    }

    /// Compressed bytes handed to the store during the current run.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    pub async fn run(
        &self,
        root: &Path,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();
        self.progress.store(0, Ordering::Relaxed);

        let (mut writer, reader) = pipe(self.capacity, self.chunk_size);
        let reader = reader.track(self.progress.clone()).cancel_on(cancel.clone());

        let encoder = self.encoder.clone();
        let root = root.to_path_buf();
        let token = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || -> Result<ArchiveStats> {
            match encoder.encode(&root, &mut writer, &token) {
                Ok(stats) => {
                    writer.finish()?;
                    Ok(stats)
                }
                Err(e) => {
                    writer.fail(io::Error::other(e.to_string()));
                    Err(e)
                }
            }
        });

        // the store sees cancellation as a failing body and cleans up itself
        let upload = self.store.put_stream(key, Box::new(reader));

        let (produced, uploaded) = tokio::join!(producer, upload);
        let produced: Result<ArchiveStats> = produced
            .map_err(|e| Error::Capture(format!("Archive task panicked: {}", e)))
            .and_then(|r| r);

        match (produced, uploaded) {
            (Ok(archive), Ok(uploaded_bytes)) => {
                info!(
                    key,
                    entries = archive.entries,
                    content_bytes = archive.content_bytes,
                    uploaded_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Archive stored"
                );
                Ok(PipelineOutcome { archive, uploaded_bytes })
            }
            _ if cancel.is_cancelled() => {
                warn!(key, "Archive upload cancelled");
                Err(Error::Cancelled)
            }
            // the encoder only saw the reader go away
            (Err(Error::Io(e)), Err(upload)) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(Error::Capture(format!("Upload of {} failed: {}", key, upload)))
            }
            // the upload error is then only an echo of the encoder failure
            (Err(e), _) => Err(Error::Capture(format!("Archive encoding failed: {}", e))),
            (Ok(_), Err(e)) => Err(Error::Capture(format!("Upload of {} failed: {}", key, e))),
        }
    }
}

use crate::filter::PathFilter;
use crate::walk::{EntryKind, SourceEntry, walk};
use crate::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: u64,
    pub content_bytes: u64,
}

/// Writes a source tree as a gzip-compressed tar stream.
///
/// Member names are paths relative to the root. Only regular files and
/// symlinks are stored; directories are implied by member names.
#[derive(Debug, Clone)]
pub struct ArchiveEncoder {
    filter: PathFilter,
    compression: Compression,
}

impl ArchiveEncoder {
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Encodes `root` into `out`. On success the tar end marker and the gzip
    /// trailer have both been written; `out` itself is flushed but not closed.
    pub fn encode<W: Write>(
        &self,
        root: &Path,
        out: W,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats> {
        let entries = walk(root, &self.filter)?;
        info!(root = %root.display(), entries = entries.len(), "Encoding archive");

        match self.write_entries(&entries, out, cancel) {
            Ok(stats) => Ok(stats),
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(e),
        }
    }

    fn write_entries<W: Write>(
        &self,
        entries: &[SourceEntry],
        out: W,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats> {
        let gz = GzEncoder::new(out, self.compression);
        let mut builder = Builder::new(gz);
        let mut stats = ArchiveStats::default();

        for entry in entries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            append_entry(&mut builder, entry, cancel)?;
            stats.entries += 1;
            stats.content_bytes += entry.size;
            debug!(member = %entry.relative.display(), size = entry.size, "Archived entry");
        }

        let gz = builder.into_inner()?;
        let mut out = gz.finish()?;
        out.flush()?;
        Ok(stats)
    }
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    entry: &SourceEntry,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_mode(entry.mode);
    header.set_mtime(entry.mtime);

    match &entry.kind {
        EntryKind::Symlink(target) => {
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &entry.relative, target)?;
        }
        EntryKind::File => {
            let file = File::open(&entry.path).map_err(|e| {
                Error::Capture(format!("Failed to open {}: {}", entry.path.display(), e))
            })?;
            let current = file.metadata()?.len();
            if current != entry.size {
                return Err(Error::Capture(format!(
                    "{} changed size during capture ({} -> {} bytes)",
                    entry.path.display(),
                    entry.size,
                    current
                )));
            }

            header.set_entry_type(EntryType::Regular);
            header.set_size(entry.size);
            let reader = ExactReader {
                inner: file,
                remaining: entry.size,
                cancel,
            };
            builder.append_data(&mut header, &entry.relative, reader)?;
        }
    }
    Ok(())
}

/// Yields exactly `remaining` bytes or fails. The tar header has already
/// promised that size, so a short file would corrupt every later member.
struct ExactReader<'a, R> {
    inner: R,
    remaining: u64,
    cancel: &'a CancellationToken,
}

impl<R: Read> Read for ExactReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive encoding cancelled"));
        }
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

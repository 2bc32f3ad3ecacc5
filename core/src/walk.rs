use crate::filter::PathFilter;
use crate::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// Links are stored as links, never followed.
    Symlink(PathBuf),
}

/// One regular file or symlink below the snapshot root.
///
/// `relative` keeps the raw name bytes, so names that are not valid UTF-8
/// are archived as they are on disk.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
}

impl SourceEntry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }
}

/// Lists every included entry under `root`, sorted by relative path.
///
/// Directories never appear in the result. A directory whose base name is
/// ignored is skipped together with everything below it. Sockets, fifos and
/// device nodes are skipped. The ordering depends only on the relative paths,
/// never on the order the filesystem hands entries out.
pub fn walk(root: &Path, filter: &PathFilter) -> Result<Vec<SourceEntry>> {
    let root_meta = fs::metadata(root).map_err(|_| Error::SourceNotFound {
        path: root.display().to_string(),
    })?;
    if !root_meta.is_dir() {
        return Err(Error::SourceNotFound {
            path: root.display().to_string(),
        });
    }

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || filter.included(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = relative_name(root, entry.path())?;
        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let (kind, size) = if file_type.is_symlink() {
            (EntryKind::Symlink(fs::read_link(entry.path())?), 0)
        } else if file_type.is_file() {
            (EntryKind::File, metadata.len())
        } else {
            warn!(path = %entry.path().display(), "Skipping special file");
            continue;
        };

        entries.push(SourceEntry {
            path: entry.path().to_path_buf(),
            relative,
            kind,
            size,
            mode: file_mode(&metadata),
            mtime,
        });
    }

    entries.sort_by(|a, b| {
        a.relative
            .as_os_str()
            .as_encoded_bytes()
            .cmp(b.relative.as_os_str().as_encoded_bytes())
    });
    debug!(root = %root.display(), entries = entries.len(), "Walked source tree");
    Ok(entries)
}

fn relative_name(root: &Path, path: &Path) -> Result<PathBuf> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::Other(format!("{} is outside {}", path.display(), root.display())))?;

    if let Some(other) = relative
        .components()
        .find(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::Other(format!(
            "Unexpected path component {:?} in {}",
            other,
            path.display()
        )));
    }
    Ok(relative.to_path_buf())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}

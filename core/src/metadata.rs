use crate::filter::PathFilter;
use crate::walk::{EntryKind, SourceEntry, walk};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_BUFFER: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub size_bytes: u64,
    pub file_count: u64,
    pub fingerprint: String,
}

/// Size and content fingerprint of a source tree, independent of the archive.
#[derive(Debug, Clone)]
pub struct MetadataComputer {
    filter: PathFilter,
}

impl MetadataComputer {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    /// Total bytes of the included regular files.
    pub fn size(&self, root: &Path) -> Result<u64> {
        Ok(walk(root, &self.filter)?.iter().map(|e| e.size).sum())
    }

    /// Hex SHA-256 over the content of every included entry, in relative
    /// path order. Symlinks contribute their target path.
    pub fn fingerprint(&self, root: &Path) -> Result<String> {
        Ok(self.compute(root)?.fingerprint)
    }

    pub fn compute(&self, root: &Path) -> Result<SourceSummary> {
        let entries = walk(root, &self.filter)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER];

        for entry in &entries {
            hash_entry(&mut hasher, entry, &mut buf)?;
        }

        Ok(SourceSummary {
            size_bytes: entries.iter().map(|e| e.size).sum(),
            file_count: entries.len() as u64,
            fingerprint: hex::encode(hasher.finalize()),
        })
    }
}

fn hash_entry(hasher: &mut Sha256, entry: &SourceEntry, buf: &mut [u8]) -> Result<()> {
    match &entry.kind {
        EntryKind::Symlink(target) => {
            hasher.update(target.as_os_str().as_encoded_bytes());
        }
        EntryKind::File => {
            let mut file = File::open(&entry.path).map_err(|e| {
                Error::Other(format!("Failed to open {}: {}", entry.path.display(), e))
            })?;
            loop {
                let n = file.read(buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, data) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        dir
    }

    #[test]
    fn test_fingerprint_ignores_creation_order() {
        let a = tree(&[("z.dat", b"zzz"), ("a/b.dat", b"bb"), ("m.dat", b"m")]);
        let b = tree(&[("m.dat", b"m"), ("a/b.dat", b"bb"), ("z.dat", b"zzz")]);

        let computer = MetadataComputer::new(PathFilter::default());
        assert_eq!(
            computer.fingerprint(a.path()).unwrap(),
            computer.fingerprint(b.path()).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_matches_sorted_concatenation() {
        let dir = tree(&[("b", b"second"), ("a", b"first")]);
        let computer = MetadataComputer::new(PathFilter::default());

        let expected = hex::encode(Sha256::digest(b"firstsecond"));
        assert_eq!(computer.fingerprint(dir.path()).unwrap(), expected);
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let a = tree(&[("state.db", b"v1")]);
        let b = tree(&[("state.db", b"v2")]);
        let computer = MetadataComputer::new(PathFilter::default());

        assert_ne!(
            computer.fingerprint(a.path()).unwrap(),
            computer.fingerprint(b.path()).unwrap()
        );
    }

    #[test]
    fn test_ignored_files_do_not_count() {
        let with_lock = tree(&[("data.mdb", b"0123456789"), ("lock.mdb", b"xx")]);
        let without_lock = tree(&[("data.mdb", b"0123456789")]);

        let computer = MetadataComputer::new(PathFilter::new(["lock.mdb"]));
        let summary = computer.compute(with_lock.path()).unwrap();

        assert_eq!(summary.size_bytes, 10);
        assert_eq!(summary.file_count, 1);
        assert_eq!(computer.size(with_lock.path()).unwrap(), 10);
        assert_eq!(summary.fingerprint, computer.fingerprint(without_lock.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_hashed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tree(&[("good.txt", b"good")]);
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.log")), b"bad").unwrap();

        let summary = MetadataComputer::new(PathFilter::default())
            .compute(dir.path())
            .unwrap();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.size_bytes, 7);
        assert_eq!(summary.fingerprint, hex::encode(Sha256::digest(b"badgood")));
    }

    #[test]
    fn test_empty_tree() {
        let dir = TempDir::new().unwrap();
        let summary = MetadataComputer::new(PathFilter::default())
            .compute(dir.path())
            .unwrap();

        assert_eq!(summary.size_bytes, 0);
        assert_eq!(summary.file_count, 0);
        assert_eq!(summary.fingerprint, hex::encode(Sha256::digest(b"")));
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snapstream_core::{BackendType, ByteReader, Error, ObjectInfo, ObjectStore, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const PARTIAL_SUFFIX: &str = ".partial";

/// Stores objects as files under a root directory; key segments become
/// directories.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::Backend(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    /// Creates an empty temporary file next to `path`. Dropping it before
    /// `persist` removes it.
    async fn staging_file(&self, path: &Path) -> Result<tempfile::NamedTempFile> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Backend(format!("No parent directory for {}", path.display())))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;
        let staged = tempfile::Builder::new()
            .prefix(".")
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&parent)?;
        Ok(staged)
    }

    fn commit(staged: tempfile::NamedTempFile, path: &Path) -> Result<()> {
        staged
            .persist(path)
            .map_err(|e| {
                Error::Backend(format!("Failed to commit {}: {}", path.display(), e.error))
            })?;
        Ok(())
    }

    async fn collect(&self, dir: PathBuf, prefix: &str, out: &mut Vec<ObjectInfo>) -> Result<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                let Some(key) = self.key_of(&entry.path()) else {
                    continue;
                };
                if !key.starts_with(prefix) || key.ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(Into::into);
                out.push(ObjectInfo {
                    key,
                    size: metadata.len(),
                    modified,
                });
            }
        }
        Ok(())
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts?.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.full_path(key)?;
        let staged = self.staging_file(&path).await?;
        let mut file = fs::File::from_std(staged.reopen()?);
        file.write_all(&data)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;
        file.sync_all().await?;
        drop(file);
        Self::commit(staged, &path)
    }

    async fn put_stream(&self, key: &str, mut body: ByteReader) -> Result<u64> {
        let path = self.full_path(key)?;
        let staged = self.staging_file(&path).await?;
        let mut file = fs::File::from_std(staged.reopen()?);
        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;
        file.sync_all().await?;
        drop(file);
        Self::commit(staged, &path)?;
        debug!(key, bytes = written, "Stored streamed object");
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let data = fs::read(self.full_path(key)?)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", key, e)))?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        // walk from the deepest directory the prefix fully names
        let start = match prefix.rfind('/') {
            Some(i) => self.root.join(&prefix[..i]),
            None => self.root.clone(),
        };
        let mut objects = Vec::new();
        self.collect(start, prefix, &mut objects).await?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.full_path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Backend(format!("Failed to delete {}: {}", key, e))),
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

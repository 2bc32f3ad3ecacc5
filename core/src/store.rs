use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

/// A readable byte stream of unknown length.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Local,
    S3,
    Memory,
}

/// The object store capability shared by uploading, pruning and metadata
/// storage. Keys are full object keys relative to the bucket or root.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Stores everything `body` yields under `key`. The length is not known
    /// up front. Nothing is committed under `key` unless the whole stream was
    /// read successfully. Returns the number of bytes stored.
    async fn put_stream(&self, key: &str, body: ByteReader) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn backend_type(&self) -> BackendType;

    /// Human readable location, for logs.
    fn location(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

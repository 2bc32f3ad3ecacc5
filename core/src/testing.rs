//! In-memory doubles for the store and workload seams.

use crate::store::{BackendType, ByteReader, ObjectInfo, ObjectStore};
use crate::workload::Workload;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_stream_after: Mutex<Option<u64>>,
    fail_put: Mutex<bool>,
    fail_list: Mutex<bool>,
    fail_delete: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    cancel_after: Mutex<Option<(u64, CancellationToken)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Keys whose streamed upload failed and was cleaned up.
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Fires `token` once more than `bytes` have been streamed.
    pub fn cancel_after(&self, bytes: u64, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((bytes, token));
    }

    pub fn fail_stream_after(&self, bytes: u64) {
        *self.fail_stream_after.lock().unwrap() = Some(bytes);
    }

    pub fn fail_puts(&self) {
        *self.fail_put.lock().unwrap() = true;
    }

    pub fn fail_lists(&self) {
        *self.fail_list.lock().unwrap() = true;
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.fail_delete.lock().unwrap().insert(key.to_string());
    }

    async fn receive(&self, key: &str, body: &mut ByteReader) -> Result<Vec<u8>> {
        let limit = *self.fail_stream_after.lock().unwrap();
        let cancel = self.cancel_after.lock().unwrap().clone();
        let mut data = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&buf[..n]);
            if limit.is_some_and(|limit| data.len() as u64 > limit) {
                return Err(Error::Backend(format!("Failed to upload {}: connection reset", key)));
            }
            if let Some((after, token)) = &cancel {
                if data.len() as u64 > *after {
                    token.cancel();
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if *self.fail_put.lock().unwrap() {
            return Err(Error::Backend(format!("Failed to write {}: injected", key)));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn put_stream(&self, key: &str, mut body: ByteReader) -> Result<u64> {
        match self.receive(key, &mut body).await {
            Ok(data) => {
                let len = data.len() as u64;
                self.objects.lock().unwrap().insert(key.to_string(), Bytes::from(data));
                Ok(len)
            }
            Err(e) => {
                self.aborted.lock().unwrap().push(key.to_string());
                Err(e)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.object(key)
            .ok_or_else(|| Error::Backend(format!("Failed to read {}: not found", key)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        if *self.fail_list.lock().unwrap() {
            return Err(Error::Backend("Failed to list: injected".to_string()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                modified: Some(Utc::now()),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_delete.lock().unwrap().contains(key) {
            return Err(Error::Backend(format!("Failed to delete {}: injected", key)));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}

/// Records calls in order; `pause`/`resume` fail when told to.
#[derive(Default)]
pub struct RecordingWorkload {
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_pause: bool,
    pub fail_resume: bool,
}

impl RecordingWorkload {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Workload for RecordingWorkload {
    fn name(&self) -> &str {
        "test-node"
    }

    async fn pause(&self) -> Result<()> {
        self.calls.lock().unwrap().push("pause");
        if self.fail_pause {
            return Err(Error::Workload {
                name: "test-node".to_string(),
                action: "pause".to_string(),
                reason: "daemon unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.calls.lock().unwrap().push("resume");
        if self.fail_resume {
            return Err(Error::Workload {
                name: "test-node".to_string(),
                action: "resume".to_string(),
                reason: "container removed".to_string(),
            });
        }
        Ok(())
    }
}

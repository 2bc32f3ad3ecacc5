pub mod local;
pub mod retry;
pub mod s3;

pub use local::LocalStore;
pub use retry::{RetryConfig, Retryable, retry_with_backoff};
pub use s3::{S3Settings, S3Store};

use snapstream_core::config::{StorageConfig, StorageKind};
use snapstream_core::{Error, ObjectStore, Result};
use std::sync::Arc;
use tracing::warn;

/// Builds the store selected by `[storage]`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.kind {
        StorageKind::S3 => {
            let store = S3Store::new(S3Settings::from(config)).await?;
            match store.check_bucket().await {
                Ok(()) => {}
                // unreachable now may be reachable at the next run
                Err(Error::BackendUnavailable(message)) => {
                    warn!(bucket = %config.bucket, error = %message, "Bucket check failed")
                }
                Err(e) => return Err(e),
            }
            Ok(Arc::new(store))
        }
        StorageKind::Local => {
            let root = config.root.as_ref().ok_or_else(|| {
                Error::Config("storage.root is required for local storage".to_string())
            })?;
            let store = LocalStore::new(root);
            store.init().await?;
            Ok(Arc::new(store))
        }
    }
}

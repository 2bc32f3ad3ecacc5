use crate::Result;
use async_trait::async_trait;

/// The service whose data directory is snapshotted.
///
/// Both calls block until the workload reached the requested state. They are
/// not retried by the caller.
#[async_trait]
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;
}

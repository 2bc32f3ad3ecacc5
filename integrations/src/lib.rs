pub mod command;
pub mod docker;

pub use command::CommandWorkload;
pub use docker::DockerWorkload;

use async_trait::async_trait;
use snapstream_core::config::{WorkloadConfig, WorkloadKind};
use snapstream_core::{Result, Workload};
use std::sync::Arc;
use std::time::Duration;

/// For sources that can be read while live.
pub struct NoopWorkload;

#[async_trait]
impl Workload for NoopWorkload {
    fn name(&self) -> &str {
        "none"
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the workload selected by `[workload]`.
pub fn workload_from_config(config: &WorkloadConfig) -> Arc<dyn Workload> {
    match config.kind {
        WorkloadKind::Docker => Arc::new(DockerWorkload::new(
            config.name.clone(),
            Duration::from_secs(config.stop_timeout_secs),
        )),
        WorkloadKind::Command => Arc::new(CommandWorkload::new(
            config.name.clone(),
            config.pause_command.clone(),
            config.resume_command.clone(),
        )),
        WorkloadKind::None => Arc::new(NoopWorkload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builds_configured_workload() {
        let config: WorkloadConfig = toml::from_str(
            r#"
            kind = "docker"
            name = "nimiq-node"
            "#,
        )
        .unwrap();
        assert_eq!(workload_from_config(&config).name(), "nimiq-node");

        let none = workload_from_config(&toml::from_str::<WorkloadConfig>("").unwrap());
        assert_eq!(none.name(), "none");
        none.pause().await.unwrap();
        none.resume().await.unwrap();
    }
}

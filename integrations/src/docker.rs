use crate::command::run_checked;
use async_trait::async_trait;
use snapstream_core::{Error, Result, Workload};
use std::time::Duration;
use tracing::info;

/// A Docker container, driven through the `docker` CLI so that the daemon
/// socket and context configuration match what an operator would use.
pub struct DockerWorkload {
    container: String,
    stop_timeout: Duration,
    docker: String,
}

impl DockerWorkload {
    pub fn new(container: impl Into<String>, stop_timeout: Duration) -> Self {
        Self {
            container: container.into(),
            stop_timeout,
            docker: "docker".to_string(),
        }
    }

    /// Uses another docker-compatible binary, e.g. `podman`.
    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.docker.as_str())
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    /// Resolves the container name to its id; fails if there is no such
    /// container.
    pub async fn container_id(&self, action: &str) -> Result<String> {
        let id = run_checked(
            &self.container,
            action,
            &self.argv(&["inspect", "--format", "{{.Id}}", &self.container]),
        )
        .await?;
        if id.is_empty() {
            return Err(Error::Workload {
                name: self.container.clone(),
                action: action.to_string(),
                reason: "container not found".to_string(),
            });
        }
        Ok(id)
    }

    fn stop_args(&self) -> Vec<String> {
        let timeout = self.stop_timeout.as_secs().to_string();
        self.argv(&["stop", "-t", &timeout, &self.container])
    }

    fn start_args(&self) -> Vec<String> {
        self.argv(&["start", &self.container])
    }
}

#[async_trait]
impl Workload for DockerWorkload {
    fn name(&self) -> &str {
        &self.container
    }

    async fn pause(&self) -> Result<()> {
        let id = self.container_id("pause").await?;
        run_checked(&self.container, "pause", &self.stop_args()).await?;
        info!(container = %self.container, id = %id, "Container stopped");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        run_checked(&self.container, "resume", &self.start_args()).await?;
        info!(container = %self.container, "Container started");
        Ok(())
    }
}

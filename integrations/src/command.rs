use async_trait::async_trait;
use snapstream_core::{Error, Result, Workload};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `argv` to completion; a non-zero exit becomes `Error::Workload`
/// carrying the command's stderr.
pub(crate) async fn run_checked(name: &str, action: &str, argv: &[String]) -> Result<String> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::Workload {
        name: name.to_string(),
        action: action.to_string(),
        reason: "empty command".to_string(),
    })?;

    debug!(workload = name, action, command = %argv.join(" "), "Running workload command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Workload {
            name: name.to_string(),
            action: action.to_string(),
            reason: format!("failed to execute {}: {}", program, e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Workload {
            name: name.to_string(),
            action: action.to_string(),
            reason: format!("{} exited with {}: {}", program, output.status, stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A workload stopped and started by arbitrary commands, e.g. `systemctl`.
pub struct CommandWorkload {
    name: String,
    pause_command: Vec<String>,
    resume_command: Vec<String>,
}

impl CommandWorkload {
    pub fn new(
        name: impl Into<String>,
        pause_command: Vec<String>,
        resume_command: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pause_command,
            resume_command,
        }
    }
}

#[async_trait]
impl Workload for CommandWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pause(&self) -> Result<()> {
        run_checked(&self.name, "pause", &self.pause_command).await?;
        info!(workload = %self.name, "Workload paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        run_checked(&self.name, "resume", &self.resume_command).await?;
        info!(workload = %self.name, "Workload resumed");
        Ok(())
    }
}

use super::{build_orchestrator, cancel_on_signal};
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use snapstream_core::config::ScheduleConfig;
use snapstream_core::{Error, SnapshotOrchestrator};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Args)]
pub struct RunCommand {
    #[arg(long, help = "Override schedule.interval_secs")]
    interval_secs: Option<u64>,

    #[arg(long, help = "Take the first snapshot immediately")]
    now: bool,
}

/// When the next run is due.
enum Trigger {
    Interval(Interval),
    Daily(ScheduleConfig),
}

impl Trigger {
    async fn wait(&mut self) -> Result<()> {
        match self {
            Trigger::Interval(ticker) => {
                ticker.tick().await;
            }
            Trigger::Daily(schedule) => {
                let now = Utc::now();
                if let Some(next) = schedule.next_daily_run(now)? {
                    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                    info!(next = %next, "Next snapshot scheduled");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }
}

impl RunCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let orchestrator = build_orchestrator(&config).await?;

        let shutdown = CancellationToken::new();
        cancel_on_signal(shutdown.clone());

        // an explicit interval on the command line wins over daily_at
        let daily = self.interval_secs.is_none() && config.schedule.daily_at.is_some();
        let mut trigger = if daily {
            info!(at = ?config.schedule.daily_at, "Scheduler started (daily, UTC)");
            Trigger::Daily(config.schedule.clone())
        } else {
            let interval = Duration::from_secs(
                self.interval_secs.unwrap_or(config.schedule.interval_secs).max(1),
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick fires immediately
            ticker.tick().await;
            info!(interval_s = interval.as_secs(), "Scheduler started");
            Trigger::Interval(ticker)
        };

        if self.now || config.schedule.run_on_start {
            run_once(&orchestrator, &shutdown).await;
        }

        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                waited = trigger.wait() => waited?,
            }
            run_once(&orchestrator, &shutdown).await;
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_once(orchestrator: &SnapshotOrchestrator, shutdown: &CancellationToken) {
    match orchestrator.run(shutdown).await {
        Ok(report) if report.is_success() => {
            info!(snapshot = %report.key, "Scheduled snapshot complete");
        }
        Ok(report) => {
            let stages: Vec<String> =
                report.failed_stages().iter().map(|s| s.to_string()).collect();
            error!(snapshot = %report.key, stages = %stages.join(","), "Scheduled snapshot failed");
        }
        Err(Error::RunInProgress) => warn!("Previous snapshot still running, skipping this tick"),
        Err(e) => error!(error = %e, "Scheduled snapshot could not start"),
    }
}

use super::{build_orchestrator, cancel_on_signal, print_report};
use anyhow::Result;
use clap::Args;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct SnapshotCommand {
    #[arg(long, help = "Disable the progress spinner")]
    no_progress: bool,
}

impl SnapshotCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let orchestrator = build_orchestrator(&config).await?;

        let cancel = CancellationToken::new();
        cancel_on_signal(cancel.clone());

        let pb = if self.no_progress || cli.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?;
        pb.set_style(style);
        pb.set_message(format!("Snapshotting {}", config.source.path.display()));
        pb.enable_steady_tick(Duration::from_millis(120));

        let progress = orchestrator.progress();
        let ticker = {
            let pb = pb.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(250));
                loop {
                    interval.tick().await;
                    let uploaded = progress.load(Ordering::Relaxed);
                    if uploaded > 0 {
                        pb.set_message(format!("Uploaded {}", HumanBytes(uploaded)));
                    }
                }
            })
        };

        let report = orchestrator.run(&cancel).await;
        ticker.abort();
        pb.finish_and_clear();

        let report = report?;
        print_report(&report);
        report.into_result()?;
        Ok(())
    }
}

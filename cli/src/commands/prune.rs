use anyhow::{Result, bail};
use clap::Args;
use snapstream_backends::open_store;
use snapstream_core::{RetentionPruner, key_prefix};

#[derive(Args)]
pub struct PruneCommand {
    #[arg(long, help = "Show what would be deleted without deleting")]
    dry_run: bool,

    #[arg(long, help = "Override retention.keep")]
    keep: Option<usize>,
}

impl PruneCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let store = open_store(&config.storage).await?;
        let keep = self.keep.unwrap_or(config.retention.keep);
        let pruner = RetentionPruner::new(store, keep)
            .with_dry_run(self.dry_run || config.retention.dry_run);

        let prefix = key_prefix(&config.snapshot.category, &config.snapshot.environment);
        let mut failed = 0;
        for (class, result) in pruner.prune_all(&prefix).await {
            match result {
                Ok(report) => {
                    let verb = if report.dry_run { "would delete" } else { "deleted" };
                    println!(
                        "{}: kept {}, {} {}",
                        class,
                        report.kept.len(),
                        verb,
                        report.deleted.len()
                    );
                    for key in &report.deleted {
                        println!("  - {}", key);
                    }
                }
                Err(e) => {
                    failed += 1;
                    println!("{}: {}", class, e);
                }
            }
        }

        if failed > 0 {
            bail!("Retention failed for {} object class(es)", failed);
        }
        Ok(())
    }
}

use anyhow::{Context, Result};
use clap::Args;
use snapstream_backends::open_store;
use snapstream_core::{LATEST_METADATA_NAME, SnapshotRecord, key_prefix};

#[derive(Args)]
pub struct LatestCommand {
    #[arg(long, help = "Print a one-line summary instead of the JSON record")]
    short: bool,
}

impl LatestCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let store = open_store(&config.storage).await?;

        let key = format!(
            "{}{}",
            key_prefix(&config.snapshot.category, &config.snapshot.environment),
            LATEST_METADATA_NAME
        );
        let data = store.get(&key).await.with_context(|| format!("No latest snapshot at {}", key))?;
        let record = SnapshotRecord::from_slice(&data)?;

        if self.short {
            println!("{}", record.summary());
        } else {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Ok(())
    }
}

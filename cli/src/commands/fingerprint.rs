use anyhow::{Result, anyhow};
use clap::Args;
use snapstream_core::MetadataComputer;
use snapstream_core::filter::PathFilter;
use std::path::PathBuf;

#[derive(Args)]
pub struct FingerprintCommand {
    #[arg(help = "Directory to fingerprint (defaults to source.path from the config)")]
    path: Option<PathBuf>,

    #[arg(long, help = "Base names to ignore (defaults to source.ignore from the config)")]
    ignore: Vec<String>,
}

impl FingerprintCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let (path, filter) = match &self.path {
            Some(path) => (path.clone(), PathFilter::new(&self.ignore)),
            None => {
                let config = cli.load_config()?;
                let filter = if self.ignore.is_empty() {
                    config.source.filter()
                } else {
                    PathFilter::new(&self.ignore)
                };
                (config.source.path, filter)
            }
        };

        let computer = MetadataComputer::new(filter);
        let root = path.clone();
        let summary = tokio::task::spawn_blocking(move || computer.compute(&root))
            .await
            .map_err(|e| anyhow!("Fingerprint task failed: {}", e))??;

        println!("path:        {}", path.display());
        println!("files:       {}", summary.file_count);
        println!(
            "size:        {} ({} bytes)",
            indicatif::HumanBytes(summary.size_bytes),
            summary.size_bytes
        );
        println!("fingerprint: {}", summary.fingerprint);
        Ok(())
    }
}

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{
    fingerprint::FingerprintCommand, latest::LatestCommand, list::ListCommand, prune::PruneCommand,
    run::RunCommand, snapshot::SnapshotCommand,
};
use directories::ProjectDirs;
use snapstream_core::Config;
use snapstream_core::config::LegacyConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "snapstream",
    version,
    about = "Streaming snapshots of service data directories to object storage",
    long_about = "Snapstream stops a service, streams its data directory as a tar.gz straight into \
                  object storage, restarts the service and keeps the newest N snapshots"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short,
        env = "SNAPSTREAM_CONFIG",
        help = "Config file (TOML, or JSON with a .json extension)"
    )]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Take snapshots on the configured schedule until interrupted")]
    Run(RunCommand),

    #[command(about = "Take one snapshot now")]
    Snapshot(SnapshotCommand),

    #[command(about = "Apply the retention policy without taking a snapshot")]
    Prune(PruneCommand),

    #[command(about = "List stored snapshots")]
    List(ListCommand),

    #[command(about = "Print the record of the latest successful snapshot")]
    Latest(LatestCommand),

    #[command(about = "Compute size and content fingerprint of a directory")]
    Fingerprint(FingerprintCommand),
}

impl Cli {
    /// Loads, env-overrides and validates the config. Without `--config` the
    /// platform config file is used; when that does not exist either, a flat
    /// config is read from `CONTAINER_NAME`, `FILE_PATH` and `BUCKET_NAME`.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None => {
                let path = default_config_path()
                    .context("No --config given and no config directory for this platform")?;
                match LegacyConfig::from_env(|key| std::env::var(key).ok()) {
                    Some(legacy) if !path.exists() => {
                        info!("No config file, using CONTAINER_NAME/FILE_PATH/BUCKET_NAME");
                        Config::from(legacy)
                    }
                    _ => load_file(&path)?,
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
}

fn load_file(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "Loading config");
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "snapstream").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting snapstream");

    match cli.command {
        Commands::Run(ref cmd) => cmd.run(&cli).await,
        Commands::Snapshot(ref cmd) => cmd.run(&cli).await,
        Commands::Prune(ref cmd) => cmd.run(&cli).await,
        Commands::List(ref cmd) => cmd.run(&cli).await,
        Commands::Latest(ref cmd) => cmd.run(&cli).await,
        Commands::Fingerprint(ref cmd) => cmd.run(&cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let crates = [
            "snapstream",
            "snapstream_core",
            "snapstream_backends",
            "snapstream_integrations",
        ];
        let directives: Vec<String> = crates.iter().map(|c| format!("{c}={level}")).collect();
        EnvFilter::new(directives.join(","))
    });
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default subscriber failed")?;
    Ok(())
}

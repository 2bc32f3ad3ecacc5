pub mod fingerprint;
pub mod latest;
pub mod list;
pub mod prune;
pub mod run;
pub mod snapshot;

use anyhow::Result;
use snapstream_backends::open_store;
use snapstream_core::{Config, RunReport, SnapshotOrchestrator};
use snapstream_integrations::workload_from_config;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn build_orchestrator(config: &Config) -> Result<SnapshotOrchestrator> {
    let store = open_store(&config.storage).await?;
    let workload = workload_from_config(&config.workload);
    info!(
        store = %store.location(),
        workload = workload.name(),
        source = %config.source.path.display(),
        "Snapshot target ready"
    );
    Ok(SnapshotOrchestrator::new(config, store, workload))
}

pub fn print_report(report: &RunReport) {
    println!("Snapshot {}: {}", report.key, report.status());
    if let Some(outcome) = &report.archive {
        println!(
            "  archive:  {} ({} entries, {} uploaded)",
            report.key.archive_key(),
            outcome.archive.entries,
            indicatif::HumanBytes(outcome.uploaded_bytes)
        );
    }
    if let Some(record) = &report.record {
        println!("  record:   {}", record.summary());
    }
    for pruned in &report.pruned {
        if !pruned.deleted.is_empty() {
            println!(
                "  pruned {} {}: {}",
                pruned.deleted.len(),
                pruned.class,
                pruned.deleted.join(", ")
            );
        }
    }
    for failure in &report.failures {
        println!("  {} failed: {}", failure.stage, failure.error);
    }
    println!("  took {:.1}s", report.duration.as_secs_f64());
}

/// Cancels `token` on SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use indicatif::HumanBytes;
use serde::Serialize;
use snapstream_backends::open_store;
use snapstream_core::{ObjectClass, ObjectInfo, format_timestamp, key_prefix};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Args)]
pub struct ListCommand {
    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
struct ListedSnapshot {
    timestamp: String,
    archive: Option<String>,
    archive_bytes: Option<u64>,
    metadata: Option<String>,
}

/// Pairs archives and records by the timestamp in their keys. Keys that do
/// not parse are reported and skipped.
fn group(prefix: &str, objects: Vec<ObjectInfo>) -> Vec<ListedSnapshot> {
    let mut snapshots: BTreeMap<DateTime<Utc>, ListedSnapshot> = BTreeMap::new();
    for object in objects {
        for class in ObjectClass::ALL {
            match class.timestamp_of(prefix, &object.key) {
                Ok(Some(timestamp)) => {
                    let entry = snapshots.entry(timestamp).or_insert_with(|| ListedSnapshot {
                        timestamp: format_timestamp(&timestamp),
                        ..Default::default()
                    });
                    match class {
                        ObjectClass::Archive => {
                            entry.archive = Some(object.key.clone());
                            entry.archive_bytes = Some(object.size);
                        }
                        ObjectClass::Metadata => entry.metadata = Some(object.key.clone()),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(key = %object.key, error = %e, "Skipping foreign object"),
            }
        }
    }
    snapshots.into_values().collect()
}

impl ListCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let store = open_store(&config.storage).await?;
        let prefix = key_prefix(&config.snapshot.category, &config.snapshot.environment);

        let snapshots = group(&prefix, store.list(&prefix).await?);

        if self.format.as_deref() == Some("json") {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
            return Ok(());
        }

        if snapshots.is_empty() {
            println!("No snapshots found under {}{}", store.location(), prefix);
            return Ok(());
        }

        println!("{:<17} {:>12}  {}", "TIMESTAMP", "ARCHIVE", "RECORD");
        for snapshot in &snapshots {
            let size = match snapshot.archive_bytes {
                Some(bytes) => HumanBytes(bytes).to_string(),
                None => "missing".to_string(),
            };
            let record = if snapshot.metadata.is_some() { "yes" } else { "no" };
            println!("{:<17} {:>12}  {}", snapshot.timestamp, size, record);
        }
        println!("{} snapshot(s) in {}{}", snapshots.len(), store.location(), prefix);
        Ok(())
    }
}

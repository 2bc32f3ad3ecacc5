use crate::store::ObjectStore;
use crate::types::{ObjectClass, format_timestamp};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub class: ObjectClass,
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub dry_run: bool,
}

/// Keeps the newest `keep` objects of each class under a prefix.
///
/// Ordering comes from the timestamp embedded in each key, never from the
/// store's own modification times.
pub struct RetentionPruner {
    store: Arc<dyn ObjectStore>,
    keep: usize,
    dry_run: bool,
}

impl RetentionPruner {
    pub fn new(store: Arc<dyn ObjectStore>, keep: usize) -> Self {
        Self {
            store,
            keep,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub async fn prune(&self, prefix: &str, class: ObjectClass) -> Result<PruneReport> {
        if self.keep == 0 {
            return Err(Error::Config("refusing to prune with keep = 0".to_string()));
        }

        let listing = self.store.list(prefix).await?;

        let mut snapshots: Vec<(DateTime<Utc>, String)> = Vec::new();
        for object in listing {
            if let Some(timestamp) = class.timestamp_of(prefix, &object.key)? {
                snapshots.push((timestamp, object.key));
            }
        }
        snapshots.sort();

        let excess = snapshots.len().saturating_sub(self.keep);
        let kept: Vec<String> = snapshots[excess..].iter().map(|(_, key)| key.clone()).collect();
        let doomed = &snapshots[..excess];

        debug!(
            prefix,
            %class,
            found = snapshots.len(),
            keep = self.keep,
            "Evaluated retention"
        );

        if self.dry_run {
            for (timestamp, key) in doomed {
                info!(key, timestamp = %format_timestamp(timestamp), "Would delete (dry run)");
            }
            return Ok(PruneReport {
                class,
                kept,
                deleted: doomed.iter().map(|(_, key)| key.clone()).collect(),
                dry_run: true,
            });
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for (_, key) in doomed {
            match self.store.delete(key).await {
                Ok(()) => {
                    info!(key, %class, "Deleted expired snapshot object");
                    deleted.push(key.clone());
                }
                Err(e) => {
                    warn!(key, error = %e, "Failed to delete expired snapshot object");
                    failed.push(key.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Err(Error::PruneIncomplete { failed });
        }

        Ok(PruneReport {
            class,
            kept,
            deleted,
            dry_run: false,
        })
    }

    /// Prunes every class independently; one class failing does not stop the
    /// others.
    pub async fn prune_all(&self, prefix: &str) -> Vec<(ObjectClass, Result<PruneReport>)> {
        let mut results = Vec::new();
        for class in ObjectClass::ALL {
            results.push((class, self.prune(prefix, class).await));
        }
        results
    }
}

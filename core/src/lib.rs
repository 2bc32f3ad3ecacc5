pub mod archive;
pub mod config;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod orchestrator;
pub mod pipe;
pub mod pipeline;
pub mod prune;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod walk;
pub mod workload;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use metadata::{MetadataComputer, SourceSummary};
pub use orchestrator::{RunReport, SnapshotOrchestrator, Stage};
pub use prune::{PruneReport, RetentionPruner};
pub use snapshot::{SnapshotRecord, SnapshotStatus};
pub use store::{BackendType, ByteReader, ObjectInfo, ObjectStore};
pub use types::*;
pub use workload::Workload;

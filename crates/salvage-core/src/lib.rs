//! Export engine for forensically recovered FATX directory trees.
//!
//! An upstream volume parser hands over fully-built [`RecoveryNode`]
//! trees — plus orphaned cluster chains grouped under synthetic labels
//! — and a cluster-addressable view of the volume. This crate turns
//! them into real files and directories on a destination filesystem,
//! reconstructing contents from cluster chains, applying recovered
//! timestamps, retrying per-node I/O failures without losing overall
//! progress, and honoring cooperative cancellation.

pub mod cluster;
pub mod error;
pub mod export;
pub mod manifest;
pub mod node;

pub use cluster::{ClusterSource, ImageClusterSource, MemoryClusterSource, FIRST_DATA_CLUSTER};
pub use error::ExportError;
pub use export::progress::{ProgressEvent, ProgressSink};
pub use export::retry::{
    DecisionProvider, FailureReport, LimitedRetry, NeverRetry, RetryDecision,
};
pub use export::{
    CancelFlag, ExportEngine, ExportOptions, ExportSummary, ExportTask, NodeOutcome, NodeReport,
};
pub use manifest::{RecoveryManifest, VolumeInfo};
pub use node::{count_entries, RecoveryNode};

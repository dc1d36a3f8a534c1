//! In-memory model of recovered FATX directory entries.
//!
//! Trees are built entirely by the upstream volume parser before an
//! export starts. The export engine treats them as read-only input:
//! ownership stays with the caller for the whole call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recovered file or directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryNode {
    /// Entry name as recovered; may be empty for unattached entries.
    pub name: String,
    pub is_directory: bool,
    /// Total byte length for files; ignored for directories.
    #[serde(default)]
    pub file_size: u64,
    /// Cluster indices in concatenation order; empty for directories.
    #[serde(default)]
    pub cluster_chain: Vec<u32>,
    /// Head of the chain, probed for readability before writing.
    #[serde(default)]
    pub first_cluster: u32,
    /// `None` when the recovered metadata was corrupt or sentinel.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accessed: Option<DateTime<Utc>>,
    /// Insertion order is preserved and determines on-disk write order.
    #[serde(default)]
    pub children: Vec<RecoveryNode>,
}

impl RecoveryNode {
    /// Build a file entry. The chain head becomes `first_cluster`.
    pub fn file(name: impl Into<String>, file_size: u64, cluster_chain: Vec<u32>) -> Self {
        let first_cluster = cluster_chain.first().copied().unwrap_or(0);
        RecoveryNode {
            name: name.into(),
            is_directory: false,
            file_size,
            cluster_chain,
            first_cluster,
            created: None,
            modified: None,
            accessed: None,
            children: Vec::new(),
        }
    }

    /// Build a directory entry with its children in write order.
    pub fn directory(name: impl Into<String>, children: Vec<RecoveryNode>) -> Self {
        RecoveryNode {
            name: name.into(),
            is_directory: true,
            file_size: 0,
            cluster_chain: Vec::new(),
            first_cluster: 0,
            created: None,
            modified: None,
            accessed: None,
            children,
        }
    }

    /// Name the entry takes on disk. Entries recovered without a name
    /// fall back to a cluster-derived label.
    pub fn disk_name(&self) -> String {
        if self.name.is_empty() {
            format!("cluster{}", self.first_cluster)
        } else {
            self.name.clone()
        }
    }
}

/// Total count of exportable entries under `nodes`: a directory counts
/// as one entry plus its recursive children, a file as one.
///
/// This must match exactly the number of progress events the export
/// engine emits for the same input; the denominator is fixed once at
/// the start of a call and never recomputed.
pub fn count_entries(nodes: &[RecoveryNode]) -> u64 {
    nodes
        .iter()
        .map(|node| 1 + count_entries(&node.children))
        .sum()
}

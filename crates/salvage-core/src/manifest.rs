//! Interchange format between the upstream volume parser and the
//! export engine.
//!
//! The parser serializes everything it recovered — attached trees plus
//! orphaned cluster chains under synthetic labels — into one JSON
//! document alongside the volume geometry needed to read clusters.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::node::{count_entries, RecoveryNode};

/// Volume geometry for cluster reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Bytes per cluster, constant for the volume.
    pub cluster_size: u32,
    /// Byte offset of the first data cluster within the image.
    #[serde(default)]
    pub data_offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryManifest {
    pub volume: VolumeInfo,
    /// Trees attached to a recovered directory structure.
    #[serde(default)]
    pub roots: Vec<RecoveryNode>,
    /// Orphaned cluster chains keyed by synthetic label, e.g.
    /// "Cluster4544".
    #[serde(default)]
    pub orphans: BTreeMap<String, Vec<RecoveryNode>>,
}

impl RecoveryManifest {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening manifest {}", path.display()))?;
        let manifest = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        Ok(manifest)
    }

    /// Exportable entries across roots and orphan groups; this is the
    /// progress denominator for a whole-manifest export.
    pub fn entry_count(&self) -> u64 {
        count_entries(&self.roots)
            + self
                .orphans
                .values()
                .map(|roots| count_entries(roots))
                .sum::<u64>()
    }
}

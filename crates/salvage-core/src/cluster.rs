//! Cluster-level access to FATX volume images.
//!
//! FATX stores file contents as ordered chains of fixed-size clusters
//! inside the data region; data clusters are numbered from 1.

use anyhow::Result;
use memmap2::MmapOptions;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// FATX numbers data clusters starting at 1.
pub const FIRST_DATA_CLUSTER: u32 = 1;

/// Maps a cluster index to its raw bytes.
///
/// A read returns exactly `cluster_size()` bytes or fails: out-of-range
/// indices and unreadable media both surface as errors, never as short
/// reads.
pub trait ClusterSource {
    /// Bytes per cluster, constant for the volume.
    fn cluster_size(&self) -> u32;

    /// Raw contents of one cluster.
    fn read_cluster(&self, index: u32) -> Result<Vec<u8>>;
}

/// A memory-mapped volume image exposed as clusters.
pub struct ImageClusterSource {
    _file: File,
    mmap: memmap2::Mmap,
    data_offset: u64,
    cluster_size: u32,
}

impl ImageClusterSource {
    /// Open an image file; `data_offset` is the byte position of the
    /// first data cluster within the image.
    pub fn open<P: AsRef<Path>>(path: P, data_offset: u64, cluster_size: u32) -> Result<Self> {
        if cluster_size == 0 {
            anyhow::bail!("cluster size must be non-zero");
        }

        let file = File::open(path.as_ref())?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        tracing::debug!(
            "opened image {} ({} bytes, data region at 0x{:x}, {} byte clusters)",
            path.as_ref().display(),
            mmap.len(),
            data_offset,
            cluster_size
        );

        Ok(ImageClusterSource {
            _file: file,
            mmap,
            data_offset,
            cluster_size,
        })
    }
}

impl ClusterSource for ImageClusterSource {
    fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    fn read_cluster(&self, index: u32) -> Result<Vec<u8>> {
        if index < FIRST_DATA_CLUSTER {
            anyhow::bail!("cluster {} is below the data region", index);
        }

        let start = self.data_offset
            + (index - FIRST_DATA_CLUSTER) as u64 * self.cluster_size as u64;
        let end = start + self.cluster_size as u64;

        if end > self.mmap.len() as u64 {
            anyhow::bail!(
                "cluster {} extends beyond end of image: {} > {}",
                index,
                end,
                self.mmap.len()
            );
        }

        Ok(self.mmap[start as usize..end as usize].to_vec())
    }
}

/// An in-memory cluster map for tests and tooling.
///
/// Inserted payloads shorter than the cluster size are zero-padded, so
/// a read always yields a full cluster.
pub struct MemoryClusterSource {
    clusters: HashMap<u32, Vec<u8>>,
    cluster_size: u32,
}

impl MemoryClusterSource {
    pub fn new(cluster_size: u32) -> Self {
        MemoryClusterSource {
            clusters: HashMap::new(),
            cluster_size,
        }
    }

    pub fn insert(&mut self, index: u32, data: &[u8]) {
        let mut cluster = data.to_vec();
        cluster.resize(self.cluster_size as usize, 0);
        self.clusters.insert(index, cluster);
    }
}

impl ClusterSource for MemoryClusterSource {
    fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    fn read_cluster(&self, index: u32) -> Result<Vec<u8>> {
        self.clusters
            .get(&index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("cluster {} is not present in source", index))
    }
}

//! Materializes file contents from cluster chains and applies
//! recovered timestamps to exported entries.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;

use crate::cluster::ClusterSource;
use crate::error::ExportError;
use crate::node::RecoveryNode;

/// Write a file's content from its cluster chain.
///
/// Each cluster is read in chain order and `min(remaining,
/// cluster_size)` bytes from its start are written, so the last cluster
/// is partially used when the size is not a cluster multiple. A chain
/// too short to cover `file_size` leaves a truncated file and is
/// reported through the returned byte count, not as an error.
pub fn write_file_from_chain(
    path: &Path,
    file_size: u64,
    chain: &[u32],
    source: &dyn ClusterSource,
) -> Result<u64, ExportError> {
    let mut file = File::create(path).map_err(|e| ExportError::destination(path, e))?;
    let cluster_size = source.cluster_size() as u64;
    let mut remaining = file_size;

    for &index in chain {
        if remaining == 0 {
            break;
        }

        let data = source
            .read_cluster(index)
            .map_err(|cause| ExportError::MediaRead { index, cause })?;

        let take = remaining.min(cluster_size).min(data.len() as u64) as usize;
        file.write_all(&data[..take])
            .map_err(|e| ExportError::destination(path, e))?;
        remaining -= take as u64;
    }

    file.flush().map_err(|e| ExportError::destination(path, e))?;

    let written = file_size - remaining;
    if written < file_size {
        tracing::warn!(
            "chain for {} covers {} of {} bytes; output truncated",
            path.display(),
            written,
            file_size
        );
    }

    Ok(written)
}

/// Apply recovered timestamps to an exported file or directory.
///
/// Invalid/missing stamps keep the filesystem default. Creation time is
/// not portably settable, so last-write and last-access carry the
/// recovered metadata.
pub fn apply_timestamps(path: &Path, node: &RecoveryNode) -> Result<(), ExportError> {
    if let Some(accessed) = node.accessed {
        filetime::set_file_atime(path, to_file_time(accessed))
            .map_err(|e| ExportError::destination(path, e))?;
    }
    if let Some(modified) = node.modified {
        filetime::set_file_mtime(path, to_file_time(modified))
            .map_err(|e| ExportError::destination(path, e))?;
    }
    Ok(())
}

fn to_file_time(ts: DateTime<Utc>) -> FileTime {
    FileTime::from_unix_time(ts.timestamp(), ts.timestamp_subsec_nanos())
}

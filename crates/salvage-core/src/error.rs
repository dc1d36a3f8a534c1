//! Error taxonomy for the export engine.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures that can end a node's write or the whole export call.
///
/// A cluster chain shorter than the recorded file size is not an error:
/// it yields a truncated file and an `Incomplete` node outcome.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A cluster could not be read from the source media.
    #[error("cluster {index} could not be read: {cause}")]
    MediaRead { index: u32, cause: anyhow::Error },

    /// File/directory creation, write, or timestamp application failed
    /// at the destination.
    #[error("destination I/O failed at {path}: {source}")]
    DestinationIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller raised the cancellation signal; already-written nodes
    /// stay on disk.
    #[error("export cancelled after {nodes_done} entries")]
    Cancelled { nodes_done: u64 },

    /// An Abort decision ended the run (only with `abort_cancels_run`).
    #[error("export stopped by abort decision at {path}")]
    Aborted { path: PathBuf },

    /// The dedicated export worker panicked before producing a result.
    #[error("export worker panicked")]
    WorkerPanicked,
}

impl ExportError {
    pub(crate) fn destination(path: &Path, source: std::io::Error) -> Self {
        ExportError::DestinationIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

//! Recovery export engine.
//!
//! Walks recovered [`RecoveryNode`] trees depth-first and writes them
//! to a destination directory: file contents come from the cluster
//! source, timestamps from the recovered metadata. Per-node I/O
//! failures go through the retry loop and never unwind the traversal
//! on their own; cancellation is polled at node boundaries and unwinds
//! the whole call.

pub mod progress;
pub mod retry;
pub mod writer;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterSource;
use crate::error::ExportError;
use crate::manifest::RecoveryManifest;
use crate::node::{count_entries, RecoveryNode};
use progress::{ProgressEvent, ProgressSink};
use retry::{with_retry, Attempt, DecisionProvider, NeverRetry};
use writer::{apply_timestamps, write_file_from_chain};

/// Cooperative cancellation signal, polled after each node's work
/// completes. An in-flight single-file write always finishes before
/// cancellation takes effect.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// When true, an Abort decision cancels the remainder of the run
    /// instead of skipping just the failing entry.
    pub abort_cancels_run: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            abort_cancels_run: false,
        }
    }
}

/// Final state of one visited entry. Every entry ends in exactly one
/// of these; none is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOutcome {
    /// Fully written, timestamps applied where valid.
    Written,
    /// Chain was shorter than the recorded size; truncated output.
    Incomplete { bytes_written: u64, expected: u64 },
    /// Given up after an Abort decision; whatever was written stays.
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub path: PathBuf,
    pub is_directory: bool,
    pub outcome: NodeOutcome,
}

/// Post-run summary of an export call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total_entries: u64,
    pub written: u64,
    pub incomplete: u64,
    pub abandoned: u64,
    pub bytes_written: u64,
    /// One report per visited entry, in completion order. Directories
    /// complete after their descendants.
    pub nodes: Vec<NodeReport>,
}

/// Call-scoped mutable state: the saved counter and per-node reports
/// never outlive one export call, so sequential calls share nothing.
struct ExportContext {
    total: u64,
    saved: u64,
    bytes_written: u64,
    nodes: Vec<NodeReport>,
}

impl ExportContext {
    fn new(total: u64) -> Self {
        ExportContext {
            total,
            saved: 0,
            bytes_written: 0,
            nodes: Vec::new(),
        }
    }

    fn record(&mut self, path: PathBuf, is_directory: bool, outcome: NodeOutcome) {
        self.nodes.push(NodeReport {
            path,
            is_directory,
            outcome,
        });
    }

    fn into_summary(self) -> ExportSummary {
        let mut written = 0;
        let mut incomplete = 0;
        let mut abandoned = 0;
        for report in &self.nodes {
            match report.outcome {
                NodeOutcome::Written => written += 1,
                NodeOutcome::Incomplete { .. } => incomplete += 1,
                NodeOutcome::Abandoned => abandoned += 1,
            }
        }
        ExportSummary {
            total_entries: self.total,
            written,
            incomplete,
            abandoned,
            bytes_written: self.bytes_written,
            nodes: self.nodes,
        }
    }
}

/// Walks recovered trees and writes them below a destination path.
pub struct ExportEngine<S> {
    source: S,
    decisions: Box<dyn DecisionProvider>,
    progress: Option<Box<dyn ProgressSink>>,
    cancel: CancelFlag,
    options: ExportOptions,
}

impl<S: ClusterSource> ExportEngine<S> {
    pub fn new(source: S) -> Self {
        ExportEngine {
            source,
            decisions: Box::new(NeverRetry),
            progress: None,
            cancel: CancelFlag::new(),
            options: ExportOptions::default(),
        }
    }

    pub fn set_decision_provider(&mut self, provider: impl DecisionProvider + 'static) {
        self.decisions = Box::new(provider);
    }

    pub fn set_progress_sink(&mut self, sink: impl ProgressSink + 'static) {
        self.progress = Some(Box::new(sink));
    }

    pub fn set_options(&mut self, options: ExportOptions) {
        self.options = options;
    }

    /// Handle the caller keeps to request cancellation from another
    /// thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Export one node (file or directory) and everything beneath it.
    pub fn export_node(
        &self,
        root: &RecoveryNode,
        destination: &Path,
    ) -> Result<ExportSummary, ExportError> {
        self.export_roots(std::slice::from_ref(root), destination)
    }

    /// Export an ordered list of roots under one destination. The
    /// progress denominator is fixed over the whole list before any
    /// entry is touched.
    pub fn export_roots(
        &self,
        roots: &[RecoveryNode],
        destination: &Path,
    ) -> Result<ExportSummary, ExportError> {
        let total = count_entries(roots);
        tracing::info!(
            "exporting {} entries to {}",
            total,
            destination.display()
        );

        let mut ctx = ExportContext::new(total);
        self.ensure_destination(destination)?;
        for root in roots {
            self.visit(root, destination, &mut ctx)?;
        }
        Ok(ctx.into_summary())
    }

    /// Export named cluster groups: each group gets a container
    /// subdirectory `<destination>/<label>` holding its roots. Group
    /// labels are caller-supplied, typically cluster-derived (e.g.
    /// "Cluster4544") when no real parent directory could be
    /// determined.
    pub fn export_groups(
        &self,
        groups: &BTreeMap<String, Vec<RecoveryNode>>,
        destination: &Path,
    ) -> Result<ExportSummary, ExportError> {
        let total = groups.values().map(|roots| count_entries(roots)).sum();
        tracing::info!(
            "exporting {} entries in {} groups to {}",
            total,
            groups.len(),
            destination.display()
        );

        let mut ctx = ExportContext::new(total);
        self.ensure_destination(destination)?;
        self.export_group_set(groups, destination, &mut ctx)?;
        Ok(ctx.into_summary())
    }

    /// Export a whole manifest — attached roots plus orphan groups —
    /// under one combined progress denominator.
    pub fn export_manifest(
        &self,
        manifest: &RecoveryManifest,
        destination: &Path,
    ) -> Result<ExportSummary, ExportError> {
        let total = manifest.entry_count();
        tracing::info!(
            "exporting manifest ({} entries, {} orphan groups) to {}",
            total,
            manifest.orphans.len(),
            destination.display()
        );

        let mut ctx = ExportContext::new(total);
        self.ensure_destination(destination)?;
        for root in &manifest.roots {
            self.visit(root, destination, &mut ctx)?;
        }
        self.export_group_set(&manifest.orphans, destination, &mut ctx)?;
        Ok(ctx.into_summary())
    }

    /// The destination root is a call precondition, not a counted
    /// entry; failure here fails the call before any traversal.
    fn ensure_destination(&self, destination: &Path) -> Result<(), ExportError> {
        fs::create_dir_all(destination).map_err(|e| ExportError::destination(destination, e))
    }

    fn export_group_set(
        &self,
        groups: &BTreeMap<String, Vec<RecoveryNode>>,
        destination: &Path,
        ctx: &mut ExportContext,
    ) -> Result<(), ExportError> {
        for (label, roots) in groups {
            let group_dir = destination.join(label);

            // Container only: not a counted entry, no progress event.
            let created = matches!(
                with_retry(self.decisions.as_ref(), &group_dir, || {
                    fs::create_dir_all(&group_dir)
                        .map_err(|e| ExportError::destination(&group_dir, e))
                }),
                Attempt::Completed(())
            );
            if !created {
                if self.options.abort_cancels_run {
                    return Err(ExportError::Aborted { path: group_dir });
                }
                tracing::warn!("group container {} abandoned", group_dir.display());
            }

            for root in roots {
                self.visit(root, &group_dir, ctx)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: &RecoveryNode,
        parent: &Path,
        ctx: &mut ExportContext,
    ) -> Result<(), ExportError> {
        let name = node.disk_name();
        let path = parent.join(&name);

        // Cheap readability probe on the chain head. Unreadable media
        // shows up here early; the actual write still governs the
        // node's outcome.
        if !node.is_directory {
            if let Some(&head) = node.cluster_chain.first() {
                if let Err(err) = self.source.read_cluster(head) {
                    tracing::warn!(
                        "first cluster {} of {} unreadable: {}",
                        head,
                        path.display(),
                        err
                    );
                }
            }
        }

        ctx.saved += 1;
        self.emit_progress(ctx, &name);

        let outcome = if node.is_directory {
            self.visit_directory(node, &path, ctx)?
        } else {
            self.visit_file(node, &path, ctx)
        };

        let was_abandoned = matches!(outcome, NodeOutcome::Abandoned);
        ctx.record(path.clone(), node.is_directory, outcome);

        if was_abandoned && self.options.abort_cancels_run {
            return Err(ExportError::Aborted { path });
        }

        if self.cancel.is_requested() {
            tracing::info!(
                "cancellation observed after {} of {} entries",
                ctx.saved,
                ctx.total
            );
            return Err(ExportError::Cancelled {
                nodes_done: ctx.saved,
            });
        }

        Ok(())
    }

    fn visit_directory(
        &self,
        node: &RecoveryNode,
        path: &Path,
        ctx: &mut ExportContext,
    ) -> Result<NodeOutcome, ExportError> {
        let created = matches!(
            with_retry(self.decisions.as_ref(), path, || {
                fs::create_dir_all(path).map_err(|e| ExportError::destination(path, e))
            }),
            Attempt::Completed(())
        );

        if !created && self.options.abort_cancels_run {
            // The run is ending; visit() turns this into Aborted.
            return Ok(NodeOutcome::Abandoned);
        }

        // Children are visited even under an abandoned container so
        // the saved counter stays in step with the precomputed total.
        for child in &node.children {
            self.visit(child, path, ctx)?;
        }

        if !created {
            return Ok(NodeOutcome::Abandoned);
        }

        // Stamped after the children pass: writing children would
        // disturb an earlier directory mtime.
        match with_retry(self.decisions.as_ref(), path, || {
            apply_timestamps(path, node)
        }) {
            Attempt::Completed(()) => Ok(NodeOutcome::Written),
            Attempt::Abandoned => Ok(NodeOutcome::Abandoned),
        }
    }

    fn visit_file(&self, node: &RecoveryNode, path: &Path, ctx: &mut ExportContext) -> NodeOutcome {
        // Content write and timestamp application retry as one unit: a
        // stamp failure re-runs the whole sequence.
        let attempt = with_retry(self.decisions.as_ref(), path, || {
            let written =
                write_file_from_chain(path, node.file_size, &node.cluster_chain, &self.source)?;
            apply_timestamps(path, node)?;
            Ok(written)
        });

        match attempt {
            Attempt::Completed(written) => {
                ctx.bytes_written += written;
                if written < node.file_size {
                    NodeOutcome::Incomplete {
                        bytes_written: written,
                        expected: node.file_size,
                    }
                } else {
                    NodeOutcome::Written
                }
            }
            Attempt::Abandoned => NodeOutcome::Abandoned,
        }
    }

    fn emit_progress(&self, ctx: &ExportContext, name: &str) {
        if let Some(ref sink) = self.progress {
            let percent = if ctx.total == 0 {
                100
            } else {
                (ctx.saved * 100 / ctx.total) as u8
            };
            sink.report(ProgressEvent {
                percent,
                message: format!("{}/{}: {}", ctx.saved, ctx.total, name),
            });
        }
    }
}

/// A manifest export running on its own worker thread.
///
/// The caller's thread keeps the cancellation handle and joins for the
/// result; progress flows through whatever sink was installed on the
/// engine before spawning.
pub struct ExportTask {
    handle: JoinHandle<Result<ExportSummary, ExportError>>,
    cancel: CancelFlag,
}

impl ExportTask {
    pub fn spawn<S>(
        engine: ExportEngine<S>,
        manifest: RecoveryManifest,
        destination: PathBuf,
    ) -> Self
    where
        S: ClusterSource + Send + 'static,
    {
        let cancel = engine.cancel_flag();
        let handle = std::thread::spawn(move || engine.export_manifest(&manifest, &destination));
        ExportTask { handle, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.request();
    }

    pub fn join(self) -> Result<ExportSummary, ExportError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(ExportError::WorkerPanicked),
        }
    }
}

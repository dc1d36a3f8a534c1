//! End-to-end export engine tests against an in-memory cluster source
//! and temporary destination directories.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::TimeZone;
use salvage_core::{
    count_entries, ClusterSource, DecisionProvider, ExportEngine, ExportError, ExportOptions,
    ExportTask, FailureReport, MemoryClusterSource, NodeOutcome, ProgressEvent, RecoveryManifest,
    RecoveryNode, RetryDecision, VolumeInfo,
};

const CLUSTER: u32 = 64;

fn source_with(chunks: &[(u32, &[u8])]) -> MemoryClusterSource {
    let mut source = MemoryClusterSource::new(CLUSTER);
    for &(index, data) in chunks {
        source.insert(index, data);
    }
    source
}

/// Wraps a memory source and fails reads of one cluster a fixed number
/// of times before letting them through.
struct FlakySource {
    inner: MemoryClusterSource,
    failing_cluster: u32,
    failures_left: Mutex<u32>,
}

impl FlakySource {
    fn new(inner: MemoryClusterSource, failing_cluster: u32, failures: u32) -> Self {
        FlakySource {
            inner,
            failing_cluster,
            failures_left: Mutex::new(failures),
        }
    }
}

impl ClusterSource for FlakySource {
    fn cluster_size(&self) -> u32 {
        self.inner.cluster_size()
    }

    fn read_cluster(&self, index: u32) -> anyhow::Result<Vec<u8>> {
        if index == self.failing_cluster {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("simulated media failure at cluster {}", index);
            }
        }
        self.inner.read_cluster(index)
    }
}

struct CountingRetry {
    decisions: Arc<AtomicU32>,
}

impl DecisionProvider for CountingRetry {
    fn decide(&self, _report: FailureReport<'_>) -> RetryDecision {
        self.decisions.fetch_add(1, Ordering::SeqCst);
        RetryDecision::Retry
    }
}

#[test]
fn test_export_tree_reconstructs_files_and_hierarchy() {
    let source = source_with(&[(2, &[0xAA; 64]), (3, &[0xBB; 64]), (5, b"0123456789")]);
    let tree = RecoveryNode::directory(
        "Games",
        vec![
            RecoveryNode::file("save.dat", 100, vec![2, 3]),
            RecoveryNode::directory("Sub", vec![RecoveryNode::file("a.bin", 10, vec![5])]),
        ],
    );

    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);

    let mut engine = ExportEngine::new(source);
    engine.set_progress_sink(move |event: ProgressEvent| {
        sink_events.lock().unwrap().push(event);
    });

    let dest = tempfile::tempdir().unwrap();
    let summary = engine.export_node(&tree, dest.path()).unwrap();

    // Content: 64 bytes of 0xAA then 36 of 0xBB, truncated to size.
    let save = std::fs::read(dest.path().join("Games/save.dat")).unwrap();
    assert_eq!(save.len(), 100);
    assert!(save[..64].iter().all(|&b| b == 0xAA));
    assert!(save[64..].iter().all(|&b| b == 0xBB));

    let a = std::fs::read(dest.path().join("Games/Sub/a.bin")).unwrap();
    assert_eq!(a, b"0123456789");

    // One progress event per counted entry, ending at 100 percent.
    let events = events.lock().unwrap();
    assert_eq!(events.len() as u64, count_entries(std::slice::from_ref(&tree)));
    assert_eq!(events.len(), 4);
    assert_eq!(events.last().unwrap().percent, 100);
    assert_eq!(events[0].message, "1/4: Games");

    assert_eq!(summary.total_entries, 4);
    assert_eq!(summary.written, 4);
    assert_eq!(summary.incomplete, 0);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(summary.bytes_written, 110);
}

#[test]
fn test_incomplete_chain_truncates_and_is_reported() {
    let source = source_with(&[(2, &[0xAA; 64])]);
    let file = RecoveryNode::file("partial.dat", 200, vec![2]);

    let engine = ExportEngine::new(source);
    let dest = tempfile::tempdir().unwrap();
    let summary = engine.export_node(&file, dest.path()).unwrap();

    assert_eq!(
        std::fs::metadata(dest.path().join("partial.dat")).unwrap().len(),
        64
    );
    assert_eq!(summary.incomplete, 1);
    assert_eq!(
        summary.nodes[0].outcome,
        NodeOutcome::Incomplete {
            bytes_written: 64,
            expected: 200
        }
    );
}

#[test]
fn test_export_groups_creates_labeled_containers() {
    let source = source_with(&[(7, b"orphan-a"), (9, b"orphan-b")]);

    let mut groups = BTreeMap::new();
    groups.insert(
        "Cluster100".to_string(),
        vec![RecoveryNode::file("fileA", 8, vec![7])],
    );
    groups.insert(
        "Cluster200".to_string(),
        vec![RecoveryNode::directory(
            "dirB",
            vec![RecoveryNode::file("inner.bin", 8, vec![9])],
        )],
    );

    let engine = ExportEngine::new(source);
    let dest = tempfile::tempdir().unwrap();
    let summary = engine.export_groups(&groups, dest.path()).unwrap();

    assert_eq!(
        std::fs::read(dest.path().join("Cluster100/fileA")).unwrap(),
        b"orphan-a"
    );
    assert!(dest.path().join("Cluster200/dirB").is_dir());
    assert_eq!(
        std::fs::read(dest.path().join("Cluster200/dirB/inner.bin")).unwrap(),
        b"orphan-b"
    );

    // Container directories are not counted entries.
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.written, 3);
}

#[test]
fn test_cancellation_stops_at_node_boundary() {
    let source = source_with(&[(1, b"one"), (2, b"two"), (3, b"three"), (4, b"four")]);
    let roots: Vec<RecoveryNode> = (1..=4)
        .map(|i| RecoveryNode::file(format!("f{}.bin", i), 4, vec![i]))
        .collect();

    let mut engine = ExportEngine::new(source);
    let cancel = engine.cancel_flag();
    let seen = Arc::new(AtomicU64::new(0));
    let sink_seen = Arc::clone(&seen);
    engine.set_progress_sink(move |_event: ProgressEvent| {
        if sink_seen.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
            cancel.request();
        }
    });

    let dest = tempfile::tempdir().unwrap();
    let err = engine.export_roots(&roots, dest.path()).unwrap_err();

    // The in-flight node finishes; nothing after the boundary starts.
    assert!(matches!(err, ExportError::Cancelled { nodes_done: 2 }));
    assert!(dest.path().join("f1.bin").exists());
    assert!(dest.path().join("f2.bin").exists());
    assert!(!dest.path().join("f3.bin").exists());
    assert!(!dest.path().join("f4.bin").exists());
}

#[test]
fn test_retry_until_success_with_flaky_media() {
    let inner = source_with(&[(9, b"finally readable")]);
    // One failure is consumed by the readability probe, two by failed
    // write attempts; the third attempt succeeds.
    let source = FlakySource::new(inner, 9, 3);

    let decisions = Arc::new(AtomicU32::new(0));
    let mut engine = ExportEngine::new(source);
    engine.set_decision_provider(CountingRetry {
        decisions: Arc::clone(&decisions),
    });

    let file = RecoveryNode::file("flaky.bin", 16, vec![9]);
    let dest = tempfile::tempdir().unwrap();
    let summary = engine.export_node(&file, dest.path()).unwrap();

    assert_eq!(decisions.load(Ordering::SeqCst), 2);
    assert_eq!(summary.written, 1);
    assert_eq!(
        std::fs::read(dest.path().join("flaky.bin")).unwrap(),
        b"finally readable"
    );
}

#[test]
fn test_abort_continues_to_next_sibling() {
    let mut inner = source_with(&[(1, b"good data")]);
    inner.insert(9, b"never seen");
    let source = FlakySource::new(inner, 9, u32::MAX);

    let roots = vec![
        RecoveryNode::file("bad.bin", 10, vec![9]),
        RecoveryNode::file("good.bin", 9, vec![1]),
    ];

    // Default provider abandons on first failure.
    let engine = ExportEngine::new(source);
    let dest = tempfile::tempdir().unwrap();
    let summary = engine.export_roots(&roots, dest.path()).unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.nodes[0].outcome, NodeOutcome::Abandoned);
    assert_eq!(
        std::fs::read(dest.path().join("good.bin")).unwrap(),
        b"good data"
    );
}

#[test]
fn test_abort_cancels_run_when_configured() {
    let inner = source_with(&[(1, b"good data")]);
    let source = FlakySource::new(inner, 9, u32::MAX);

    let roots = vec![
        RecoveryNode::file("bad.bin", 10, vec![9]),
        RecoveryNode::file("good.bin", 9, vec![1]),
    ];

    let mut engine = ExportEngine::new(source);
    engine.set_options(ExportOptions {
        abort_cancels_run: true,
    });

    let dest = tempfile::tempdir().unwrap();
    let err = engine.export_roots(&roots, dest.path()).unwrap_err();

    assert!(matches!(err, ExportError::Aborted { .. }));
    assert!(!dest.path().join("good.bin").exists());
}

#[test]
fn test_directory_mtime_survives_children_writes() {
    let source = source_with(&[(2, b"payload")]);

    let stamp = chrono::Utc.with_ymd_and_hms(2004, 7, 14, 12, 0, 0).unwrap();
    let mut child = RecoveryNode::file("save.dat", 7, vec![2]);
    child.modified = Some(stamp);
    let mut dir = RecoveryNode::directory("UDATA", vec![child]);
    dir.modified = Some(stamp);

    let engine = ExportEngine::new(source);
    let dest = tempfile::tempdir().unwrap();
    engine.export_node(&dir, dest.path()).unwrap();

    let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(stamp.timestamp() as u64);
    let dir_mtime = std::fs::metadata(dest.path().join("UDATA"))
        .unwrap()
        .modified()
        .unwrap();
    let file_mtime = std::fs::metadata(dest.path().join("UDATA/save.dat"))
        .unwrap()
        .modified()
        .unwrap();

    // Stamped after the children pass, so the child write did not
    // disturb it.
    assert_eq!(dir_mtime, expected);
    assert_eq!(file_mtime, expected);
}

#[test]
fn test_manifest_export_on_worker_thread() {
    let source = source_with(&[(2, b"attached"), (7, b"orphaned")]);

    let mut orphans = BTreeMap::new();
    orphans.insert(
        "Cluster7".to_string(),
        vec![RecoveryNode::file("", 8, vec![7])],
    );
    let manifest = RecoveryManifest {
        volume: VolumeInfo {
            cluster_size: CLUSTER,
            data_offset: 0,
        },
        roots: vec![RecoveryNode::file("attached.bin", 8, vec![2])],
        orphans,
    };

    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);

    let mut engine = ExportEngine::new(source);
    engine.set_progress_sink(move |event: ProgressEvent| {
        sink_events.lock().unwrap().push(event);
    });

    let dest = tempfile::tempdir().unwrap();
    let expected_total = manifest.entry_count();
    let task = ExportTask::spawn(engine, manifest, dest.path().to_path_buf());
    let summary = task.join().unwrap();

    assert_eq!(
        std::fs::read(dest.path().join("attached.bin")).unwrap(),
        b"attached"
    );
    // Unnamed orphan falls back to its cluster-derived name inside the
    // group container.
    assert_eq!(
        std::fs::read(dest.path().join("Cluster7/cluster7")).unwrap(),
        b"orphaned"
    );

    // One combined denominator across roots and orphan groups.
    assert_eq!(summary.total_entries, expected_total);
    assert_eq!(events.lock().unwrap().len() as u64, expected_total);
}

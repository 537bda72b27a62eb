//! Scenario tests for hashsnap
//!
//! Builds real directory trees, snapshots them through the full pipeline
//! and checks what a trim would remove.

use ::hashsnap::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

/// A directory on disk plus the snapshot taken of it
pub struct SnapshotHarness {
    pub temp_dir: TempDir,
    pub store: MemoryStore,
}

impl SnapshotHarness {
    /// Create a harness holding `files` as `(relative path, content)`
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp_dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        Self {
            temp_dir,
            store: MemoryStore::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Snapshot the directory and decode the result
    pub fn snapshot(&mut self) -> Tree {
        let snapshotter = SnapshotBuilder::new()
            .workers(4)
            .queue_depth(2)
            .build(self.root().to_path_buf())
            .unwrap();
        self.store = MemoryStore::new();
        let summary = snapshotter
            .create(&mut self.store, &NoProgress, &CancelToken::new())
            .unwrap();
        info!("Snapshot of {:?}: {} files", self.root(), summary.files);
        read_tree(&self.store).unwrap()
    }
}

fn candidate_paths(plan: &TrimPlan<'_>) -> Vec<String> {
    let mut names: Vec<String> = plan
        .candidates()
        .map(|node| {
            plan.current()
                .rel_path(node.id)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    names.sort();
    names
}

#[test]
fn test_basic_trim() {
    let mut a = SnapshotHarness::with_files(&[
        ("d1/d2/f1.txt", "abc"),
        ("d1/d2/f1dup.txt", "abc"),
    ]);
    let mut b = SnapshotHarness::with_files(&[("d2/d3/f2.txt", "abc")]);
    let tree_a = a.snapshot();
    let tree_b = b.snapshot();

    let plan = TrimPlanner::new(&tree_a).reference(&tree_b).plan().unwrap();
    assert_eq!(candidate_paths(&plan), vec!["d1/d2/f1.txt", "d1/d2/f1dup.txt"]);

    let group = &plan.groups()[0];
    assert_eq!(group.evidence().len(), 1);
    assert_eq!(group.evidence()[0].node.name, "f2.txt");
    assert!(group.evidence()[0].belongs_to(&tree_b));
}

#[test]
fn test_duplicate_without_external_match_preserved() {
    let mut a = SnapshotHarness::with_files(&[("a", "a"), ("a2", "a"), ("b", "b")]);
    let mut c = SnapshotHarness::with_files(&[("b", "b")]);
    let tree_a = a.snapshot();
    let tree_c = c.snapshot();

    let plan = TrimPlanner::new(&tree_a).reference(&tree_c).plan().unwrap();
    assert_eq!(candidate_paths(&plan), vec!["b"]);
    assert_eq!(plan.groups_before_prune(), 2);
    assert_eq!(plan.pruned().get(&tree_a.nonce()), Some(&1));
}

#[cfg(unix)]
#[test]
fn test_zero_byte_and_symlink_excluded() {
    let mut harness = SnapshotHarness::with_files(&[("real.txt", "data"), ("empty.txt", "")]);
    std::os::unix::fs::symlink(harness.root().join("real.txt"), harness.root().join("link")).unwrap();
    std::os::unix::fs::symlink(harness.root(), harness.root().join("dirlink")).unwrap();

    let tree = harness.snapshot();
    let names: Vec<&str> = tree.nodes().filter(|n| !n.is_root()).map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["real.txt"]);
}

#[test]
fn test_round_trip_equals_walked_tree() {
    let mut harness = SnapshotHarness::with_files(&[
        ("src/main.rs", "fn main() {}"),
        ("src/lib.rs", "pub fn lib() {}"),
        ("docs/guide/intro.md", "# Intro"),
        ("docs/guide/more.md", "# More"),
        ("README", "readme"),
    ]);
    let tree = harness.snapshot();

    let mut copy = MemoryStore::new();
    codec::write_tree(&mut copy, &tree).unwrap();
    assert_eq!(read_tree(&copy).unwrap(), tree);
    assert_eq!(copy.as_bytes(), harness.store.as_bytes());
}

#[test]
fn test_unchanged_tree_keeps_ids() {
    let mut harness = SnapshotHarness::with_files(&[
        ("x/1", "one"),
        ("x/2", "two"),
        ("y/z/3", "three"),
    ]);
    let first = harness.snapshot();
    let second = harness.snapshot();

    assert_ne!(first.nonce(), second.nonce());
    for dir in first.nodes().filter(|n| n.is_dir) {
        assert_eq!(second.node(dir.id), Some(dir));
    }
    let path = Path::new("y/z/3");
    assert_eq!(
        first.search(path).map(|n| n.hash),
        second.search(path).map(|n| n.hash)
    );
}

#[test]
fn test_trim_against_several_references() {
    let mut current = SnapshotHarness::with_files(&[
        ("photos/1.jpg", "one"),
        ("photos/2.jpg", "two"),
        ("photos/3.jpg", "three"),
    ]);
    let mut disk1 = SnapshotHarness::with_files(&[("1.jpg", "one")]);
    let mut disk2 = SnapshotHarness::with_files(&[("old/2.jpg", "two"), ("old/x.jpg", "one")]);

    let tree = current.snapshot();
    let ref1 = disk1.snapshot();
    let ref2 = disk2.snapshot();

    let plan = TrimPlanner::new(&tree)
        .references([&ref1, &ref2])
        .plan()
        .unwrap();
    assert_eq!(candidate_paths(&plan), vec!["photos/1.jpg", "photos/2.jpg"]);

    let one = plan
        .groups()
        .iter()
        .find(|g| g.hash() == utils::hash_data(b"one"))
        .unwrap();
    assert_eq!(one.evidence().len(), 2);

    assert!(matches!(
        TrimPlanner::new(&tree).references([&ref1, &ref1]).plan(),
        Err(HashsnapError::DuplicateReference(_))
    ));
}

#[test]
fn test_cancelled_snapshot_writes_nothing() {
    let harness = SnapshotHarness::with_files(&[("a", "a"), ("b", "b")]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut store = FileStore::new(harness.root().join(".hsnap"));
    let result = SnapshotBuilder::new()
        .build(harness.root().to_path_buf())
        .unwrap()
        .create(&mut store, &NoProgress, &cancel);
    assert!(matches!(result, Err(HashsnapError::Cancelled)));
    assert!(!store.exists());
}

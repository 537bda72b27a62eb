//! Property-based testing for hashsnap
//!
//! Uses proptest to verify stream and trim invariants across randomly
//! generated directory trees.

use ::hashsnap::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate random relative file paths
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dirs = prop::collection::vec("[a-d]{1,3}", 0..=3);
    let file = "[a-z]{1,6}\\.(txt|bin)";
    (dirs, file).prop_map(|(dirs, file)| {
        let mut path: PathBuf = dirs.into_iter().collect();
        path.push(file);
        path
    })
}

/// Contents drawn from a tiny alphabet so duplicates are common
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(b"alpha".to_vec()),
        Just(b"beta".to_vec()),
        Just(b"gamma gamma".to_vec()),
        prop::collection::vec(any::<u8>(), 1..64),
    ]
}

fn files_strategy(max: usize) -> impl Strategy<Value = BTreeMap<PathBuf, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 0..max)
}

/// Write `files` under `root`, skipping paths that clash with a directory
fn materialize(root: &Path, files: &BTreeMap<PathBuf, Vec<u8>>) {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            if fs::create_dir_all(parent).is_err() {
                continue;
            }
        }
        if full.is_dir() {
            continue;
        }
        fs::write(full, content).unwrap();
    }
}

fn snapshot(root: &Path) -> (Tree, MemoryStore) {
    let mut store = MemoryStore::new();
    SnapshotBuilder::new()
        .workers(3)
        .queue_depth(2)
        .build(root.to_path_buf())
        .unwrap()
        .create(&mut store, &NoProgress, &CancelToken::new())
        .unwrap();
    let tree = read_tree(&store).unwrap();
    (tree, store)
}

/// Flat in-memory tree holding `contents` as files `f0`, `f1`, ...
fn flat_tree(root: &str, contents: &[Vec<u8>]) -> Tree {
    let mut tree = Tree::new(SnapshotHeader::new(PathBuf::from(root)));
    tree.insert(Node::directory(1, NO_PARENT, "root")).unwrap();
    for (i, content) in contents.iter().enumerate() {
        let mut node = Node::file(i as u64 + 2, 1, format!("f{}", i), content.len() as u64);
        node.hash = utils::hash_data(content);
        tree.insert(node).unwrap();
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Decoding a written snapshot and writing it again is lossless
    #[test]
    fn snapshot_round_trip(files in files_strategy(24)) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &files);
        let (tree, store) = snapshot(temp_dir.path());

        let mut copy = MemoryStore::new();
        codec::write_tree(&mut copy, &tree).unwrap();
        prop_assert_eq!(copy.as_bytes(), store.as_bytes());
        prop_assert_eq!(read_tree(&copy).unwrap(), tree.clone());

        // Every file on disk made it in with the right digest
        for node in tree.files() {
            let content = fs::read(tree.abs_path(node.id).unwrap()).unwrap();
            prop_assert_eq!(node.hash, utils::hash_data(&content));
            prop_assert_eq!(node.size, content.len() as u64);
        }
    }

    /// Every node's parent appears earlier in the stream, directories before files
    #[test]
    fn parent_before_child(files in files_strategy(24)) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &files);
        let (_, store) = snapshot(temp_dir.path());

        let mut seen = HashSet::new();
        let mut files_started = false;
        for node in store.iter_nodes().unwrap() {
            let node = node.unwrap();
            if node.parent_id != NO_PARENT {
                prop_assert!(seen.contains(&node.parent_id));
            }
            if node.is_dir {
                prop_assert!(!files_started, "directory {} after a file", node.name);
            } else {
                files_started = true;
            }
            prop_assert!(seen.insert(node.id));
        }
    }

    /// A single tree never leaves a group behind after pruning
    #[test]
    fn single_tree_pruning(contents in prop::collection::vec(content_strategy(), 0..32)) {
        let tree = flat_tree("/single", &contents);
        let mut engine = DedupEngine::new();
        engine.add_tree(&tree).unwrap();
        engine.prune_single_tree_groups();
        prop_assert!(engine.is_empty());
        prop_assert!(engine.select(&tree).is_empty());
    }

    /// Trim candidates are exactly the current files whose content a reference holds
    #[test]
    fn trim_only_backed_up_content(
        current in prop::collection::vec(content_strategy(), 0..24),
        reference in prop::collection::vec(content_strategy(), 0..24),
    ) {
        let current_tree = flat_tree("/current", &current);
        let reference_tree = flat_tree("/reference", &reference);
        let backed_up: HashSet<Digest> = reference_tree.files().map(|n| n.hash).collect();

        let plan = TrimPlanner::new(&current_tree)
            .reference(&reference_tree)
            .plan()
            .unwrap();

        let candidates: HashSet<NodeId> = plan.candidates().map(|n| n.id).collect();
        for node in current_tree.files() {
            prop_assert_eq!(candidates.contains(&node.id), backed_up.contains(&node.hash));
        }
        for group in plan.groups() {
            prop_assert!(group.candidates().iter().all(|m| m.belongs_to(&current_tree)));
            prop_assert!(!group.evidence().is_empty());
            prop_assert!(group.evidence().iter().all(|m| m.belongs_to(&reference_tree)));
        }

        let wasted: Vec<u64> = plan.groups().iter().map(|g| g.wasted()).collect();
        prop_assert!(wasted.windows(2).all(|w| w[0] >= w[1]));
    }
}

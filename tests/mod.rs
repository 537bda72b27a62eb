//! Main test module for hashsnap
//!
//! This module includes all test suites:
//! - Integration tests for the trim scenarios
//! - Chaos tests for damaged snapshot streams
//! - Property-based tests for invariants

pub mod chaos;
pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::hashsnap::*;
    use std::fs;
    use tempfile::TempDir;

    fn create(root: &std::path::Path, store: &mut MemoryStore) -> SnapshotSummary {
        SnapshotBuilder::new()
            .build(root.to_path_buf())
            .unwrap()
            .create(store, &NoProgress, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MemoryStore::new();

        let summary = create(temp_dir.path(), &mut store);
        assert_eq!(summary.directories, 1);
        assert_eq!(summary.files, 0);

        let tree = read_tree(&store).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.root().unwrap().is_root());
    }

    #[test]
    fn test_only_zero_byte_files() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(temp_dir.path().join(format!("empty{}", i)), "").unwrap();
        }

        let mut store = MemoryStore::new();
        let summary = create(temp_dir.path(), &mut store);
        assert_eq!(summary.files, 0);
    }

    #[test]
    fn test_unicode_names() {
        let temp_dir = TempDir::new().unwrap();
        let names = ["café.txt", "日本語", "emoji 🎉", "spaces in name"];
        for name in names {
            fs::write(temp_dir.path().join(name), name).unwrap();
        }

        let mut store = MemoryStore::new();
        create(temp_dir.path(), &mut store);
        let tree = read_tree(&store).unwrap();
        for name in names {
            let node = tree.search(std::path::Path::new(name)).unwrap();
            assert_eq!(node.hash, utils::hash_data(name.as_bytes()));
        }
    }

    #[test]
    fn test_deep_nesting() {
        let temp_dir = TempDir::new().unwrap();
        let mut path = temp_dir.path().to_path_buf();
        for i in 0..40 {
            path = path.join(format!("level{}", i));
        }
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("bottom.txt"), "deep").unwrap();

        let mut store = MemoryStore::new();
        let summary = create(temp_dir.path(), &mut store);
        assert_eq!(summary.directories, 41);

        let tree = read_tree(&store).unwrap();
        let bottom = tree.files().next().unwrap();
        assert_eq!(tree.abs_path(bottom.id).unwrap(), path.join("bottom.txt"));
    }
}

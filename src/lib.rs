//! # Hashsnap - content-addressed filesystem snapshots
//!
//! Capture a directory tree as an immutable snapshot where every file
//! carries its SHA-1, then compare snapshots to find files that are
//! duplicated locally or already backed up somewhere else.
//!
//! ## Overview
//!
//! Hashsnap lets you:
//! - Snapshot a directory into a compact streaming binary file
//! - List, summarize and check a snapshot against the disk
//! - Report duplicated content inside one snapshot
//! - Find the files of one snapshot missing from others
//! - Trim a directory: remove the files whose content is proven to exist in
//!   one or more reference snapshots
//!
//! ## Architecture
//!
//! - **Walker**: breadth-first, two passes. Directories first, then files, so
//!   the stream always lists a directory before anything it contains
//! - **Hasher**: a fixed pool of worker threads hashing files concurrently
//! - **Codec**: header plus node records, decoded by a streaming reader that
//!   rejects any node whose parent has not been seen yet
//! - **Tree**: an arena of nodes indexed by id with an explicit children index
//! - **DedupEngine / TrimPlanner**: digest groups across trees, pruned down to
//!   content that exists in more than one snapshot
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hashsnap::{
//!     read_tree, CancelToken, FileStore, NoOpReporter, NoProgress, SnapshotBuilder, TrimPlanner,
//! };
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Snapshot the working directory
//! let snapshotter = SnapshotBuilder::new().build(PathBuf::from("/home/me/photos"))?;
//! let mut store = FileStore::new("/home/me/photos/.hsnap");
//! snapshotter.create(&mut store, &NoProgress, &CancelToken::new())?;
//!
//! // Compare it with a backup taken earlier
//! let current = read_tree(&store)?;
//! let backup = read_tree(&FileStore::new("/mnt/backup/photos/.hsnap"))?;
//! let plan = TrimPlanner::new(&current).reference(&backup).plan()?;
//! println!("{} files already backed up", plan.candidate_count());
//!
//! // Remove them
//! plan.execute(&mut NoOpReporter);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`HashsnapError`]. Structural
//! errors (unknown format version, broken ordering, hash collisions, self
//! comparison) abort the operation. Per-entry problems such as an unreadable
//! file are logged with `tracing` and the entry is skipped.
//!
//! ## Module Organization
//!
//! - [`types`]: nodes, digests, headers
//! - [`tree`]: in-memory snapshot
//! - [`walker`]: two-pass directory walk and skip policy
//! - [`hasher`]: concurrent hashing pool, progress and cancellation
//! - [`codec`]: wire format and storage backends
//! - [`dedup`]: content grouping across trees
//! - [`trim`]: trim planning and execution
//! - [`snapshot`]: configuration and pipeline orchestration
//! - [`locator`]: finding the snapshot governing a directory
//! - [`utils`]: hashing and formatting helpers
//! - [`error`]: error types

// Public API modules
pub mod codec;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod locator;
pub mod snapshot;
pub mod tree;
pub mod trim;
pub mod types;
pub mod utils;
pub mod walker;

// Internal modules
mod collections;

// Re-export main types for convenience
pub use codec::{read_tree, summarize, FileStore, MemoryStore, SnapshotStore};
pub use dedup::{duplicates_within, unique_files, DedupEngine, Group, Member};
pub use error::{HashsnapError, Result};
pub use hasher::{CancelToken, HashPool, NoProgress, ProgressSink};
pub use locator::lookup_from;
pub use snapshot::{SnapshotBuilder, SnapshotOptions, Snapshotter};
pub use tree::Tree;
pub use trim::{NoOpReporter, RemovalOutcome, Reporter, TrimOutcome, TrimPlan, TrimPlanner};
pub use types::*;

//! Snapshot creation
//!
//! ## Overview
//!
//! [`Snapshotter`] runs the whole pipeline for one snapshot:
//!
//! ```text
//!  directory pass ──► skeleton ──────────────────────────────┐
//!  (caller thread)                                           ▼
//!  file pass ──► jobs ──► HashPool (N workers) ──► nodes ──► writer
//!  (producer thread)  bounded            bounded           (caller thread)
//! ```
//!
//! The directory pass completes before any file is looked at, and every
//! directory is written before the first file. Files reach the writer in
//! whatever order the workers finish them.
//!
//! Cancelling the [`CancelToken`] stops the producer and the workers. The
//! write then fails with [`HashsnapError::Cancelled`] and the store keeps no
//! output.
//!
//! ## Configuration
//!
//! [`SnapshotBuilder`] configures a [`Snapshotter`]. The same settings exist
//! as the serializable [`SnapshotOptions`], which can be loaded from JSON.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hashsnap::codec::FileStore;
//! use hashsnap::hasher::{CancelToken, NoProgress};
//! use hashsnap::snapshot::SnapshotBuilder;
//! use std::path::PathBuf;
//!
//! # fn main() -> hashsnap::Result<()> {
//! let snapshotter = SnapshotBuilder::new()
//!     .exclude_patterns(vec!["*.tmp".to_string()])
//!     .workers(4)
//!     .build(PathBuf::from("/home/me/photos"))?;
//!
//! let mut store = FileStore::new("/home/me/photos/.hsnap");
//! let summary = snapshotter.create(&mut store, &NoProgress, &CancelToken::new())?;
//! println!("{} files, {} bytes", summary.files, summary.total_size);
//! # Ok(())
//! # }
//! ```

use crate::codec::SnapshotStore;
use crate::error::{HashsnapError, Result};
use crate::hasher::{CancelToken, HashPool, ProgressSink};
use crate::types::{SnapshotHeader, SnapshotSummary};
use crate::walker::{IdAllocator, SkipPolicy, Walker};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::iter;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, instrument};

/// Default name of the snapshot state file
pub const DEFAULT_STATE_NAME: &str = ".hsnap";

/// Serializable snapshot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// File name of the snapshot state file, never included in a snapshot
    pub state_name: String,
    /// Entry names excluded at any depth
    pub exclude_names: Vec<String>,
    /// Glob patterns matched against entry names
    pub exclude_patterns: Vec<String>,
    /// Number of hashing threads
    pub workers: usize,
    /// Capacity of the job and result queues
    pub queue_depth: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            state_name: DEFAULT_STATE_NAME.to_string(),
            exclude_names: vec![".git".to_string(), ".DS_Store".to_string()],
            exclude_patterns: Vec::new(),
            workers,
            queue_depth: workers * 4,
        }
    }
}

impl SnapshotOptions {
    /// Parse options from JSON, missing fields take their default
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| HashsnapError::InvalidConfiguration(e.to_string()))
    }

    /// Render options as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HashsnapError::InvalidConfiguration(e.to_string()))
    }

    /// Check the options are usable
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HashsnapError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(HashsnapError::InvalidConfiguration(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.state_name.is_empty() || self.state_name.contains(std::path::is_separator) {
            return Err(HashsnapError::InvalidConfiguration(format!(
                "state_name must be a plain file name, got {:?}",
                self.state_name
            )));
        }
        Ok(())
    }

    /// Skip policy described by these options
    pub fn skip_policy(&self) -> Result<SkipPolicy> {
        SkipPolicy::new(self.state_name.clone())
            .with_exclude_names(self.exclude_names.iter().cloned())
            .with_patterns(&self.exclude_patterns)
    }
}

/// Builder for [`Snapshotter`]
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    options: SnapshotOptions,
    queue_depth: Option<usize>,
}

impl SnapshotBuilder {
    /// Builder with default settings
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hashsnap::snapshot::SnapshotBuilder;
    ///
    /// let builder = SnapshotBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            options: SnapshotOptions::default(),
            queue_depth: None,
        }
    }

    /// Start from existing options
    pub fn options(mut self, options: SnapshotOptions) -> Self {
        self.queue_depth = Some(options.queue_depth);
        self.options = options;
        self
    }

    /// Set the state file name
    pub fn state_name(mut self, name: impl Into<String>) -> Self {
        self.options.state_name = name.into();
        self
    }

    /// Replace the excluded names
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hashsnap::snapshot::SnapshotBuilder;
    ///
    /// let builder = SnapshotBuilder::new()
    ///     .exclude_names(vec![".git".to_string(), "node_modules".to_string()]);
    /// ```
    pub fn exclude_names(mut self, names: Vec<String>) -> Self {
        self.options.exclude_names = names;
        self
    }

    /// Replace the excluded glob patterns
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.options.exclude_patterns = patterns;
        self
    }

    /// Set the number of hashing threads
    ///
    /// Values below 1 are raised to 1. Unless set explicitly, the queue
    /// depth follows at four slots per worker.
    pub fn workers(mut self, count: usize) -> Self {
        self.options.workers = count.max(1);
        self
    }

    /// Set the capacity of the pipeline queues
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth.max(1));
        self
    }

    /// Build a snapshotter for `root`
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::InvalidPattern`] if an exclude pattern does not parse
    /// - [`HashsnapError::InvalidConfiguration`] for unusable settings
    pub fn build(self, root: PathBuf) -> Result<Snapshotter> {
        let mut options = self.options;
        options.queue_depth = self.queue_depth.unwrap_or(options.workers * 4);
        options.validate()?;
        let policy = options.skip_policy()?;

        Ok(Snapshotter {
            root,
            options,
            policy,
            ids: IdAllocator::new(),
        })
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Takes snapshots of one directory
#[derive(Debug)]
pub struct Snapshotter {
    root: PathBuf,
    options: SnapshotOptions,
    policy: SkipPolicy,
    ids: IdAllocator,
}

impl Snapshotter {
    /// Directory being snapshotted
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective options
    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    /// Walk, hash and store a new snapshot
    ///
    /// # Arguments
    ///
    /// * `store` - Destination of the encoded stream
    /// * `sink` - Receives every byte read while hashing
    /// * `cancel` - Cooperative cancellation flag
    ///
    /// # Returns
    ///
    /// Counters of what was written.
    ///
    /// # Errors
    ///
    /// - Root errors from [`Walker::walk_directories`]
    /// - [`HashsnapError::Cancelled`] if `cancel` fired
    /// - Any write error from `store`
    ///
    /// Files that cannot be read are left out with a warning and do not fail
    /// the snapshot.
    #[instrument(skip(self, store, sink, cancel), fields(root = ?self.root))]
    pub fn create<S>(
        &self,
        store: &mut S,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<SnapshotSummary>
    where
        S: SnapshotStore + ?Sized,
    {
        self.ids.reset();
        let header = SnapshotHeader::new(self.root.clone());
        let policy = match store.output_name() {
            Some(name) if !self.policy.is_output(name) => {
                debug!("Hiding output file {:?}", name);
                Cow::Owned(self.policy.clone().with_output_name(name))
            }
            _ => Cow::Borrowed(&self.policy),
        };
        let walker = Walker::new(&self.root, &*policy, &self.ids);

        let skeleton = walker.walk_directories()?;
        if cancel.is_cancelled() {
            return Err(HashsnapError::Cancelled);
        }

        let depth = self.options.queue_depth;
        let pool = HashPool::new(self.options.workers);

        let (summary, emitted, stats) = thread::scope(|scope| {
            let (job_tx, job_rx) = crossbeam_channel::bounded(depth);
            let (node_tx, node_rx) = crossbeam_channel::bounded(depth);

            let walker = &walker;
            let skeleton = &skeleton;
            let producer = scope.spawn(move || {
                walker.walk_files(skeleton, |job| {
                    if cancel.is_cancelled() || job_tx.send(job).is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })
            });
            let hashers = scope.spawn(move || pool.run(job_rx, node_tx, sink, cancel));

            let directories = skeleton.nodes().cloned().map(Ok);
            let files = node_rx.into_iter().map(Ok);
            let cancelled = iter::once_with(|| cancel.is_cancelled())
                .filter_map(|c| c.then(|| Err(HashsnapError::Cancelled)));

            let written = store.write(&header, directories.chain(files).chain(cancelled));

            let emitted = producer
                .join()
                .map_err(|_| HashsnapError::internal("file walker panicked"))?;
            let stats = hashers
                .join()
                .map_err(|_| HashsnapError::internal("hash pool panicked"))?;
            Ok::<_, HashsnapError>((written?, emitted, stats))
        })?;

        debug!(
            "{} files found, {} hashed, {} unreadable",
            emitted, stats.hashed, stats.failed
        );
        info!(
            "Snapshot {} written: {} directories, {} files, {} bytes",
            header.short_nonce(),
            summary.directories,
            summary.files,
            summary.total_size
        );
        Ok(summary)
    }
}

//! Breadth-first filesystem walker
//!
//! ## Overview
//!
//! A walk runs in two explicit passes over the subtree:
//!
//! 1. [`Walker::walk_directories`] visits directories only, breadth first, on
//!    the calling thread. Every directory gets its id before any of its
//!    children are looked at, and the whole [`DirectorySkeleton`] is kept in
//!    memory.
//! 2. [`Walker::walk_files`] goes over the finished skeleton in the same order
//!    and enumerates the files of each directory, handing out one
//!    [`FileJob`] per file.
//!
//! Files are leaves, so once the skeleton has been written downstream the
//! files can be hashed and emitted in any order without breaking the
//! parent-before-child property of the stream.
//!
//! Entries within one directory are visited in file name order, which makes
//! ids deterministic for an unchanged tree.
//!
//! ## Skipping
//!
//! Every candidate entry is described by an [`EntryMeta`] and offered to a
//! [`Skipper`]. [`SkipPolicy`] is the standard implementation; plain closures
//! work too.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hashsnap::walker::{IdAllocator, SkipPolicy, Walker};
//! use std::ops::ControlFlow;
//! use std::path::Path;
//!
//! # fn main() -> hashsnap::Result<()> {
//! let ids = IdAllocator::new();
//! let policy = SkipPolicy::new(".hsnap").with_exclude_names([".git"]);
//! let walker = Walker::new(Path::new("/data"), &policy, &ids);
//!
//! let skeleton = walker.walk_directories()?;
//! walker.walk_files(&skeleton, |job| {
//!     println!("{} -> {}", job.node.id, job.path.display());
//!     ControlFlow::Continue(())
//! });
//! # Ok(())
//! # }
//! ```

use crate::codec::is_partial_snapshot;
use crate::error::{HashsnapError, Result};
use crate::types::{EntryMeta, Node, NodeId, NO_PARENT};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::VecDeque;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Thread-safe monotonic id source scoped to one snapshot run
///
/// The first call to [`allocate`](IdAllocator::allocate) returns 1, leaving
/// 0 free for [`NO_PARENT`].
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose next id is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id
    pub fn allocate(&self) -> NodeId {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id handed out, 0 if none
    pub fn current(&self) -> NodeId {
        self.last.load(Ordering::SeqCst)
    }

    /// Start over from zero
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }
}

/// Decides whether a candidate entry is left out of the snapshot
pub trait Skipper: Send + Sync {
    /// Return `true` to exclude `entry`
    fn skip(&self, entry: &EntryMeta<'_>) -> bool;
}

impl<F> Skipper for F
where
    F: Fn(&EntryMeta<'_>) -> bool + Send + Sync,
{
    fn skip(&self, entry: &EntryMeta<'_>) -> bool {
        self(entry)
    }
}

/// Whether the built-in rules exclude `entry`
///
/// Non-directories are kept only if they are regular files with at least
/// one byte. Symbolic links are never followed, so they fall out here too.
pub fn default_skip(entry: &EntryMeta<'_>) -> bool {
    !entry.is_dir && (!entry.is_regular || entry.size == 0)
}

/// Standard skip policy
///
/// Combines [`default_skip`], the snapshot state file name, a list of exact
/// names and optional glob patterns. Names and patterns apply at every depth
/// and to directories as well as files.
///
/// Output files, the state file among them, are hidden together with their
/// partial writes.
#[derive(Debug, Clone)]
pub struct SkipPolicy {
    state_name: String,
    outputs: Vec<String>,
    exclude_names: Vec<String>,
    patterns: Option<GlobSet>,
}

impl SkipPolicy {
    /// Policy excluding the state file `state_name` on top of the defaults
    pub fn new(state_name: impl Into<String>) -> Self {
        let state_name = state_name.into();
        Self {
            outputs: vec![state_name.clone()],
            state_name,
            exclude_names: Vec::new(),
            patterns: None,
        }
    }

    /// Also hide the output file `name` and its partial writes
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
        self
    }

    /// Whether `name` is an output file or one of its partial writes
    pub fn is_output(&self, name: &str) -> bool {
        self.outputs
            .iter()
            .any(|output| name == output || is_partial_snapshot(name, output))
    }

    /// Also exclude entries with any of these exact names
    pub fn with_exclude_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Also exclude entries whose name matches one of the glob `patterns`
    ///
    /// # Errors
    ///
    /// Returns [`HashsnapError::InvalidPattern`] if a pattern does not parse.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0;
        for pattern in patterns {
            builder.add(Glob::new(pattern.as_ref())?);
            count += 1;
        }
        if count > 0 {
            self.patterns = Some(builder.build()?);
        }
        Ok(self)
    }

    /// Name of the snapshot state file this policy hides
    pub fn state_name(&self) -> &str {
        &self.state_name
    }
}

impl Skipper for SkipPolicy {
    fn skip(&self, entry: &EntryMeta<'_>) -> bool {
        if default_skip(entry) || self.is_output(entry.name) {
            return true;
        }
        if self.exclude_names.iter().any(|n| n == entry.name) {
            return true;
        }
        self.patterns
            .as_ref()
            .is_some_and(|set| set.is_match(entry.name))
    }
}

/// One directory of the skeleton
#[derive(Debug, Clone)]
pub struct SkeletonDir {
    /// Directory node
    pub node: Node,
    /// Absolute path on disk
    pub path: PathBuf,
}

/// Output of the directory pass, in breadth-first order, root first
#[derive(Debug, Clone, Default)]
pub struct DirectorySkeleton {
    dirs: Vec<SkeletonDir>,
}

impl DirectorySkeleton {
    /// Directories in walk order
    pub fn dirs(&self) -> &[SkeletonDir] {
        &self.dirs
    }

    /// Directory nodes in walk order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.dirs.iter().map(|d| &d.node)
    }

    /// Number of directories, root included
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether the skeleton is empty
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// A file found by the file pass, waiting to be hashed
#[derive(Debug, Clone)]
pub struct FileJob {
    /// File node with its id, parent and size set
    pub node: Node,
    /// Absolute path to read the content from
    pub path: PathBuf,
}

/// Two-pass breadth-first walker over one subtree
pub struct Walker<'a> {
    root: PathBuf,
    skipper: &'a dyn Skipper,
    ids: &'a IdAllocator,
}

impl<'a> Walker<'a> {
    /// Create a walker rooted at `root`
    ///
    /// # Arguments
    ///
    /// * `root` - Absolute path of the directory to snapshot
    /// * `skipper` - Predicate deciding which entries are left out
    /// * `ids` - Id source shared with the rest of the snapshot run
    pub fn new(root: &Path, skipper: &'a dyn Skipper, ids: &'a IdAllocator) -> Self {
        Self {
            root: root.to_path_buf(),
            skipper,
            ids,
        }
    }

    /// Root being walked
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory pass
    ///
    /// Lists directories breadth first and assigns each one an id before
    /// descending into it. A directory that cannot be listed contributes no
    /// children.
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::RootNotAbsolute`] if the root is relative
    /// - [`HashsnapError::RootUnavailable`] if the root cannot be lstat'ed
    /// - [`HashsnapError::RootNotDirectory`] if the root is not a directory
    pub fn walk_directories(&self) -> Result<DirectorySkeleton> {
        if !self.root.is_absolute() {
            return Err(HashsnapError::RootNotAbsolute(self.root.clone()));
        }
        let meta = fs::symlink_metadata(&self.root).map_err(|source| {
            HashsnapError::RootUnavailable {
                path: self.root.clone(),
                source,
            }
        })?;
        if !meta.is_dir() {
            return Err(HashsnapError::RootNotDirectory(self.root.clone()));
        }

        let root_name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());

        let mut skeleton = DirectorySkeleton::default();
        skeleton.dirs.push(SkeletonDir {
            node: Node::directory(self.ids.allocate(), NO_PARENT, root_name),
            path: self.root.clone(),
        });

        let mut queue = VecDeque::from([0usize]);
        while let Some(index) = queue.pop_front() {
            let parent_id = skeleton.dirs[index].node.id;
            let parent_path = skeleton.dirs[index].path.clone();

            for entry in list_dir(&parent_path) {
                if !entry.is_dir || self.skipper.skip(&entry.meta()) {
                    continue;
                }
                let node = Node::directory(self.ids.allocate(), parent_id, entry.name);
                trace!("Directory {}", node);
                skeleton.dirs.push(SkeletonDir {
                    node,
                    path: entry.path,
                });
                queue.push_back(skeleton.dirs.len() - 1);
            }
        }

        debug!(
            "Directory pass over {:?} found {} directories",
            self.root,
            skeleton.len()
        );
        Ok(skeleton)
    }

    /// File pass
    ///
    /// Goes over `skeleton` in order and calls `emit` once per kept file.
    /// Returning [`ControlFlow::Break`] from `emit` stops the pass.
    ///
    /// # Returns
    ///
    /// Number of files emitted.
    pub fn walk_files<F>(&self, skeleton: &DirectorySkeleton, mut emit: F) -> u64
    where
        F: FnMut(FileJob) -> ControlFlow<()>,
    {
        let mut emitted = 0u64;
        for dir in skeleton.dirs() {
            for entry in list_dir(&dir.path) {
                if entry.is_dir || self.skipper.skip(&entry.meta()) {
                    continue;
                }
                let node = Node::file(self.ids.allocate(), dir.node.id, entry.name, entry.size);
                trace!("File {}", node);
                emitted += 1;
                if emit(FileJob {
                    node,
                    path: entry.path,
                })
                .is_break()
                {
                    debug!("File pass stopped after {} files", emitted);
                    return emitted;
                }
            }
        }
        debug!("File pass emitted {} files", emitted);
        emitted
    }
}

/// Listed child of a directory
struct Listed {
    name: String,
    path: PathBuf,
    is_dir: bool,
    is_regular: bool,
    size: u64,
}

impl Listed {
    fn meta(&self) -> EntryMeta<'_> {
        EntryMeta {
            name: &self.name,
            is_dir: self.is_dir,
            is_regular: self.is_regular,
            size: self.size,
        }
    }
}

/// Children of `dir`, sorted by name, without following links
///
/// Failures are logged and the affected entries left out.
fn list_dir(dir: &Path) -> Vec<Listed> {
    let mut listed = Vec::new();
    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Listing directory {:?} failed: {}", dir, e);
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            warn!("Skipping non UTF-8 name {:?}", entry.path());
            continue;
        };
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Cannot stat {:?}: {}", entry.path(), e);
                continue;
            }
        };
        listed.push(Listed {
            name: name.to_string(),
            path: entry.path().to_path_buf(),
            is_dir: meta.is_dir(),
            is_regular: meta.is_file(),
            size: if meta.is_dir() { 0 } else { meta.len() },
        });
    }
    listed
}

//! In-memory snapshot: header plus an arena of nodes
//!
//! A [`Tree`] owns every [`Node`] of one snapshot, indexed by id, and an
//! explicit `parent_id -> children` index. Nodes never point at each other;
//! paths are rebuilt by following `parent_id` through the arena.
//!
//! Trees are built either in-process (see [`crate::snapshot`]) or by folding a
//! decoded stream (see [`crate::codec::read_tree`]). Both paths go through
//! [`Tree::insert`], which enforces that a node's parent is already known.
//!
//! ## Example
//!
//! ```rust
//! use hashsnap::tree::Tree;
//! use hashsnap::types::{Node, SnapshotHeader};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> hashsnap::Result<()> {
//! let mut tree = Tree::new(SnapshotHeader::new(PathBuf::from("/data")));
//! tree.insert(Node::directory(1, 0, "data"))?;
//! tree.insert(Node::directory(2, 1, "music"))?;
//! tree.insert(Node::file(3, 2, "song.ogg", 4096))?;
//!
//! assert_eq!(tree.rel_path(3)?, PathBuf::from("music/song.ogg"));
//! assert_eq!(tree.abs_path(3)?, PathBuf::from("/data/music/song.ogg"));
//! assert_eq!(tree.search(Path::new("music/song.ogg")).map(|n| n.id), Some(3));
//! # Ok(())
//! # }
//! ```

use crate::collections::HashMap;
use crate::error::{HashsnapError, Result};
use crate::types::{Node, NodeId, SnapshotHeader, SnapshotSummary};
use rayon::prelude::*;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;
use uuid::Uuid;

/// Nodes and header of one snapshot
#[derive(Debug, Clone)]
pub struct Tree {
    header: SnapshotHeader,
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    /// Insertion order, which is also stream order
    order: Vec<NodeId>,
    root: Option<NodeId>,
}

impl Tree {
    /// Create an empty tree for `header`
    pub fn new(header: SnapshotHeader) -> Self {
        Self {
            header,
            nodes: HashMap::default(),
            children: HashMap::default(),
            order: Vec::new(),
            root: None,
        }
    }

    /// Add a node
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::DuplicateNodeId`] if the id is already taken
    /// - [`HashsnapError::MultipleRoots`] if a root is already present
    /// - [`HashsnapError::ParentNotSeen`] if the parent was not inserted before
    /// - [`HashsnapError::ParentNotDirectory`] if the parent is a file
    pub fn insert(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(HashsnapError::DuplicateNodeId(node.id));
        }

        if node.is_root() {
            if self.root.is_some() {
                return Err(HashsnapError::MultipleRoots(node.id));
            }
            self.root = Some(node.id);
        } else {
            match self.nodes.get(&node.parent_id) {
                None => {
                    return Err(HashsnapError::ParentNotSeen {
                        id: node.id,
                        parent_id: node.parent_id,
                    })
                }
                Some(parent) if !parent.is_dir => {
                    return Err(HashsnapError::ParentNotDirectory {
                        id: node.id,
                        parent_id: node.parent_id,
                    })
                }
                Some(_) => {}
            }
            self.children.entry(node.parent_id).or_default().push(node.id);
        }

        trace!("Inserted node {}", node);
        self.order.push(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Snapshot header
    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Nonce identifying this snapshot instance
    pub fn nonce(&self) -> Uuid {
        self.header.nonce
    }

    /// Look a node up by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Root node
    pub fn root(&self) -> Result<&Node> {
        self.root
            .and_then(|id| self.nodes.get(&id))
            .ok_or(HashsnapError::MissingRoot)
    }

    /// Direct children of `id`, in insertion order
    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |child| self.nodes.get(child))
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }

    /// File nodes in insertion order
    pub fn files(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes().filter(|n| !n.is_dir)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no node at all
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of file nodes
    pub fn file_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.is_dir).count()
    }

    /// Sum of all file sizes
    pub fn total_size(&self) -> u64 {
        self.nodes
            .values()
            .filter(|n| !n.is_dir)
            .map(|n| n.size)
            .fold(0, u64::saturating_add)
    }

    /// Directory, file and byte counters
    pub fn summary(&self) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();
        for node in self.nodes.values() {
            summary.record(node);
        }
        summary
    }

    /// Path of `id` relative to the snapshot root
    ///
    /// The root itself maps to an empty path.
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::NodeNotFound`] if `id` is unknown
    /// - [`HashsnapError::DisconnectedNode`] if the parent chain is broken
    pub fn rel_path(&self, id: NodeId) -> Result<PathBuf> {
        let mut current = self.nodes.get(&id).ok_or(HashsnapError::NodeNotFound(id))?;
        let mut names = Vec::new();

        while !current.is_root() {
            // A chain longer than the tree means a cycle
            if names.len() > self.nodes.len() {
                return Err(HashsnapError::DisconnectedNode(id));
            }
            names.push(current.name.as_str());
            current = self
                .nodes
                .get(&current.parent_id)
                .ok_or(HashsnapError::DisconnectedNode(id))?;
        }

        Ok(names.iter().rev().collect())
    }

    /// Absolute path of `id`, anchored at the header's root path
    pub fn abs_path(&self, id: NodeId) -> Result<PathBuf> {
        Ok(self.header.root_path.join(self.rel_path(id)?))
    }

    /// Find a node by its path relative to the root
    ///
    /// An empty path or `.` returns the root.
    pub fn search(&self, rel: &Path) -> Option<&Node> {
        let mut current = self.root().ok()?;
        for component in rel.components() {
            match component {
                Component::CurDir => continue,
                Component::Normal(name) => {
                    let name = name.to_str()?;
                    current = self.children_of(current.id).find(|c| c.name == name)?;
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Files recorded in the snapshot that are no longer on disk
    pub fn missing_files(&self) -> Vec<&Node> {
        let files: Vec<&Node> = self.files().collect();
        files
            .into_par_iter()
            .filter(|node| match self.abs_path(node.id) {
                Ok(path) => fs::symlink_metadata(path).is_err(),
                Err(_) => true,
            })
            .collect()
    }
}

impl PartialEq for Tree {
    /// Structural equality: same header and same nodes, regardless of order
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .all(|(id, node)| other.nodes.get(id) == Some(node))
    }
}

impl Eq for Tree {}

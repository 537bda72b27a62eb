//! Content grouping across snapshots
//!
//! ## Overview
//!
//! [`DedupEngine`] files the file nodes of one or more [`Tree`]s into
//! [`Group`]s keyed by content digest. Every member remembers the tree it
//! came from, and trees are told apart by their nonce.
//!
//! Two ways of feeding the engine:
//!
//! - [`DedupEngine::add`] creates a group when none exists for the digest
//! - [`DedupEngine::intersect`] only joins groups that already exist
//!
//! Seeding with one tree through `add` and folding others in through
//! `intersect` records only the content the first tree has. After
//! [`DedupEngine::prune_single_tree_groups`] the surviving groups are exactly
//! the content found in more than one tree.
//!
//! Equal digests with different sizes mean the hash cannot be trusted and
//! are reported as [`HashsnapError::HashCollision`].
//!
//! ## Example
//!
//! ```rust
//! use hashsnap::dedup::DedupEngine;
//! use hashsnap::tree::Tree;
//! use hashsnap::types::{Node, SnapshotHeader};
//! use hashsnap::utils::hash_data;
//! use std::path::PathBuf;
//!
//! # fn main() -> hashsnap::Result<()> {
//! let build = |root: &str| -> hashsnap::Result<Tree> {
//!     let mut tree = Tree::new(SnapshotHeader::new(PathBuf::from(root)));
//!     tree.insert(Node::directory(1, 0, "root"))?;
//!     let mut file = Node::file(2, 1, "a.txt", 3);
//!     file.hash = hash_data(b"abc");
//!     tree.insert(file)?;
//!     Ok(tree)
//! };
//! let local = build("/home")?;
//! let backup = build("/mnt/backup")?;
//!
//! let mut engine = DedupEngine::new();
//! engine.add_tree(&local)?;
//! engine.intersect_tree(&backup)?;
//! engine.prune_single_tree_groups();
//!
//! assert_eq!(engine.select(&local).len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::collections::{HashMap, HashSet};
use crate::error::{HashsnapError, Result};
use crate::tree::Tree;
use crate::types::{Digest, Node};
use std::path::PathBuf;
use tracing::{debug, trace};
use uuid::Uuid;

/// A file node together with the tree it belongs to
#[derive(Debug, Clone, Copy)]
pub struct Member<'t> {
    /// Owning tree
    pub tree: &'t Tree,
    /// File node inside `tree`
    pub node: &'t Node,
}

impl<'t> Member<'t> {
    /// Nonce of the owning tree
    pub fn nonce(&self) -> Uuid {
        self.tree.nonce()
    }

    /// Whether this member comes from `tree`
    pub fn belongs_to(&self, tree: &Tree) -> bool {
        self.tree.nonce() == tree.nonce()
    }

    /// Path relative to the owning tree's root
    pub fn rel_path(&self) -> Result<PathBuf> {
        self.tree.rel_path(self.node.id)
    }

    /// Absolute path on disk
    pub fn abs_path(&self) -> Result<PathBuf> {
        self.tree.abs_path(self.node.id)
    }
}

/// Files sharing the same content
#[derive(Debug, Clone)]
pub struct Group<'t> {
    hash: Digest,
    size: u64,
    members: Vec<Member<'t>>,
}

impl<'t> Group<'t> {
    /// Content digest
    pub fn hash(&self) -> Digest {
        self.hash
    }

    /// Size shared by every member
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Members in insertion order
    pub fn members(&self) -> &[Member<'t>] {
        &self.members
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no member
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of distinct trees among the members
    pub fn tree_count(&self) -> usize {
        self.members
            .iter()
            .map(Member::nonce)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Bytes that keeping a single copy would free
    pub fn wasted(&self) -> u64 {
        self.size
            .saturating_mul(self.members.len().saturating_sub(1) as u64)
    }
}

/// Digest keyed grouping of file nodes from several trees
#[derive(Debug, Default)]
pub struct DedupEngine<'t> {
    groups: HashMap<Digest, Group<'t>>,
}

impl<'t> DedupEngine<'t> {
    /// Empty engine
    pub fn new() -> Self {
        Self {
            groups: HashMap::default(),
        }
    }

    fn insert(&mut self, tree: &'t Tree, node: &'t Node, create: bool) -> Result<()> {
        if node.is_dir {
            return Ok(());
        }

        match self.groups.get_mut(&node.hash) {
            Some(group) => {
                if group.size != node.size {
                    return Err(HashsnapError::HashCollision {
                        hash: node.hash.to_hex(),
                        existing_size: group.size,
                        size: node.size,
                    });
                }
                group.members.push(Member { tree, node });
            }
            None if create => {
                self.groups.insert(
                    node.hash,
                    Group {
                        hash: node.hash,
                        size: node.size,
                        members: vec![Member { tree, node }],
                    },
                );
            }
            None => trace!("No group for {}, not recorded", node),
        }
        Ok(())
    }

    /// Record `node`, opening a group for its digest if needed
    ///
    /// Directories are ignored.
    ///
    /// # Errors
    ///
    /// [`HashsnapError::HashCollision`] if the digest is already known with
    /// a different size.
    pub fn add(&mut self, tree: &'t Tree, node: &'t Node) -> Result<()> {
        self.insert(tree, node, true)
    }

    /// Record `node` only if a group for its digest already exists
    ///
    /// # Errors
    ///
    /// [`HashsnapError::HashCollision`] as for [`add`](Self::add).
    pub fn intersect(&mut self, tree: &'t Tree, node: &'t Node) -> Result<()> {
        self.insert(tree, node, false)
    }

    /// [`add`](Self::add) every file of `tree`
    pub fn add_tree(&mut self, tree: &'t Tree) -> Result<()> {
        for node in tree.files() {
            self.add(tree, node)?;
        }
        debug!("Added {} ({} groups)", tree.header(), self.groups.len());
        Ok(())
    }

    /// [`intersect`](Self::intersect) every file of `tree`
    pub fn intersect_tree(&mut self, tree: &'t Tree) -> Result<()> {
        for node in tree.files() {
            self.intersect(tree, node)?;
        }
        debug!("Intersected {} ({} groups)", tree.header(), self.groups.len());
        Ok(())
    }

    /// Drop every group whose members all come from a single tree
    ///
    /// # Returns
    ///
    /// Number of groups dropped, per tree nonce.
    pub fn prune_single_tree_groups(&mut self) -> HashMap<Uuid, usize> {
        let mut pruned: HashMap<Uuid, usize> = HashMap::default();
        self.groups.retain(|_, group| {
            let Some(first) = group.members.first().map(Member::nonce) else {
                return false;
            };
            if group.members.iter().all(|m| m.nonce() == first) {
                *pruned.entry(first).or_default() += 1;
                false
            } else {
                true
            }
        });
        debug!(
            "Pruned {} single tree groups, {} left",
            pruned.values().sum::<usize>(),
            self.groups.len()
        );
        pruned
    }

    /// Nodes of `tree` found in the current groups
    pub fn select(&self, tree: &Tree) -> Vec<&'t Node> {
        self.groups
            .values()
            .flat_map(|g| g.members.iter())
            .filter(|m| m.belongs_to(tree))
            .map(|m| m.node)
            .collect()
    }

    /// Group holding `hash`, if any
    pub fn group(&self, hash: &Digest) -> Option<&Group<'t>> {
        self.groups.get(hash)
    }

    /// Current groups, in no particular order
    pub fn groups(&self) -> impl Iterator<Item = &Group<'t>> + '_ {
        self.groups.values()
    }

    /// Take the groups out of the engine
    pub fn into_groups(self) -> Vec<Group<'t>> {
        self.groups.into_values().collect()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the engine holds no group
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Content present more than once inside a single tree
///
/// Groups come sorted by [`Group::wasted`], largest first.
pub fn duplicates_within(tree: &Tree) -> Result<Vec<Group<'_>>> {
    let mut engine = DedupEngine::new();
    engine.add_tree(tree)?;

    let mut groups: Vec<_> = engine
        .into_groups()
        .into_iter()
        .filter(|g| g.len() > 1)
        .collect();
    groups.sort_by(|a, b| b.wasted().cmp(&a.wasted()).then(a.hash.cmp(&b.hash)));
    Ok(groups)
}

/// Files of `first` whose content appears in none of `others`
///
/// Returned in the tree's insertion order.
pub fn unique_files<'t>(first: &'t Tree, others: &[&'t Tree]) -> Result<Vec<&'t Node>> {
    let mut engine = DedupEngine::new();
    engine.add_tree(first)?;
    for other in others {
        engine.intersect_tree(other)?;
    }

    Ok(first
        .files()
        .filter(|node| {
            engine
                .group(&node.hash)
                .map_or(true, |g| g.members.iter().all(|m| m.belongs_to(first)))
        })
        .collect())
}

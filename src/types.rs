//! Core data types shared by the walker, the codec and the comparison engine
//!
//! ## Overview
//!
//! - [`Node`]: one file or directory entry of a snapshot
//! - [`Digest`]: fixed width SHA-1 content hash
//! - [`SnapshotHeader`]: the single record that opens every snapshot stream
//! - [`EntryMeta`]: what a skip predicate gets to see about a candidate entry
//! - [`SnapshotSummary`]: counters produced when writing or scanning a snapshot
//!
//! ## Examples
//!
//! ```rust
//! use hashsnap::types::{Digest, Node};
//!
//! let dir = Node::directory(1, 0, "photos");
//! let file = Node::file(2, dir.id, "cat.jpg", 1024);
//! assert_eq!(file.parent_id, dir.id);
//! assert_eq!(file.hash, Digest::ZERO);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of a node, unique within one snapshot
///
/// Ids are handed out by [`crate::walker::IdAllocator`] starting at 1.
/// [`NO_PARENT`] marks the root.
pub type NodeId = u64;

/// Parent id carried by the root node
pub const NO_PARENT: NodeId = 0;

/// Size in bytes of a [`Digest`]
pub const DIGEST_LEN: usize = 20;

/// SHA-1 content digest
///
/// Directories carry [`Digest::ZERO`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// All-zero digest used for directories and not yet hashed files
    pub const ZERO: Digest = Digest([0u8; DIGEST_LEN]);

    /// Hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for display
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Whether this is the zero digest
    pub fn is_zero(&self) -> bool {
        *self == Digest::ZERO
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

/// One filesystem entry of a snapshot
///
/// Nodes only know their own base name and the id of the directory holding
/// them. Paths are rebuilt through the owning [`crate::tree::Tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the snapshot
    pub id: NodeId,
    /// Id of the containing directory, [`NO_PARENT`] for the root
    pub parent_id: NodeId,
    /// Base name
    pub name: String,
    /// Whether this entry is a directory
    pub is_dir: bool,
    /// Byte length for files, 0 for directories
    pub size: u64,
    /// Content digest for files, zero for directories
    pub hash: Digest,
}

impl Node {
    /// Create a directory node
    pub fn directory(id: NodeId, parent_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            is_dir: true,
            size: 0,
            hash: Digest::ZERO,
        }
    }

    /// Create a file node whose hash is still to be computed
    pub fn file(id: NodeId, parent_id: NodeId, name: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            is_dir: false,
            size,
            hash: Digest::ZERO,
        }
    }

    /// Whether this node is the root of its snapshot
    pub fn is_root(&self) -> bool {
        self.parent_id == NO_PARENT
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dir {
            write!(f, "{} (in {}) {}/", self.id, self.parent_id, self.name)
        } else {
            write!(
                f,
                "{} (in {}) {} {} bytes {}",
                self.id,
                self.parent_id,
                self.name,
                self.size,
                self.hash.short()
            )
        }
    }
}

/// Header record opening every snapshot stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Format version
    pub version: u32,
    /// Absolute path the snapshot was taken of
    pub root_path: PathBuf,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Random identifier of this snapshot instance
    pub nonce: Uuid,
    /// Host the snapshot was taken on (advisory only)
    pub hostname: String,
}

impl SnapshotHeader {
    /// Create a header for a fresh snapshot of `root_path`
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            version: crate::codec::FORMAT_VERSION,
            root_path,
            created_at: Utc::now(),
            nonce: Uuid::new_v4(),
            hostname: hostname::get()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string()),
        }
    }

    /// Short form of the nonce, for display
    pub fn short_nonce(&self) -> String {
        self.nonce.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for SnapshotHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (v{} {})",
            self.hostname,
            self.root_path.display(),
            self.version,
            self.short_nonce()
        )
    }
}

/// Metadata handed to skip predicates for every candidate entry
///
/// Built from an lstat, so symbolic links are reported as neither
/// directories nor regular files.
#[derive(Debug, Clone, Copy)]
pub struct EntryMeta<'a> {
    /// Base name of the entry
    pub name: &'a str,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Whether the entry is a regular file
    pub is_regular: bool,
    /// Length in bytes
    pub size: u64,
}

/// Counters describing a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Number of directory nodes, root included
    pub directories: u64,
    /// Number of file nodes
    pub files: u64,
    /// Sum of file sizes
    pub total_size: u64,
}

impl SnapshotSummary {
    /// Account for one node
    pub fn record(&mut self, node: &Node) {
        if node.is_dir {
            self.directories += 1;
        } else {
            self.files += 1;
            self.total_size = self.total_size.saturating_add(node.size);
        }
    }

    /// Total number of nodes
    pub fn nodes(&self) -> u64 {
        self.directories + self.files
    }
}

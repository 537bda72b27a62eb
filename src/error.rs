//! Error types for the hashsnap library
//!
//! Errors fall in three families, and callers are expected to react to each
//! family differently:
//!
//! - **Structural** errors mean the data cannot be trusted: an unknown format
//!   version, a node whose parent was never seen, a hash collision, or a trim
//!   that compares a snapshot with itself. They abort the whole operation.
//! - **Per-entry** errors (an unreadable directory, a file that vanished
//!   before it could be hashed, a file that cannot be deleted) never leave the
//!   component that met them. They are logged or reported and the entry is
//!   skipped.
//! - **Setup** errors (output already exists, input cannot be opened) are
//!   fatal to the operation that hit them and leave no output behind.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::NodeId;

/// Type alias for Results in the hashsnap library
pub type Result<T> = std::result::Result<T, HashsnapError>;

/// Main error type for all hashsnap operations
#[derive(Debug, Error)]
pub enum HashsnapError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// The stream does not start with a snapshot preamble
    #[error("Not a snapshot stream (bad magic)")]
    BadMagic,

    /// Header carries a format version this build cannot read
    #[error("Unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the header
        found: u32,
        /// Version understood by this build
        supported: u32,
    },

    /// A node references a parent that has not been decoded yet
    #[error("Node {id} references parent {parent_id} which has not been seen yet")]
    ParentNotSeen {
        /// Offending node
        id: NodeId,
        /// Parent id it points to
        parent_id: NodeId,
    },

    /// Two nodes of the same snapshot share an id
    #[error("Node id {0} appears twice in the same snapshot")]
    DuplicateNodeId(NodeId),

    /// Stream ended in the middle of a record
    #[error("Snapshot stream truncated inside record {record}")]
    TruncatedRecord {
        /// Index of the record being decoded, the header being record 0
        record: u64,
    },

    /// Same content hash, different sizes
    #[error("Hash collision on {hash}: sizes {existing_size} and {size} differ")]
    HashCollision {
        /// Hex encoded digest
        hash: String,
        /// Size already recorded for the group
        existing_size: u64,
        /// Size of the node being inserted
        size: u64,
    },

    /// A trim was asked to compare a snapshot against itself
    #[error("Cannot trim snapshot {0} against itself")]
    SelfTrim(uuid::Uuid),

    /// The same reference snapshot was supplied twice
    #[error("Reference snapshot {0} was supplied more than once")]
    DuplicateReference(uuid::Uuid),

    /// A second node claims to be the root
    #[error("Node {0} is a second root in the same snapshot")]
    MultipleRoots(NodeId),

    /// A node is attached to a file instead of a directory
    #[error("Node {id} has parent {parent_id} which is not a directory")]
    ParentNotDirectory {
        /// Offending node
        id: NodeId,
        /// Parent id it points to
        parent_id: NodeId,
    },

    /// Parent chain of a node never reaches the root
    #[error("Node {0} is disconnected from the root")]
    DisconnectedNode(NodeId),

    /// Node id unknown to the tree
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// The tree has no root node
    #[error("Snapshot has no root node")]
    MissingRoot,

    /// Walk root must be absolute
    #[error("Snapshot root must be an absolute path: {0:?}")]
    RootNotAbsolute(PathBuf),

    /// Root could not be inspected
    #[error("Cannot stat snapshot root {path:?}: {source}")]
    RootUnavailable {
        /// Root path
        path: PathBuf,
        /// Underlying lstat failure
        #[source]
        source: std::io::Error,
    },

    /// Root is not a directory
    #[error("Snapshot root is not a directory: {0:?}")]
    RootNotDirectory(PathBuf),

    /// Refusing to overwrite an existing snapshot
    #[error("Snapshot already exists at {0:?}")]
    SnapshotExists(PathBuf),

    /// Snapshot creation was cancelled before completion
    #[error("Snapshot creation cancelled")]
    Cancelled,

    /// Pattern parsing error
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for HashsnapError {
    fn from(err: bincode::error::DecodeError) -> Self {
        HashsnapError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for HashsnapError {
    fn from(err: bincode::error::EncodeError) -> Self {
        HashsnapError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for HashsnapError {
    fn from(err: globset::Error) -> Self {
        HashsnapError::InvalidPattern(err.to_string())
    }
}

impl HashsnapError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        HashsnapError::Internal(msg.into())
    }

    /// Check if this error means the snapshot data cannot be trusted
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HashsnapError::BadMagic
                | HashsnapError::UnsupportedVersion { .. }
                | HashsnapError::ParentNotSeen { .. }
                | HashsnapError::DuplicateNodeId(_)
                | HashsnapError::MultipleRoots(_)
                | HashsnapError::ParentNotDirectory { .. }
                | HashsnapError::TruncatedRecord { .. }
                | HashsnapError::HashCollision { .. }
                | HashsnapError::SelfTrim(_)
                | HashsnapError::DuplicateReference(_)
                | HashsnapError::DisconnectedNode(_)
                | HashsnapError::MissingRoot
                | HashsnapError::Bincode(_)
        )
    }

    /// Check if this error only concerns a single entry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HashsnapError::Io(_))
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            HashsnapError::SnapshotExists(path) => {
                format!("A snapshot already exists at {:?}. Remove it first or pick another output.", path)
            }
            HashsnapError::UnsupportedVersion { found, .. } => {
                format!("Snapshot was written with format version {}. Upgrade hsnap to read it.", found)
            }
            HashsnapError::SelfTrim(_) | HashsnapError::DuplicateReference(_) => {
                format!("{}. Each reference must be a different snapshot.", self)
            }
            HashsnapError::HashCollision { .. } => {
                format!("{}. Refusing to continue, the snapshots cannot be trusted.", self)
            }
            _ => self.to_string(),
        }
    }
}

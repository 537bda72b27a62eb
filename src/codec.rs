//! Snapshot wire format and storage backends
//!
//! ## Format
//!
//! ```text
//! +----------+-------------+-----------------+--------+--------+-----
//! | MAGIC 8B | version u32 | SnapshotHeader  | Node 1 | Node 2 | ...
//! |          | little end. | (bincode, serde)| (bincode, serde)
//! +----------+-------------+-----------------+--------+--------+-----
//! ```
//!
//! The version sits in front of the header so a reader can refuse a stream
//! before trying to decode a header layout it does not know. Nodes follow in
//! write order, which is directories first (breadth first) and then files.
//! There is no trailer: a clean end of input right after a node record ends
//! the stream, an end of input inside a record is an error.
//!
//! ## Ordering
//!
//! Readers and writers both run every node through the same order check:
//! ids are unique, only one root exists, and a non-root node's parent must
//! already have been seen and be a directory. A stream that breaks any of
//! these is rejected outright.
//!
//! ## Backends
//!
//! [`SnapshotStore`] is the one interface over snapshot storage. [`FileStore`]
//! writes to disk through a temporary file that only takes the final name
//! once the whole stream has been written, so a failed or cancelled write
//! leaves nothing behind. [`MemoryStore`] keeps the encoded bytes in memory.
//!
//! ## Example
//!
//! ```rust
//! use hashsnap::codec::{read_tree, MemoryStore, SnapshotStore};
//! use hashsnap::types::{Node, SnapshotHeader};
//! use std::path::PathBuf;
//!
//! # fn main() -> hashsnap::Result<()> {
//! let header = SnapshotHeader::new(PathBuf::from("/data"));
//! let nodes = vec![Node::directory(1, 0, "data"), Node::file(2, 1, "a.txt", 3)];
//!
//! let mut store = MemoryStore::new();
//! store.write(&header, nodes.into_iter().map(Ok))?;
//!
//! let tree = read_tree(&store)?;
//! assert_eq!(tree.len(), 2);
//! assert_eq!(tree.header().nonce, header.nonce);
//! # Ok(())
//! # }
//! ```

use crate::collections::HashMap;
use crate::error::{HashsnapError, Result};
use crate::tree::Tree;
use crate::types::{Node, NodeId, SnapshotHeader, SnapshotSummary};
use bincode::config::{Configuration, Limit, LittleEndian, Varint};
use bincode::error::DecodeError;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace};

/// Preamble of every snapshot stream
pub const MAGIC: [u8; 8] = *b"HSNAP\0\0\x01";

/// Format version written by this build, the only one it reads
pub const FORMAT_VERSION: u32 = 1;

/// Suffix of the temporary file a [`FileStore`] writes before renaming it
pub const PARTIAL_SUFFIX: &str = ".tmp";

/// Whether `name` is an unfinished write of the state file `state_name`
///
/// A [`FileStore`] for `dir/.hsnap` writes `dir/.hsnap.XXXXXX.tmp` first.
pub fn is_partial_snapshot(name: &str, state_name: &str) -> bool {
    name.strip_prefix(state_name)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|rest| rest.ends_with(PARTIAL_SUFFIX))
}

/// Largest encoded record the reader accepts
const RECORD_LIMIT: usize = 1 << 20;

fn config() -> Configuration<LittleEndian, Varint, Limit<RECORD_LIMIT>> {
    bincode::config::standard().with_limit::<RECORD_LIMIT>()
}

/// Write the preamble and the header record
pub fn write_header<W: Write>(writer: &mut W, header: &SnapshotHeader) -> Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    bincode::serde::encode_into_std_write(header, writer, config())?;
    Ok(())
}

/// Write one node record
pub fn write_node<W: Write>(writer: &mut W, node: &Node) -> Result<()> {
    bincode::serde::encode_into_std_write(node, writer, config())?;
    Ok(())
}

/// Incremental parent-before-child check
///
/// Remembers every id seen so far and whether it is a directory.
#[derive(Debug, Default)]
pub struct OrderCheck {
    seen: HashMap<NodeId, bool>,
    root: Option<NodeId>,
}

impl OrderCheck {
    /// Fresh check with nothing seen
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `node` against everything seen before and remember it
    pub fn check(&mut self, node: &Node) -> Result<()> {
        if self.seen.contains_key(&node.id) {
            return Err(HashsnapError::DuplicateNodeId(node.id));
        }
        if node.is_root() {
            if self.root.is_some() {
                return Err(HashsnapError::MultipleRoots(node.id));
            }
            self.root = Some(node.id);
        } else {
            match self.seen.get(&node.parent_id) {
                None => {
                    return Err(HashsnapError::ParentNotSeen {
                        id: node.id,
                        parent_id: node.parent_id,
                    })
                }
                Some(false) => {
                    return Err(HashsnapError::ParentNotDirectory {
                        id: node.id,
                        parent_id: node.parent_id,
                    })
                }
                Some(true) => {}
            }
        }
        self.seen.insert(node.id, node.is_dir);
        Ok(())
    }
}

/// Whether a decode failure means the input simply ran out
fn is_eof(err: &DecodeError) -> bool {
    match err {
        DecodeError::UnexpectedEnd { .. } => true,
        DecodeError::Io { inner, .. } => inner.kind() == ErrorKind::UnexpectedEof,
        _ => false,
    }
}

/// Streaming snapshot decoder
///
/// Reads the preamble and header on construction, then yields nodes one at
/// a time. Iteration stops after the first error.
pub struct NodeReader<R: BufRead> {
    reader: R,
    header: SnapshotHeader,
    check: OrderCheck,
    /// Index of the next record, the header being record 0
    record: u64,
    done: bool,
}

impl<R: BufRead> NodeReader<R> {
    /// Read the preamble and header from `reader`
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::BadMagic`] if the preamble is missing or wrong
    /// - [`HashsnapError::UnsupportedVersion`] for any version but [`FORMAT_VERSION`]
    /// - [`HashsnapError::TruncatedRecord`] if the header is cut short
    pub fn open(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        match reader.read_exact(&mut magic) {
            Ok(()) if magic == MAGIC => {}
            Ok(()) => return Err(HashsnapError::BadMagic),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(HashsnapError::BadMagic),
            Err(e) => return Err(e.into()),
        }

        let mut version = [0u8; 4];
        reader.read_exact(&mut version).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => HashsnapError::TruncatedRecord { record: 0 },
            _ => e.into(),
        })?;
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(HashsnapError::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let header: SnapshotHeader = bincode::serde::decode_from_std_read(&mut reader, config())
            .map_err(|e| {
                if is_eof(&e) {
                    HashsnapError::TruncatedRecord { record: 0 }
                } else {
                    e.into()
                }
            })?;
        if header.version != FORMAT_VERSION {
            return Err(HashsnapError::UnsupportedVersion {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }

        trace!("Decoded header {}", header);
        Ok(Self {
            reader,
            header,
            check: OrderCheck::new(),
            record: 1,
            done: false,
        })
    }

    /// Header of the stream
    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    fn next_node(&mut self) -> Result<Option<Node>> {
        // Clean end of input between records
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let record = self.record;
        let node: Node = bincode::serde::decode_from_std_read(&mut self.reader, config())
            .map_err(|e| {
                if is_eof(&e) {
                    HashsnapError::TruncatedRecord { record }
                } else {
                    e.into()
                }
            })?;
        self.check.check(&node)?;
        self.record += 1;
        Ok(Some(node))
    }
}

impl<R: BufRead> Iterator for NodeReader<R> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_node() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Encode a full stream into `writer`
///
/// Stops at the first error, whether it comes from `nodes` itself, from the
/// order check or from the writer.
fn encode_stream<W, I>(writer: &mut W, header: &SnapshotHeader, nodes: I) -> Result<SnapshotSummary>
where
    W: Write,
    I: IntoIterator<Item = Result<Node>>,
{
    write_header(writer, header)?;

    let mut check = OrderCheck::new();
    let mut summary = SnapshotSummary::default();
    for node in nodes {
        let node = node?;
        check.check(&node)?;
        write_node(writer, &node)?;
        summary.record(&node);
    }
    writer.flush()?;
    Ok(summary)
}

/// Read and write access to one snapshot
pub trait SnapshotStore {
    /// Decode only the header
    fn read_header(&self) -> Result<SnapshotHeader>;

    /// Open a streaming decoder over the nodes
    fn iter_nodes(&self) -> Result<NodeReader<Box<dyn BufRead + '_>>>;

    /// Encode `header` followed by `nodes`
    ///
    /// Either the whole stream is stored or nothing is. An `Err` item in
    /// `nodes` aborts the write with that error.
    fn write<I>(&mut self, header: &SnapshotHeader, nodes: I) -> Result<SnapshotSummary>
    where
        I: IntoIterator<Item = Result<Node>>;

    /// File name the store writes to on disk, if any
    ///
    /// A snapshot never records this file nor its partial writes.
    fn output_name(&self) -> Option<&str> {
        None
    }
}

/// Snapshot stored in a file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the snapshot file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn open(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.path)?))
    }
}

impl SnapshotStore for FileStore {
    fn output_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    fn read_header(&self) -> Result<SnapshotHeader> {
        Ok(NodeReader::open(self.open()?)?.header)
    }

    fn iter_nodes(&self) -> Result<NodeReader<Box<dyn BufRead + '_>>> {
        NodeReader::open(Box::new(self.open()?) as Box<dyn BufRead>)
    }

    /// Write through a temporary file in the target directory
    ///
    /// # Errors
    ///
    /// [`HashsnapError::SnapshotExists`] if the file is already there, before
    /// or after the stream has been encoded.
    #[instrument(skip(self, header, nodes), fields(path = ?self.path))]
    fn write<I>(&mut self, header: &SnapshotHeader, nodes: I) -> Result<SnapshotSummary>
    where
        I: IntoIterator<Item = Result<Node>>,
    {
        if self.path.exists() {
            return Err(HashsnapError::SnapshotExists(self.path.clone()));
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = match self.path.file_name() {
            Some(name) => format!("{}.", name.to_string_lossy()),
            None => return Err(HashsnapError::InvalidConfiguration(format!(
                "snapshot path {:?} has no file name",
                self.path
            ))),
        };
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(dir)?;

        let mut writer = BufWriter::new(temp);
        let summary = encode_stream(&mut writer, header, nodes)?;
        let temp = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        temp.as_file().sync_all()?;

        temp.persist_noclobber(&self.path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                HashsnapError::SnapshotExists(self.path.clone())
            } else {
                HashsnapError::Io(e.error)
            }
        })?;

        debug!(
            "Wrote {} directories and {} files",
            summary.directories, summary.files
        );
        Ok(summary)
    }
}

/// Snapshot held as encoded bytes in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store over already encoded bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded stream
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn read_header(&self) -> Result<SnapshotHeader> {
        Ok(NodeReader::open(Cursor::new(self.bytes.as_slice()))?.header)
    }

    fn iter_nodes(&self) -> Result<NodeReader<Box<dyn BufRead + '_>>> {
        NodeReader::open(Box::new(Cursor::new(self.bytes.as_slice())) as Box<dyn BufRead + '_>)
    }

    fn write<I>(&mut self, header: &SnapshotHeader, nodes: I) -> Result<SnapshotSummary>
    where
        I: IntoIterator<Item = Result<Node>>,
    {
        let mut buffer = Vec::new();
        let summary = encode_stream(&mut buffer, header, nodes)?;
        self.bytes = buffer;
        Ok(summary)
    }
}

/// Decode a whole snapshot into a [`Tree`]
///
/// Pure fold over the stream, the filesystem is never consulted.
pub fn read_tree<S: SnapshotStore + ?Sized>(store: &S) -> Result<Tree> {
    let mut reader = store.iter_nodes()?;
    let mut tree = Tree::new(reader.header().clone());
    for node in &mut reader {
        tree.insert(node?)?;
    }
    debug!("Decoded {} nodes of {}", tree.len(), tree.header());
    Ok(tree)
}

/// Count directories, files and bytes without building a tree
pub fn summarize<S: SnapshotStore + ?Sized>(store: &S) -> Result<SnapshotSummary> {
    let mut summary = SnapshotSummary::default();
    for node in store.iter_nodes()? {
        summary.record(&node?);
    }
    Ok(summary)
}

/// Store every node of `tree` in insertion order
pub fn write_tree<S: SnapshotStore + ?Sized>(store: &mut S, tree: &Tree) -> Result<SnapshotSummary> {
    store.write(tree.header(), tree.nodes().cloned().map(Ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_PARENT;
    use crate::utils::hash_data;
    use std::fs;
    use tempfile::TempDir;

    fn sample_nodes() -> Vec<Node> {
        let mut file = Node::file(4, 2, "f1.txt", 3);
        file.hash = hash_data(b"abc");
        vec![
            Node::directory(1, NO_PARENT, "root"),
            Node::directory(2, 1, "d1"),
            Node::directory(3, 2, "d2"),
            file,
            Node::file(5, 3, "f2.txt", 9),
        ]
    }

    fn encoded(header: &SnapshotHeader, nodes: &[Node]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_header(&mut bytes, header).unwrap();
        for node in nodes {
            write_node(&mut bytes, node).unwrap();
        }
        bytes
    }

    #[test]
    fn test_memory_round_trip() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let mut store = MemoryStore::new();
        let summary = store
            .write(&header, sample_nodes().into_iter().map(Ok))
            .unwrap();
        assert_eq!(summary.directories, 3);
        assert_eq!(summary.files, 2);

        assert_eq!(store.read_header().unwrap(), header);
        let decoded: Vec<Node> = store.iter_nodes().unwrap().map(|n| n.unwrap()).collect();
        assert_eq!(decoded, sample_nodes());
        assert_eq!(summarize(&store).unwrap(), summary);
    }

    #[test]
    fn test_clean_eof_after_header() {
        let header = SnapshotHeader::new(PathBuf::from("/empty"));
        let store = MemoryStore::from_bytes(encoded(&header, &[]));
        assert_eq!(store.iter_nodes().unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_record() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let mut bytes = encoded(&header, &sample_nodes());
        bytes.truncate(bytes.len() - 3);

        let store = MemoryStore::from_bytes(bytes);
        let results: Vec<_> = store.iter_nodes().unwrap().collect();
        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(matches!(
            results[4],
            Err(HashsnapError::TruncatedRecord { record: 5 })
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let mut bytes = encoded(&header, &[]);
        bytes[MAGIC.len()..MAGIC.len() + 4].copy_from_slice(&7u32.to_le_bytes());

        let store = MemoryStore::from_bytes(bytes);
        assert!(matches!(
            store.read_header(),
            Err(HashsnapError::UnsupportedVersion { found: 7, supported: 1 })
        ));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let store = MemoryStore::from_bytes(b"not a snapshot at all".to_vec());
        assert!(matches!(store.read_header(), Err(HashsnapError::BadMagic)));
        assert!(matches!(
            MemoryStore::new().read_header(),
            Err(HashsnapError::BadMagic)
        ));
    }

    #[test]
    fn test_rejects_parent_not_seen() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let nodes = vec![
            Node::directory(1, NO_PARENT, "root"),
            Node::file(3, 2, "early.txt", 1),
            Node::directory(2, 1, "late"),
        ];
        let store = MemoryStore::from_bytes(encoded(&header, &nodes));

        let err = read_tree(&store).unwrap_err();
        assert!(matches!(err, HashsnapError::ParentNotSeen { id: 3, parent_id: 2 }));
        assert!(err.is_structural());
    }

    #[test]
    fn test_writer_refuses_out_of_order_stream() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let mut store = MemoryStore::new();
        let nodes = vec![Node::file(2, 1, "orphan", 1)];

        assert!(store.write(&header, nodes.into_iter().map(Ok)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.hsnap");
        let header = SnapshotHeader::new(temp_dir.path().to_path_buf());

        let mut store = FileStore::new(&path);
        store.write(&header, sample_nodes().into_iter().map(Ok)).unwrap();
        assert!(store.exists());

        let tree = read_tree(&store).unwrap();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.rel_path(5).unwrap(), PathBuf::from("d1/d2/f2.txt"));
    }

    #[test]
    fn test_file_store_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.hsnap");
        fs::write(&path, "keep me").unwrap();

        let header = SnapshotHeader::new(temp_dir.path().to_path_buf());
        let mut store = FileStore::new(&path);
        let err = store
            .write(&header, sample_nodes().into_iter().map(Ok))
            .unwrap_err();

        assert!(matches!(err, HashsnapError::SnapshotExists(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn test_file_store_leaves_nothing_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.hsnap");
        let header = SnapshotHeader::new(temp_dir.path().to_path_buf());

        let nodes = vec![
            Ok(Node::directory(1, NO_PARENT, "root")),
            Err(HashsnapError::Cancelled),
        ];
        let mut store = FileStore::new(&path);
        assert!(matches!(
            store.write(&header, nodes),
            Err(HashsnapError::Cancelled)
        ));

        assert!(!path.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_tree_round_trip() {
        let header = SnapshotHeader::new(PathBuf::from("/data"));
        let mut tree = Tree::new(header);
        for node in sample_nodes() {
            tree.insert(node).unwrap();
        }

        let mut store = MemoryStore::new();
        write_tree(&mut store, &tree).unwrap();
        assert_eq!(read_tree(&store).unwrap(), tree);
    }
}

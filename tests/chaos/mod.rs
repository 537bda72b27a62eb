//! Chaos testing for hashsnap
//!
//! Damages valid snapshot streams (truncation, flipped bytes, spliced
//! records) and checks the reader rejects them cleanly instead of building
//! a tree that cannot be trusted.

use ::hashsnap::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

/// A small valid snapshot with its record boundaries
struct EncodedSnapshot {
    bytes: Vec<u8>,
    /// Offset right after the header, then after each node
    boundaries: Vec<usize>,
}

fn sample_nodes() -> Vec<Node> {
    let mut nodes = vec![
        Node::directory(1, NO_PARENT, "root"),
        Node::directory(2, 1, "docs"),
        Node::directory(3, 1, "src"),
        Node::directory(4, 3, "nested"),
    ];
    for (i, (parent, name)) in [(2, "readme.md"), (3, "main.rs"), (4, "deep.rs"), (1, "top")]
        .into_iter()
        .enumerate()
    {
        let mut node = Node::file(5 + i as u64, parent, name, 100 * (i as u64 + 1));
        node.hash = utils::hash_data(name.as_bytes());
        nodes.push(node);
    }
    nodes
}

fn encode() -> EncodedSnapshot {
    let header = SnapshotHeader::new(PathBuf::from("/chaos"));
    let mut bytes = Vec::new();
    codec::write_header(&mut bytes, &header).unwrap();
    let mut boundaries = vec![bytes.len()];
    for node in sample_nodes() {
        codec::write_node(&mut bytes, &node).unwrap();
        boundaries.push(bytes.len());
    }
    EncodedSnapshot { bytes, boundaries }
}

#[test]
fn test_every_truncation_point() {
    let encoded = encode();

    for cut in 0..=encoded.bytes.len() {
        let store = MemoryStore::from_bytes(encoded.bytes[..cut].to_vec());
        let result = read_tree(&store);

        match encoded.boundaries.iter().position(|&b| b == cut) {
            Some(nodes) => {
                let tree = result.unwrap_or_else(|e| panic!("cut at {} failed: {}", cut, e));
                assert_eq!(tree.len(), nodes);
            }
            None => match result {
                Err(HashsnapError::TruncatedRecord { .. }) | Err(HashsnapError::BadMagic) => {}
                other => panic!("cut at {} gave {:?}", cut, other.map(|t| t.len())),
            },
        }
    }
}

#[test]
fn test_random_corruption_never_panics() {
    let encoded = encode();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..2000 {
        let mut bytes = encoded.bytes.clone();
        let flips = rng.random_range(1..4);
        for _ in 0..flips {
            let idx = rng.random_range(0..bytes.len());
            bytes[idx] = rng.random();
        }

        let store = MemoryStore::from_bytes(bytes);
        if let Ok(tree) = read_tree(&store) {
            // Whatever survived must still be a consistent tree
            for node in tree.nodes() {
                tree.rel_path(node.id).unwrap();
            }
        }
    }

    // Damage confined to the preamble is always caught
    for idx in 0..8 {
        let mut bytes = encoded.bytes.clone();
        bytes[idx] ^= 0xff;
        assert!(matches!(
            read_tree(&MemoryStore::from_bytes(bytes)),
            Err(HashsnapError::BadMagic)
        ));
    }
}

#[test]
fn test_spliced_records_rejected() {
    let encoded = encode();
    let b = &encoded.boundaries;

    // Drop the "src" directory record: its children now reference an unseen parent
    let mut bytes = encoded.bytes[..b[2]].to_vec();
    bytes.extend_from_slice(&encoded.bytes[b[3]..]);
    assert!(matches!(
        read_tree(&MemoryStore::from_bytes(bytes)),
        Err(HashsnapError::ParentNotSeen { id: 4, parent_id: 3 })
    ));

    // Repeat a record
    let mut bytes = encoded.bytes[..b[2]].to_vec();
    bytes.extend_from_slice(&encoded.bytes[b[1]..b[2]]);
    assert!(matches!(
        read_tree(&MemoryStore::from_bytes(bytes)),
        Err(HashsnapError::DuplicateNodeId(2))
    ));

    // Header followed by a second header
    let mut bytes = encoded.bytes[..b[0]].to_vec();
    bytes.extend_from_slice(&encoded.bytes[..b[0]]);
    assert!(read_tree(&MemoryStore::from_bytes(bytes)).is_err());
}

#[test]
fn test_oversized_length_prefix_rejected() {
    let encoded = encode();
    let b = &encoded.boundaries;

    // A node record claiming a name of several gigabytes
    let mut bytes = encoded.bytes[..b[1]].to_vec();
    bytes.extend_from_slice(&[2, 1]); // id 2, parent 1
    bytes.push(0xfc); // varint u32 marker
    bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    bytes.extend_from_slice(&[b'x'; 16]);

    assert!(read_tree(&MemoryStore::from_bytes(bytes)).is_err());
}

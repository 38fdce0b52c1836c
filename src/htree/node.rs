//! # HTree Node Encoding
//!
//! Nodes are serialized to storage-manager records as big-endian byte
//! blobs. Two node kinds:
//!
//! ```text
//! Internal:
//! Offset  Size  Description
//! ------  ----  ---------------------------
//! 0       1     tag 0x01
//! 1       128   16 child locations (u64)
//!
//! Leaf:
//! Offset  Size  Description
//! ------  ----  ---------------------------
//! 0       1     tag 0x02
//! 1       2     entry count (u16)
//! 3       ...   entries, sorted by (hash, key):
//!               {hash: u64, value: u64, key_len: u16, key bytes}
//! ```
//!
//! Unknown tags and truncated buffers decode to a format error.

use crc::{Crc, CRC_64_XZ};
use eyre::Result;
use smallvec::SmallVec;

use crate::storage::{Location, StorageError};

/// Children per internal node (one per hash nibble).
pub const BRANCH_FACTOR: usize = 16;

/// Entries a leaf holds before it is split.
pub const LEAF_CAPACITY: usize = 8;

/// Maximum nibble depth of the tree (nibbles in a 64-bit hash).
pub const MAX_DEPTH: usize = 16;

const TAG_INTERNAL: u8 = 0x01;
const TAG_LEAF: u8 = 0x02;

const KEY_HASH: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Stable 64-bit hash of a key.
pub fn key_hash(key: &[u8]) -> u64 {
    KEY_HASH.checksum(key)
}

/// Nibble of `hash` consumed at `depth`, most significant first.
pub(crate) fn nibble(hash: u64, depth: usize) -> usize {
    debug_assert!(depth < MAX_DEPTH);
    ((hash >> (60 - 4 * depth)) & 0xF) as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub hash: u64,
    pub value: Location,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal {
        children: [Location; BRANCH_FACTOR],
    },
    Leaf {
        entries: SmallVec<[LeafEntry; LEAF_CAPACITY]>,
    },
}

impl Node {
    pub fn empty_internal() -> Self {
        Node::Internal {
            children: [0; BRANCH_FACTOR],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Internal { children } => {
                let mut buf = Vec::with_capacity(1 + BRANCH_FACTOR * 8);
                buf.push(TAG_INTERNAL);
                for child in children {
                    buf.extend_from_slice(&child.to_be_bytes());
                }
                buf
            }
            Node::Leaf { entries } => {
                let mut buf = Vec::with_capacity(
                    3 + entries.iter().map(|e| 18 + e.key.len()).sum::<usize>(),
                );
                buf.push(TAG_LEAF);
                buf.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                for entry in entries {
                    buf.extend_from_slice(&entry.hash.to_be_bytes());
                    buf.extend_from_slice(&entry.value.to_be_bytes());
                    buf.extend_from_slice(&(entry.key.len() as u16).to_be_bytes());
                    buf.extend_from_slice(&entry.key);
                }
                buf
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let corrupt = |detail: &str| StorageError::Format(format!("index node: {}", detail));

        let Some(&tag) = bytes.first() else {
            return Err(corrupt("empty record").into());
        };

        match tag {
            TAG_INTERNAL => {
                if bytes.len() < 1 + BRANCH_FACTOR * 8 {
                    return Err(corrupt("truncated internal node").into());
                }
                let mut children = [0u64; BRANCH_FACTOR];
                for (i, child) in children.iter_mut().enumerate() {
                    let off = 1 + i * 8;
                    *child = u64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
                }
                Ok(Node::Internal { children })
            }
            TAG_LEAF => {
                if bytes.len() < 3 {
                    return Err(corrupt("truncated leaf node").into());
                }
                let count = u16::from_be_bytes(bytes[1..3].try_into().unwrap()) as usize;

                let mut entries = SmallVec::new();
                let mut off = 3;
                for _ in 0..count {
                    if bytes.len() < off + 18 {
                        return Err(corrupt("truncated leaf entry").into());
                    }
                    let hash = u64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
                    let value = u64::from_be_bytes(bytes[off + 8..off + 16].try_into().unwrap());
                    let key_len =
                        u16::from_be_bytes(bytes[off + 16..off + 18].try_into().unwrap()) as usize;
                    off += 18;
                    if bytes.len() < off + key_len {
                        return Err(corrupt("truncated leaf key").into());
                    }
                    entries.push(LeafEntry {
                        hash,
                        value,
                        key: bytes[off..off + key_len].to_vec(),
                    });
                    off += key_len;
                }
                Ok(Node::Leaf { entries })
            }
            _ => Err(corrupt(&format!("unknown node tag {:#04x}", tag)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn key_hash_is_stable() {
        assert_eq!(key_hash(b"node"), key_hash(b"node"));
        assert_ne!(key_hash(b"node"), key_hash(b"edge"));
    }

    #[test]
    fn nibbles_walk_the_hash_most_significant_first() {
        let hash = 0x1234_5678_9ABC_DEF0;

        assert_eq!(nibble(hash, 0), 0x1);
        assert_eq!(nibble(hash, 1), 0x2);
        assert_eq!(nibble(hash, 15), 0x0);
    }

    #[test]
    fn internal_node_roundtrips() {
        let mut children = [0u64; BRANCH_FACTOR];
        children[0] = 11;
        children[7] = 0xDEAD_BEEF_0000_0001;
        children[15] = u64::MAX;
        let node = Node::Internal { children };

        let decoded = Node::decode(&node.encode()).unwrap();

        assert_eq!(decoded, node);
    }

    #[test]
    fn internal_encoding_is_129_bytes() {
        assert_eq!(Node::empty_internal().encode().len(), 1 + BRANCH_FACTOR * 8);
    }

    #[test]
    fn leaf_node_roundtrips() {
        let node = Node::Leaf {
            entries: smallvec![
                LeafEntry {
                    hash: 1,
                    value: 100,
                    key: b"alpha".to_vec(),
                },
                LeafEntry {
                    hash: 2,
                    value: 200,
                    key: vec![],
                },
            ],
        };

        let decoded = Node::decode(&node.encode()).unwrap();

        assert_eq!(decoded, node);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = Node::decode(&[0x7F, 0, 0]).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Format(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_buffers() {
        assert!(Node::decode(&[]).is_err());
        assert!(Node::decode(&[TAG_INTERNAL, 0, 0]).is_err());
        assert!(Node::decode(&[TAG_LEAF, 0, 1, 5]).is_err());
    }
}

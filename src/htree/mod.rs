//! # HTree Index
//!
//! A persistent hash tree keyed by byte strings, mapping each key to a
//! 64-bit value location. The tree lives entirely inside a
//! [`StorageManager`](crate::storage::StorageManager): internal nodes and
//! leaves are themselves stored records, so the index inherits the
//! manager's durability and location stability.
//!
//! ## Shape
//!
//! The tree has a fixed branching factor of 16. Descent consumes the
//! nibbles of a stable 64-bit key hash (CRC-64/XZ), most significant
//! first, giving a maximum depth of 16. The tree is balanced by hash
//! prefix, not by insertion order: for any key there is at most one path
//! from root to leaf that can match.
//!
//! A leaf holds up to 8 entries sorted by (hash, key). A leaf that
//! overflows is split by promoting one more nibble of depth; a leaf that
//! underflows on removal is left alone. Full-hash collisions at maximum
//! depth are resolved by whole-key comparison inside an oversized leaf.
//!
//! ## Failure Semantics
//!
//! Every storage-manager error propagates with the failing node location
//! attached to the error context.

mod node;
mod tree;

pub use node::{key_hash, LeafEntry, Node, BRANCH_FACTOR, LEAF_CAPACITY, MAX_DEPTH};
pub use tree::{HTree, MAX_KEY_SIZE};

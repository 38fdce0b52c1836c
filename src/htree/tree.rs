//! # HTree Operations
//!
//! Descent-based put/get/remove over the node encoding in [`super::node`].
//! The tree owns its storage manager; callers that need the manager back
//! (to flush or close) take it out with `into_store`.

use eyre::{ensure, Result, WrapErr};
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use crate::storage::{Location, StorageManager};

use super::node::{key_hash, nibble, LeafEntry, Node, LEAF_CAPACITY, MAX_DEPTH};

/// Longest key the tree accepts. Keeps a full leaf within a single
/// storage-manager slot.
pub const MAX_KEY_SIZE: usize = 400;

pub struct HTree<S: StorageManager> {
    store: S,
    root: Location,
}

impl<S: StorageManager> HTree<S> {
    /// Creates a fresh tree inside `store` (one empty internal root node).
    pub fn new(mut store: S) -> Result<Self> {
        let root = store
            .insert(&Node::empty_internal().encode())
            .wrap_err("failed to store index root node")?;
        Ok(Self { store, root })
    }

    /// Binds to an existing tree rooted at `root`.
    pub fn open(store: S, root: Location) -> Self {
        Self { store, root }
    }

    /// Location of the root node; persist this to reopen the tree.
    pub fn root_location(&self) -> Location {
        self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn fetch_node(&mut self, loc: Location) -> Result<Node> {
        let bytes = self
            .store
            .fetch(loc)
            .wrap_err_with(|| format!("failed to fetch index node at location {:#018x}", loc))?;
        Node::decode(&bytes)
            .wrap_err_with(|| format!("failed to decode index node at location {:#018x}", loc))
    }

    fn insert_node(&mut self, node: &Node) -> Result<Location> {
        self.store
            .insert(&node.encode())
            .wrap_err("failed to store index node")
    }

    fn update_node(&mut self, loc: Location, node: &Node) -> Result<()> {
        self.store
            .update(loc, &node.encode())
            .wrap_err_with(|| format!("failed to update index node at location {:#018x}", loc))
    }

    /// Maps `key` to `value`, returning the previously stored value
    /// location if the key was present.
    pub fn put(&mut self, key: &[u8], value: Location) -> Result<Option<Location>> {
        ensure!(!key.is_empty(), "index keys must not be empty");
        ensure!(
            key.len() <= MAX_KEY_SIZE,
            "index key of {} bytes exceeds the maximum of {}",
            key.len(),
            MAX_KEY_SIZE
        );

        let hash = key_hash(key);
        let mut loc = self.root;
        let mut depth = 0;

        loop {
            match self.fetch_node(loc)? {
                Node::Internal { mut children } => {
                    let idx = nibble(hash, depth);
                    if children[idx] == 0 {
                        let leaf = Node::Leaf {
                            entries: smallvec![LeafEntry {
                                hash,
                                value,
                                key: key.to_vec(),
                            }],
                        };
                        children[idx] = self.insert_node(&leaf)?;
                        self.update_node(loc, &Node::Internal { children })?;
                        return Ok(None);
                    }
                    loc = children[idx];
                    depth += 1;
                }
                Node::Leaf { mut entries } => {
                    if let Some(pos) = entries
                        .iter()
                        .position(|e| e.hash == hash && e.key == key)
                    {
                        let old = entries[pos].value;
                        entries[pos].value = value;
                        self.update_node(loc, &Node::Leaf { entries })?;
                        return Ok(Some(old));
                    }

                    let pos = entries
                        .iter()
                        .position(|e| (e.hash, e.key.as_slice()) > (hash, key))
                        .unwrap_or(entries.len());
                    entries.insert(
                        pos,
                        LeafEntry {
                            hash,
                            value,
                            key: key.to_vec(),
                        },
                    );

                    if entries.len() <= LEAF_CAPACITY || depth >= MAX_DEPTH {
                        self.update_node(loc, &Node::Leaf { entries })?;
                        return Ok(None);
                    }

                    // Overflow: promote one more nibble of depth. The leaf
                    // record itself becomes the new internal node, so the
                    // parent pointer stays valid.
                    trace!(loc, depth, "splitting index leaf");
                    let replacement = self.split_entries(entries, depth)?;
                    self.update_node(loc, &replacement)?;
                    return Ok(None);
                }
            }
        }
    }

    /// Distributes overflowing leaf entries one nibble deeper, returning
    /// the internal node that takes the leaf's place.
    fn split_entries(
        &mut self,
        entries: SmallVec<[LeafEntry; LEAF_CAPACITY]>,
        depth: usize,
    ) -> Result<Node> {
        let mut groups: [SmallVec<[LeafEntry; LEAF_CAPACITY]>; 16] =
            std::array::from_fn(|_| SmallVec::new());
        for entry in entries {
            groups[nibble(entry.hash, depth)].push(entry);
        }

        let mut children = [0u64; 16];
        for (idx, group) in groups.into_iter().enumerate() {
            if !group.is_empty() {
                children[idx] = self.subtree_of(group, depth + 1)?;
            }
        }

        Ok(Node::Internal { children })
    }

    fn subtree_of(
        &mut self,
        entries: SmallVec<[LeafEntry; LEAF_CAPACITY]>,
        depth: usize,
    ) -> Result<Location> {
        if entries.len() <= LEAF_CAPACITY || depth >= MAX_DEPTH {
            return self.insert_node(&Node::Leaf { entries });
        }

        let node = self.split_entries(entries, depth)?;
        self.insert_node(&node)
    }

    /// Value location stored for `key`, if any.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Location>> {
        Ok(self.get_value_and_location(key)?.map(|(value, _)| value))
    }

    /// Value location stored for `key` together with the location of the
    /// leaf node holding it.
    pub fn get_value_and_location(
        &mut self,
        key: &[u8],
    ) -> Result<Option<(Location, Location)>> {
        let hash = key_hash(key);
        let mut loc = self.root;
        let mut depth = 0;

        loop {
            match self.fetch_node(loc)? {
                Node::Internal { children } => {
                    let child = children[nibble(hash, depth)];
                    if child == 0 {
                        return Ok(None);
                    }
                    loc = child;
                    depth += 1;
                }
                Node::Leaf { entries } => {
                    return Ok(entries
                        .iter()
                        .find(|e| e.hash == hash && e.key == key)
                        .map(|e| (e.value, loc)));
                }
            }
        }
    }

    /// Removes the mapping for `key`, returning the previously stored
    /// value location. Underflowing leaves are not compacted.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Location>> {
        let hash = key_hash(key);
        let mut loc = self.root;
        let mut depth = 0;

        loop {
            match self.fetch_node(loc)? {
                Node::Internal { children } => {
                    let child = children[nibble(hash, depth)];
                    if child == 0 {
                        return Ok(None);
                    }
                    loc = child;
                    depth += 1;
                }
                Node::Leaf { mut entries } => {
                    let Some(pos) = entries
                        .iter()
                        .position(|e| e.hash == hash && e.key == key)
                    else {
                        return Ok(None);
                    };

                    let old = entries.remove(pos).value;
                    self.update_node(loc, &Node::Leaf { entries })?;
                    return Ok(Some(old));
                }
            }
        }
    }
}

//! In-memory log and map trees that serve real proofs.
//!
//! These mirror the hashing the verifiers expect and generate the inclusion
//! and consistency paths a production log server would, over data small
//! enough to recompute naively on every call.

use std::collections::BTreeMap;

use arpki_merkle::{log, map, LogLeaf, MapLeaf, MapLeafInclusion, Proof};

/// Largest power of two strictly less than `n`; the subtree split point.
fn split_point(n: usize) -> usize {
    n.next_power_of_two() / 2
}

fn tree_hash(leaves: &[Vec<u8>]) -> Vec<u8> {
    match leaves.len() {
        0 => log::empty_root(),
        1 => log::hash_leaf(&leaves[0]),
        n => {
            let split = split_point(n);
            log::hash_children(&tree_hash(&leaves[..split]), &tree_hash(&leaves[split..]))
        }
    }
}

fn inclusion_path(leaves: &[Vec<u8>], index: usize) -> Vec<Vec<u8>> {
    if leaves.len() <= 1 {
        return Vec::new();
    }
    let split = split_point(leaves.len());
    if index < split {
        let mut path = inclusion_path(&leaves[..split], index);
        path.push(tree_hash(&leaves[split..]));
        path
    } else {
        let mut path = inclusion_path(&leaves[split..], index - split);
        path.push(tree_hash(&leaves[..split]));
        path
    }
}

fn consistency_subproof(leaves: &[Vec<u8>], old: usize, complete: bool) -> Vec<Vec<u8>> {
    let n = leaves.len();
    if old == n {
        if complete {
            return Vec::new();
        }
        return vec![tree_hash(leaves)];
    }
    let split = split_point(n);
    if old <= split {
        let mut path = consistency_subproof(&leaves[..split], old, complete);
        path.push(tree_hash(&leaves[split..]));
        path
    } else {
        let mut path = consistency_subproof(&leaves[split..], old - split, false);
        path.push(tree_hash(&leaves[..split]));
        path
    }
}

/// An append-only log over raw leaf values.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    leaves: Vec<Vec<u8>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf value, returning its index.
    pub fn append(&mut self, value: Vec<u8>) -> u64 {
        self.leaves.push(value);
        (self.leaves.len() - 1) as u64
    }

    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn root_hash(&self) -> Vec<u8> {
        tree_hash(&self.leaves)
    }

    /// The leaf at `index` with its Merkle hash, as served to auditors.
    pub fn leaf(&self, index: u64) -> Option<LogLeaf> {
        let value = self.leaves.get(index as usize)?;
        Some(LogLeaf {
            merkle_leaf_hash: log::hash_leaf(value),
            leaf_value: value.clone(),
            extra_data: Vec::new(),
            leaf_index: index,
            leaf_identity_hash: Vec::new(),
        })
    }

    /// Inclusion proof for `index` under the current head.
    pub fn inclusion_proof(&self, index: u64) -> Proof {
        Proof {
            leaf_index: index,
            hashes_list: inclusion_path(&self.leaves, index as usize),
        }
    }

    /// Consistency proof between two sizes of this log.
    pub fn consistency_proof(&self, old: u64, new: u64) -> Proof {
        let hashes_list = if old == 0 || old == new {
            Vec::new()
        } else {
            consistency_subproof(&self.leaves[..new as usize], old as usize, true)
        };
        Proof {
            leaf_index: 0,
            hashes_list,
        }
    }
}

fn bit_from_end(path: &[u8], i: usize) -> u8 {
    let byte = (path.len() * 8 - i - 1) / 8;
    (path[byte] >> (i % 8)) & 0x01
}

const LEFT_MASK: [u8; 8] = [0xff, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

fn mask_index(index: &[u8], depth: usize) -> Vec<u8> {
    let mut masked = vec![0u8; index.len()];
    if depth > 0 {
        let depth_bytes = (depth + 7) >> 3;
        masked[..depth_bytes].copy_from_slice(&index[..depth_bytes]);
        masked[depth_bytes - 1] &= LEFT_MASK[depth % 8];
    }
    masked
}

/// The sibling prefix of `index` at the given height above the leaves.
fn sibling_path(index: &[u8], height: usize) -> Vec<u8> {
    let mut path = mask_index(index, map::MAP_BIT_LEN - height);
    let byte = (path.len() * 8 - height - 1) / 8;
    path[byte] ^= 1 << (height % 8);
    path
}

/// A sparse map over 256-bit indices.
#[derive(Clone)]
pub struct InMemoryMap {
    tree_id: u64,
    leaves: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryMap {
    pub fn new(tree_id: u64) -> Self {
        InMemoryMap {
            tree_id,
            leaves: BTreeMap::new(),
        }
    }

    pub fn tree_id(&self) -> u64 {
        self.tree_id
    }

    pub fn set(&mut self, index: Vec<u8>, value: Vec<u8>) {
        self.leaves.insert(index, value);
    }

    pub fn get(&self, index: &[u8]) -> Option<&Vec<u8>> {
        self.leaves.get(index)
    }

    pub fn indices(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.leaves.keys()
    }

    pub fn root_hash(&self) -> Vec<u8> {
        let leaves: Vec<(Vec<u8>, Vec<u8>)> = self
            .leaves
            .iter()
            .map(|(index, value)| (index.clone(), value.clone()))
            .collect();
        self.subtree_hash(&leaves, &[0u8; 32], 0)
    }

    /// Inclusion (or absence) proof for `index` under the current root, with
    /// empty placeholders for entirely empty sibling branches.
    pub fn inclusion(&self, index: &[u8]) -> MapLeafInclusion {
        let leaves: Vec<(Vec<u8>, Vec<u8>)> = self
            .leaves
            .iter()
            .map(|(leaf_index, value)| (leaf_index.clone(), value.clone()))
            .collect();

        let inclusion_list = (0..map::MAP_BIT_LEN)
            .map(|height| {
                let sibling = sibling_path(index, height);
                let depth = map::MAP_BIT_LEN - height;
                let under: Vec<(Vec<u8>, Vec<u8>)> = leaves
                    .iter()
                    .filter(|(leaf_index, _)| mask_index(leaf_index, depth) == sibling)
                    .cloned()
                    .collect();
                if under.is_empty() {
                    Vec::new()
                } else {
                    self.subtree_hash(&under, &sibling, depth)
                }
            })
            .collect();

        MapLeafInclusion {
            leaf: Some(MapLeaf {
                index: index.to_vec(),
                leaf_hash: Vec::new(),
                leaf_value: self.leaves.get(index).cloned().unwrap_or_default(),
                extra_data: Vec::new(),
            }),
            inclusion_list,
        }
    }

    fn subtree_hash(&self, leaves: &[(Vec<u8>, Vec<u8>)], prefix: &[u8], depth: usize) -> Vec<u8> {
        if leaves.is_empty() {
            return map::hash_empty(self.tree_id, prefix, map::MAP_BIT_LEN - depth);
        }
        if depth == map::MAP_BIT_LEN {
            let (index, value) = &leaves[0];
            return map::hash_leaf(self.tree_id, index, value);
        }
        let branch_height = map::MAP_BIT_LEN - depth - 1;
        let (left, right): (Vec<_>, Vec<_>) = leaves
            .iter()
            .cloned()
            .partition(|(index, _)| bit_from_end(index, branch_height) == 0);

        let left_prefix = prefix.to_vec();
        let mut right_prefix = prefix.to_vec();
        let byte = (right_prefix.len() * 8 - branch_height - 1) / 8;
        right_prefix[byte] |= 1 << (branch_height % 8);

        map::hash_children(
            &self.subtree_hash(&left, &left_prefix, depth + 1),
            &self.subtree_hash(&right, &right_prefix, depth + 1),
        )
    }
}

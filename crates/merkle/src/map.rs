//! Sparse map proof verification (CONIKS hashing, SHA-512/256).
//!
//! A map leaf sits at the end of a 256-bit path derived from its domain.
//! Empty subtrees hash to a value tied to their location and depth, so an
//! inclusion path may carry empty placeholders that the verifier expands
//! lazily; a run of empty levels below the first occupied sibling collapses
//! into a single empty-branch hash.

use sha2::{Digest, Sha512_256};

use crate::error::ProofError;
use crate::types::{MapLeafInclusion, MapRootV1};

/// Byte length of a map node hash.
pub const MAP_HASH_SIZE: usize = 32;

/// Depth of the map in bits.
pub const MAP_BIT_LEN: usize = 256;

const EMPTY_IDENTIFIER: &[u8] = b"E";
const LEAF_IDENTIFIER: &[u8] = b"L";

// Masks for the left `depth % 8` bits of the final byte; 0 is the full byte
// since 8 mod 8 is 0.
const LEFT_MASK: [u8; 8] = [0xff, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

/// `index` with only its left `depth` bits kept.
fn mask_index(index: &[u8], depth: usize) -> Vec<u8> {
    let mut masked = vec![0u8; index.len()];
    if depth > 0 {
        let depth_bytes = (depth + 7) >> 3;
        masked[..depth_bytes].copy_from_slice(&index[..depth_bytes]);
        masked[depth_bytes - 1] &= LEFT_MASK[depth % 8];
    }
    masked
}

/// Hash of an empty branch rooted at `index` at the given height above the
/// leaves: H("E" || tree_id || masked index || depth).
pub fn hash_empty(tree_id: u64, index: &[u8], height: usize) -> Vec<u8> {
    let depth = MAP_BIT_LEN - height;
    let mut hasher = Sha512_256::new();
    hasher.update(EMPTY_IDENTIFIER);
    hasher.update(tree_id.to_be_bytes());
    hasher.update(mask_index(index, depth));
    hasher.update((depth as u32).to_be_bytes());
    hasher.finalize().to_vec()
}

/// Leaf hash: H("L" || tree_id || index || depth || value).
pub fn hash_leaf(tree_id: u64, index: &[u8], leaf_value: &[u8]) -> Vec<u8> {
    let depth = MAP_BIT_LEN;
    let mut hasher = Sha512_256::new();
    hasher.update(LEAF_IDENTIFIER);
    hasher.update(tree_id.to_be_bytes());
    hasher.update(mask_index(index, depth));
    hasher.update((depth as u32).to_be_bytes());
    hasher.update(leaf_value);
    hasher.finalize().to_vec()
}

/// Interior node hash: H(left || right).
pub fn hash_children(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512_256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// A position in the map, as a bit path of `prefix_len_bits` bits.
#[derive(Clone, Debug)]
pub(crate) struct NodeId {
    path: Vec<u8>,
    prefix_len_bits: usize,
}

impl NodeId {
    pub(crate) fn from_hash(hash: &[u8]) -> Self {
        NodeId {
            prefix_len_bits: hash.len() * 8,
            path: hash.to_vec(),
        }
    }

    pub(crate) fn path(&self) -> &[u8] {
        &self.path
    }

    fn path_len_bits(&self) -> usize {
        self.path.len() * 8
    }

    /// Keep only the left `depth` bits of the path.
    pub(crate) fn mask_left(mut self, depth: usize) -> Self {
        self.path = mask_index(&self.path, depth);
        if depth < self.prefix_len_bits {
            self.prefix_len_bits = depth;
        }
        self
    }

    /// Bit `i`, counting from the end of the path.
    pub(crate) fn bit(&self, i: usize) -> u8 {
        let byte = (self.path_len_bits() - i - 1) / 8;
        (self.path[byte] >> (i % 8)) & 0x01
    }

    fn flip_bit(&mut self, i: usize) {
        let byte = (self.path_len_bits() - i - 1) / 8;
        self.path[byte] ^= 1 << (i % 8);
    }

    /// The sibling of this node: the prefix with its last bit flipped.
    pub(crate) fn neighbor(mut self) -> Self {
        let height = self.path_len_bits() - self.prefix_len_bits;
        self.flip_bit(height);
        self
    }

    /// Siblings along the path from the leaf up, ordered by height.
    pub(crate) fn siblings(&self) -> Vec<NodeId> {
        (0..self.prefix_len_bits)
            .map(|height| {
                let depth = self.prefix_len_bits - height;
                self.clone().mask_left(depth).neighbor()
            })
            .collect()
    }
}

/// Verify that `inclusion` proves its leaf (present or absent) under the map
/// head `root`.
pub fn verify_map_leaf_inclusion(
    tree_id: u64,
    root: &MapRootV1,
    inclusion: &MapLeafInclusion,
) -> Result<(), ProofError> {
    verify_map_leaf_inclusion_hash(tree_id, &root.root_hash, inclusion)
}

/// As [`verify_map_leaf_inclusion`], against a bare root hash.
pub fn verify_map_leaf_inclusion_hash(
    tree_id: u64,
    root_hash: &[u8],
    inclusion: &MapLeafInclusion,
) -> Result<(), ProofError> {
    let leaf = inclusion.leaf.as_ref().ok_or(ProofError::MissingMapLeaf)?;
    if leaf.index.len() * 8 != MAP_BIT_LEN {
        return Err(ProofError::BadLength {
            what: "map leaf index",
            expected: MAP_BIT_LEN / 8,
            actual: leaf.index.len(),
        });
    }
    let proof = &inclusion.inclusion_list;
    if proof.len() != MAP_BIT_LEN {
        return Err(ProofError::WrongProofSize {
            expected: MAP_BIT_LEN,
            actual: proof.len(),
        });
    }
    for element in proof {
        if !element.is_empty() && element.len() != MAP_HASH_SIZE {
            return Err(ProofError::BadLength {
                what: "map proof element",
                expected: MAP_HASH_SIZE,
                actual: element.len(),
            });
        }
    }

    // An empty running hash marks a branch that is empty so far; it is
    // expanded into a concrete empty-branch hash only once a non-empty
    // sibling forces a combination, since HashEmpty is location-bound and
    // cannot be built bottom-up from empty children.
    let mut running_hash: Vec<u8> = if leaf.leaf_value.is_empty() {
        Vec::new()
    } else {
        hash_leaf(tree_id, &leaf.index, &leaf.leaf_value)
    };

    let node = NodeId::from_hash(&leaf.index);
    let siblings = node.siblings();
    for (height, sibling) in siblings.iter().enumerate() {
        let element = &proof[height];
        if running_hash.is_empty() && element.is_empty() {
            continue;
        }
        if running_hash.is_empty() {
            let depth = MAP_BIT_LEN - height;
            let empty_branch = node.clone().mask_left(depth);
            running_hash = hash_empty(tree_id, empty_branch.path(), height);
        }
        let element = if element.is_empty() {
            hash_empty(tree_id, sibling.path(), height)
        } else {
            element.clone()
        };

        running_hash = if node.bit(height) == 0 {
            hash_children(&running_hash, &element)
        } else {
            hash_children(&element, &running_hash)
        };
    }

    if running_hash.is_empty() {
        let whole_tree = node.clone().mask_left(0);
        running_hash = hash_empty(tree_id, whole_tree.path(), MAP_BIT_LEN);
    }

    if running_hash != root_hash {
        return Err(ProofError::root_mismatch(root_hash, &running_hash));
    }
    Ok(())
}

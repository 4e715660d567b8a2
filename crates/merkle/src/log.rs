//! Log tree proof verification (RFC 6962 hashing, SHA-256).
//!
//! Inclusion paths decompose into an inner part, whose direction depends on
//! the leaf index bits, and a border part that always hashes from the right.
//! Consistency proofs are verified as a suffix of the inclusion path for the
//! last leaf of the older tree.

use sha2::{Digest, Sha256};

use crate::error::ProofError;
use crate::types::{LogRootV1, Proof};

const LEAF_HASH_PREFIX: u8 = 0;
const NODE_HASH_PREFIX: u8 = 1;

/// Byte length of a node hash.
pub const HASH_SIZE: usize = 32;

/// Root hash of an empty log.
pub fn empty_root() -> Vec<u8> {
    Sha256::digest([]).to_vec()
}

/// Leaf hash: H(0x00 || value).
pub fn hash_leaf(leaf_value: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_HASH_PREFIX]);
    hasher.update(leaf_value);
    hasher.finalize().to_vec()
}

/// Interior node hash: H(0x01 || left || right).
pub fn hash_children(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([NODE_HASH_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

fn bit_len(value: u64) -> usize {
    (u64::BITS - value.leading_zeros()) as usize
}

fn inner_proof_size(index: u64, size: u64) -> usize {
    bit_len(index ^ (size - 1))
}

/// Split an inclusion proof for `index` in a tree of `size` into its inner
/// and border part lengths.
fn decomp_incl_proof(index: u64, size: u64) -> (usize, usize) {
    let inner = inner_proof_size(index, size);
    let border = (index >> inner).count_ones() as usize;
    (inner, border)
}

/// Chain the inner part of a path, picking sides by the index bits.
fn chain_inner(seed: Vec<u8>, proof: &[Vec<u8>], index: u64) -> Vec<u8> {
    let mut result = seed;
    for (i, hash) in proof.iter().enumerate() {
        if (index >> i) & 1 == 0 {
            result = hash_children(&result, hash);
        } else {
            result = hash_children(hash, &result);
        }
    }
    result
}

/// Chain the inner part, using only the right-hand (set-bit) steps.
fn chain_inner_right(seed: Vec<u8>, proof: &[Vec<u8>], index: u64) -> Vec<u8> {
    let mut result = seed;
    for (i, hash) in proof.iter().enumerate() {
        if (index >> i) & 1 == 1 {
            result = hash_children(hash, &result);
        }
    }
    result
}

/// Chain the border part, always hashing from the right.
fn chain_border_right(seed: Vec<u8>, proof: &[Vec<u8>]) -> Vec<u8> {
    let mut result = seed;
    for hash in proof {
        result = hash_children(hash, &result);
    }
    result
}

fn root_from_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    proof: &[Vec<u8>],
    leaf_hash: &[u8],
) -> Result<Vec<u8>, ProofError> {
    if leaf_index >= tree_size {
        return Err(ProofError::IndexBeyondTree {
            index: leaf_index,
            tree_size,
        });
    }
    if leaf_hash.len() != HASH_SIZE {
        return Err(ProofError::BadLength {
            what: "leaf hash",
            expected: HASH_SIZE,
            actual: leaf_hash.len(),
        });
    }

    let (inner, border) = decomp_incl_proof(leaf_index, tree_size);
    if proof.len() != inner + border {
        return Err(ProofError::WrongProofSize {
            expected: inner + border,
            actual: proof.len(),
        });
    }

    let inner_hash = chain_inner(leaf_hash.to_vec(), &proof[..inner], leaf_index);
    Ok(chain_border_right(inner_hash, &proof[inner..]))
}

fn verify_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    proof: &[Vec<u8>],
    root: &[u8],
    leaf_hash: &[u8],
) -> Result<(), ProofError> {
    let calculated = root_from_inclusion_proof(leaf_index, tree_size, proof, leaf_hash)?;
    if calculated != root {
        return Err(ProofError::root_mismatch(root, &calculated));
    }
    Ok(())
}

/// Verify that `leaf_hash` is included in the tree headed by `trusted`.
pub fn verify_inclusion_by_hash(
    trusted: &LogRootV1,
    leaf_hash: &[u8],
    proof: &Proof,
) -> Result<(), ProofError> {
    verify_inclusion_proof(
        proof.leaf_index,
        trusted.tree_size,
        &proof.hashes_list,
        &trusted.root_hash,
        leaf_hash,
    )
}

/// Accept `new_root` as an extension of `trusted`.
///
/// The very first root (trusted tree size 0) is accepted without proof;
/// afterwards a consistency proof between the two snapshots is required.
pub fn verify_root(
    trusted: &LogRootV1,
    new_root: &LogRootV1,
    consistency: &[Vec<u8>],
) -> Result<(), ProofError> {
    if trusted.tree_size != 0 {
        verify_consistency_proof(
            trusted.tree_size,
            new_root.tree_size,
            &trusted.root_hash,
            &new_root.root_hash,
            consistency,
        )?;
    }
    Ok(())
}

/// Verify that the tree of `snapshot2` leaves with hash `root2` is an
/// append-only extension of the tree of `snapshot1` leaves with hash `root1`.
pub fn verify_consistency_proof(
    snapshot1: u64,
    snapshot2: u64,
    root1: &[u8],
    root2: &[u8],
    proof: &[Vec<u8>],
) -> Result<(), ProofError> {
    if snapshot2 < snapshot1 {
        return Err(ProofError::SnapshotsOutOfOrder {
            old: snapshot1,
            new: snapshot2,
        });
    }
    if snapshot1 == snapshot2 {
        if root1 != root2 {
            return Err(ProofError::root_mismatch(root2, root1));
        }
        if !proof.is_empty() {
            return Err(ProofError::UnexpectedProof(proof.len()));
        }
        return Ok(());
    }
    if snapshot1 == 0 {
        if !proof.is_empty() {
            return Err(ProofError::UnexpectedProof(proof.len()));
        }
        return Ok(());
    }
    if proof.is_empty() {
        return Err(ProofError::EmptyProof);
    }

    let (mut inner, border) = decomp_incl_proof(snapshot1 - 1, snapshot2);
    let shift = snapshot1.trailing_zeros() as usize;
    inner -= shift; // shift < inner because snapshot1 < snapshot2

    // The proof starts with the root of the subtree of size 2^shift, unless
    // snapshot1 is exactly that subtree.
    let (seed, start) = if snapshot1 == 1 << shift {
        (root1.to_vec(), 0)
    } else {
        (proof[0].clone(), 1)
    };

    if proof.len() != start + inner + border {
        return Err(ProofError::WrongProofSize {
            expected: start + inner + border,
            actual: proof.len(),
        });
    }
    let proof = &proof[start..];

    // Chain from level |shift| as if proving inclusion of leaf snapshot1-1
    // in a tree of snapshot2 leaves.
    let mask = (snapshot1 - 1) >> shift;

    let hash1 = chain_inner_right(seed.clone(), &proof[..inner], mask);
    let hash1 = chain_border_right(hash1, &proof[inner..]);
    if hash1 != root1 {
        return Err(ProofError::root_mismatch(root1, &hash1));
    }

    let hash2 = chain_inner(seed, &proof[..inner], mask);
    let hash2 = chain_border_right(hash2, &proof[inner..]);
    if hash2 != root2 {
        return Err(ProofError::root_mismatch(root2, &hash2));
    }

    Ok(())
}

/// Compute the root hash over leaves `[0..sub_size)` from an inclusion proof
/// for the leaf at `sub_size - 1` in a tree of `size` leaves with hash
/// `root`. The result is trusted iff `root` is.
pub fn verified_prefix_hash_from_inclusion_proof(
    sub_size: u64,
    size: u64,
    proof: &[Vec<u8>],
    root: &[u8],
    leaf_hash: &[u8],
) -> Result<Vec<u8>, ProofError> {
    if sub_size == 0 {
        return Err(ProofError::EmptyPrefix(sub_size));
    }
    let leaf = sub_size - 1;

    verify_inclusion_proof(leaf, size, proof, root, leaf_hash)?;

    let inner = inner_proof_size(leaf, size);
    let result = chain_inner_right(leaf_hash.to_vec(), &proof[..inner], leaf);
    Ok(chain_border_right(result, &proof[inner..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Largest power of two strictly less than n; the RFC 6962 subtree split.
    fn split_point(n: usize) -> usize {
        n.next_power_of_two() / 2
    }

    // A tiny in-test tree over the given leaf values.
    fn tree_hash(leaves: &[Vec<u8>]) -> Vec<u8> {
        match leaves.len() {
            0 => empty_root(),
            1 => hash_leaf(&leaves[0]),
            n => {
                let split = split_point(n);
                hash_children(&tree_hash(&leaves[..split]), &tree_hash(&leaves[split..]))
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

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("leaf-{i}").into_bytes()).collect()
    }

    fn root_of(leaves: &[Vec<u8>], size: u64) -> LogRootV1 {
        LogRootV1 {
            tree_size: size,
            root_hash: tree_hash(leaves),
            timestamp_nanos: 0,
            revision: size,
            metadata: Vec::new(),
            signature: Vec::new(),
        }
    }

    #[test]
    fn test_inclusion_verifies_for_every_leaf() {
        for size in 1..=8usize {
            let leaves = leaves(size);
            let root = root_of(&leaves, size as u64);
            for index in 0..size {
                let proof = Proof {
                    leaf_index: index as u64,
                    hashes_list: inclusion_path(&leaves, index),
                };
                verify_inclusion_by_hash(&root, &hash_leaf(&leaves[index]), &proof)
                    .unwrap_or_else(|err| panic!("size {size} index {index}: {err}"));
            }
        }
    }

    #[test]
    fn test_inclusion_rejects_wrong_leaf() {
        let leaves = leaves(5);
        let root = root_of(&leaves, 5);
        let proof = Proof {
            leaf_index: 2,
            hashes_list: inclusion_path(&leaves, 2),
        };
        let err = verify_inclusion_by_hash(&root, &hash_leaf(b"not-a-leaf"), &proof).unwrap_err();
        assert!(matches!(err, ProofError::RootMismatch { .. }));
    }

    #[test]
    fn test_inclusion_rejects_index_beyond_tree() {
        let leaves = leaves(3);
        let root = root_of(&leaves, 3);
        let proof = Proof {
            leaf_index: 3,
            hashes_list: Vec::new(),
        };
        assert!(matches!(
            verify_inclusion_by_hash(&root, &hash_leaf(&leaves[0]), &proof),
            Err(ProofError::IndexBeyondTree { .. })
        ));
    }

    // Consistency proof for old size m in a tree of n leaves, as served by
    // the log: the inclusion path of leaf m-1 filtered to the nodes the old
    // tree cannot compute itself.
    fn consistency_path(leaves: &[Vec<u8>], old: u64, new: u64) -> Vec<Vec<u8>> {
        fn subproof(leaves: &[Vec<u8>], m: u64, complete: bool) -> Vec<Vec<u8>> {
            let n = leaves.len() as u64;
            if m == n {
                if complete {
                    return Vec::new();
                }
                return vec![tree_hash(leaves)];
            }
            let split = split_point(n as usize) as u64;
            if m <= split {
                let mut path = subproof(&leaves[..split as usize], m, complete);
                path.push(tree_hash(&leaves[split as usize..]));
                path
            } else {
                let mut path = subproof(&leaves[split as usize..], m - split, false);
                path.push(tree_hash(&leaves[..split as usize]));
                path
            }
        }
        if old == 0 || old == new {
            return Vec::new();
        }
        subproof(&leaves[..new as usize], old, true)
    }

    #[test]
    fn test_consistency_verifies_for_every_growth() {
        let all = leaves(8);
        for old in 1..=8u64 {
            for new in old..=8u64 {
                let proof = consistency_path(&all, old, new);
                verify_consistency_proof(
                    old,
                    new,
                    &tree_hash(&all[..old as usize]),
                    &tree_hash(&all[..new as usize]),
                    &proof,
                )
                .unwrap_or_else(|err| panic!("{old} -> {new}: {err}"));
            }
        }
    }

    #[test]
    fn test_consistency_rejects_rewritten_history() {
        let honest = leaves(6);
        let mut forked = leaves(6);
        forked[1] = b"rewritten".to_vec();

        let proof = consistency_path(&forked, 4, 6);
        let err = verify_consistency_proof(
            4,
            6,
            &tree_hash(&honest[..4]),
            &tree_hash(&forked),
            &proof,
        )
        .unwrap_err();
        assert!(matches!(err, ProofError::RootMismatch { .. }));
    }

    #[test]
    fn test_consistency_equal_sizes_require_equal_roots() {
        let all = leaves(4);
        let root = tree_hash(&all);
        assert!(verify_consistency_proof(4, 4, &root, &root, &[]).is_ok());
        assert!(matches!(
            verify_consistency_proof(4, 4, &root, &tree_hash(&all[..3]), &[]),
            Err(ProofError::RootMismatch { .. })
        ));
    }

    #[test]
    fn test_first_root_is_trusted_without_proof() {
        let all = leaves(3);
        let genesis = LogRootV1 {
            tree_size: 0,
            root_hash: empty_root(),
            timestamp_nanos: 0,
            revision: 0,
            metadata: Vec::new(),
            signature: Vec::new(),
        };
        let new_root = root_of(&all, 3);
        assert!(verify_root(&genesis, &new_root, &[]).is_ok());
    }

    #[test]
    fn test_prefix_hash_recovers_smaller_root() {
        let all = leaves(7);
        for sub in 1..=7u64 {
            let index = (sub - 1) as usize;
            let proof = inclusion_path(&all, index);
            let prefix = verified_prefix_hash_from_inclusion_proof(
                sub,
                7,
                &proof,
                &tree_hash(&all),
                &hash_leaf(&all[index]),
            )
            .unwrap_or_else(|err| panic!("sub {sub}: {err}"));
            assert_eq!(prefix, tree_hash(&all[..sub as usize]), "sub {sub}");
        }
    }

    #[test]
    fn test_prefix_hash_rejects_bad_proof() {
        let all = leaves(5);
        let mut proof = inclusion_path(&all, 2);
        proof[0] = vec![0u8; HASH_SIZE];
        assert!(verified_prefix_hash_from_inclusion_proof(
            3,
            5,
            &proof,
            &tree_hash(&all),
            &hash_leaf(&all[2]),
        )
        .is_err());
    }
}

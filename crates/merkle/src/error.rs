//! Proof verification errors.

/// Why a Merkle proof failed to verify.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// A recomputed root hash did not match the expected one.
    #[error("root mismatch: expected {expected}, got {actual}")]
    RootMismatch { expected: String, actual: String },

    /// The proof has the wrong number of hashes for the claimed tree shape.
    #[error("wrong proof size {actual}, want {expected}")]
    WrongProofSize { expected: usize, actual: usize },

    /// The leaf index lies outside the claimed tree.
    #[error("leaf index {index} is beyond tree size {tree_size}")]
    IndexBeyondTree { index: u64, tree_size: u64 },

    /// A hash or index has an unexpected byte length.
    #[error("{what} has length {actual}, want {expected}")]
    BadLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The two snapshots of a consistency proof are not ordered.
    #[error("snapshot {new} is older than trusted snapshot {old}")]
    SnapshotsOutOfOrder { old: u64, new: u64 },

    /// A proof was supplied where none is allowed.
    #[error("expected empty proof, but got {0} components")]
    UnexpectedProof(usize),

    /// A proof was required but none was supplied.
    #[error("empty proof")]
    EmptyProof,

    /// The subtree size for a prefix hash must be positive.
    #[error("subtree size is {0}, want > 0")]
    EmptyPrefix(u64),

    /// A map inclusion arrived without its leaf.
    #[error("map inclusion is missing its leaf")]
    MissingMapLeaf,

    /// A leaf value could not be decoded.
    #[error("malformed leaf value: {0}")]
    MalformedLeaf(#[from] serde_json::Error),
}

impl ProofError {
    pub(crate) fn root_mismatch(expected: &[u8], actual: &[u8]) -> Self {
        ProofError::RootMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }
}

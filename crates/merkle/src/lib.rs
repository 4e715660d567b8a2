//! Merkle proof verification for the certificate logs.
//!
//! Certificates live in two trees per certificate type: an append-only log
//! (RFC 6962 hashing) and a sparse map (CONIKS hashing) keyed by domain.
//! This crate verifies inclusion and consistency proofs for both and defines
//! the leaf formats that tie a log entry to the map leaf it must produce.

pub mod log;
pub mod map;

mod error;
mod types;

pub use error::ProofError;
pub use types::{
    build_log_leaf, build_log_leaf_for_entry, build_map_leaf, build_map_leaf_from_log_leaf,
    map_index, LogEntry, LogLeaf, LogRootV1, MapEntry, MapLeaf, MapLeafInclusion, MapRootV1,
    Operation, Proof,
};

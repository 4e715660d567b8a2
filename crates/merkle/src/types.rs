//! Tree heads, proofs and leaf formats.
//!
//! Roots and proofs keep the field naming of the log server's API. Leaf
//! values are canonical JSON so every participant recomputes identical
//! hashes from the same entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use arpki_types::{canonical_json, wire};

use crate::error::ProofError;
use crate::log;

/// A signed head of an append-only log tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRootV1 {
    #[serde(with = "wire::u64_string")]
    pub tree_size: u64,
    #[serde(with = "wire::b64")]
    pub root_hash: Vec<u8>,
    #[serde(with = "wire::u64_string")]
    pub timestamp_nanos: u64,
    #[serde(with = "wire::u64_string")]
    pub revision: u64,
    #[serde(with = "wire::b64")]
    pub metadata: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub signature: Vec<u8>,
}

/// A signed head of a sparse map tree, bound to the log revision it was
/// derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapRootV1 {
    #[serde(with = "wire::b64")]
    pub root_hash: Vec<u8>,
    #[serde(with = "wire::u64_string")]
    pub timestamp_nanos: u64,
    #[serde(with = "wire::u64_string")]
    pub revision: u64,
    pub log_root: LogRootV1,
    #[serde(with = "wire::b64")]
    pub signature: Vec<u8>,
}

/// An inclusion or consistency path through a log tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(with = "wire::u64_string")]
    pub leaf_index: u64,
    #[serde(with = "wire::b64_list")]
    pub hashes_list: Vec<Vec<u8>>,
}

/// One appended log entry together with its Merkle leaf hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLeaf {
    #[serde(with = "wire::b64")]
    pub merkle_leaf_hash: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub leaf_value: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub extra_data: Vec<u8>,
    #[serde(with = "wire::u64_string")]
    pub leaf_index: u64,
    #[serde(with = "wire::b64")]
    pub leaf_identity_hash: Vec<u8>,
}

/// One map leaf, addressed by the hash of its domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapLeaf {
    #[serde(with = "wire::b64")]
    pub index: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub leaf_hash: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub leaf_value: Vec<u8>,
    #[serde(with = "wire::b64")]
    pub extra_data: Vec<u8>,
}

/// A map leaf with its inclusion path. An empty entry in `inclusion_list`
/// stands for an entirely empty subtree at that level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapLeafInclusion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf: Option<MapLeaf>,
    #[serde(with = "wire::b64_list")]
    pub inclusion_list: Vec<Vec<u8>>,
}

/// What a log entry did to its domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// The decoded value of a log leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub domain: String,
    pub cert: String,
    pub operation: Operation,
}

/// The decoded value of a map leaf. `cert` is empty after a delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub domain: String,
    pub cert: String,
}

/// Map leaf index for a domain: SHA-256 over the domain name.
pub fn map_index(domain: &str) -> Vec<u8> {
    Sha256::digest(domain.as_bytes()).to_vec()
}

/// Wrap raw entry bytes into a log leaf with its Merkle hash.
pub fn build_log_leaf_for_entry(data: Vec<u8>) -> LogLeaf {
    LogLeaf {
        merkle_leaf_hash: log::hash_leaf(&data),
        leaf_value: data,
        extra_data: Vec::new(),
        leaf_index: 0,
        leaf_identity_hash: Vec::new(),
    }
}

/// Build the log leaf recording `operation` on `domain` with the serialized
/// certificate `cert`.
pub fn build_log_leaf(
    domain: &str,
    cert: String,
    operation: Operation,
) -> Result<LogLeaf, ProofError> {
    let entry = LogEntry {
        domain: domain.to_owned(),
        cert,
        operation,
    };
    let data = canonical_json(&entry)?.into_bytes();
    Ok(build_log_leaf_for_entry(data))
}

/// Build the map leaf for `domain`, empty-valued when the certificate was
/// deleted.
pub fn build_map_leaf(domain: &str, cert: String) -> Result<MapLeaf, ProofError> {
    let entry = MapEntry {
        domain: domain.to_owned(),
        cert,
    };
    Ok(MapLeaf {
        index: map_index(domain),
        leaf_hash: Vec::new(),
        leaf_value: canonical_json(&entry)?.into_bytes(),
        extra_data: Vec::new(),
    })
}

/// Derive the map leaf a log leaf must have produced. A delete clears the
/// certificate, a create or update carries it over.
pub fn build_map_leaf_from_log_leaf(log_leaf: &LogLeaf) -> Result<MapLeaf, ProofError> {
    let entry: LogEntry = serde_json::from_slice(&log_leaf.leaf_value)?;
    let cert = match entry.operation {
        Operation::Create | Operation::Update => entry.cert,
        Operation::Delete => String::new(),
    };
    build_map_leaf(&entry.domain, cert)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_index_is_domain_hash() {
        let index = map_index("app.example.org");
        assert_eq!(index.len(), 32);
        assert_eq!(index, map_index("app.example.org"));
        assert_ne!(index, map_index("other.example.org"));
    }

    #[test]
    fn test_log_leaf_hash_covers_entry() {
        let a = build_log_leaf("d", "{}".into(), Operation::Create).unwrap();
        let b = build_log_leaf("d", "{}".into(), Operation::Delete).unwrap();
        assert_ne!(a.merkle_leaf_hash, b.merkle_leaf_hash);
    }

    #[test]
    fn test_delete_clears_map_leaf_value() {
        let log_leaf = build_log_leaf("d", "{\"cert\":1}".into(), Operation::Delete).unwrap();
        let map_leaf = build_map_leaf_from_log_leaf(&log_leaf).unwrap();

        let entry: MapEntry = serde_json::from_slice(&map_leaf.leaf_value).unwrap();
        assert_eq!(entry.domain, "d");
        assert!(entry.cert.is_empty());
    }

    #[test]
    fn test_update_keeps_cert_in_map_leaf() {
        let log_leaf = build_log_leaf("d", "{\"cert\":1}".into(), Operation::Update).unwrap();
        let map_leaf = build_map_leaf_from_log_leaf(&log_leaf).unwrap();

        let entry: MapEntry = serde_json::from_slice(&map_leaf.leaf_value).unwrap();
        assert_eq!(entry.cert, "{\"cert\":1}");
        assert_eq!(map_leaf.index, map_index("d"));
    }

    #[test]
    fn test_root_wire_format() {
        let root = LogRootV1 {
            tree_size: 5,
            root_hash: vec![1, 2, 3],
            timestamp_nanos: 99,
            revision: 2,
            metadata: Vec::new(),
            signature: Vec::new(),
        };
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["TreeSize"], "5");
        assert_eq!(json["Revision"], "2");

        let back: LogRootV1 = serde_json::from_value(json).unwrap();
        assert_eq!(back, root);
    }
}

//! Participant directory metadata.
//!
//! Every party is addressed by URL; a participant's entry carries its role,
//! its signing key, and (for log servers) the trees it maintains.

use serde::{Deserialize, Serialize};

use crate::{wire, CertificateType, PublicKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Ca,
    Ils,
    Monitor,
    Publisher,
    Auditor,
}

/// Whether a tree is an append-only log or the sparse map derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Log,
    Map,
}

/// One tree a log server maintains. Each certificate type gets its own
/// log/map pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeInfo {
    #[serde(with = "wire::u64_string")]
    pub tree_id: u64,
    pub kind: TreeKind,
    pub cert_type: CertificateType,
    pub public_key: PublicKey,
}

/// A directory entry for one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub role: ParticipantRole,
    pub url: String,
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trees: Vec<TreeInfo>,
}

impl ParticipantInfo {
    pub fn tree(&self, kind: TreeKind, cert_type: CertificateType) -> Option<&TreeInfo> {
        self.trees
            .iter()
            .find(|tree| tree.kind == kind && tree.cert_type == cert_type)
    }

    pub fn log_tree(&self, cert_type: CertificateType) -> Option<&TreeInfo> {
        self.tree(TreeKind::Log, cert_type)
    }

    pub fn map_tree(&self, cert_type: CertificateType) -> Option<&TreeInfo> {
        self.tree(TreeKind::Map, cert_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn ils_info() -> ParticipantInfo {
        let key = KeyPair::from_seed(&[9u8; 32]).public_key();
        ParticipantInfo {
            role: ParticipantRole::Ils,
            url: "ils.example.org".into(),
            public_key: key,
            trees: vec![
                TreeInfo {
                    tree_id: 11,
                    kind: TreeKind::Log,
                    cert_type: CertificateType::PublisherCertificate,
                    public_key: key,
                },
                TreeInfo {
                    tree_id: 12,
                    kind: TreeKind::Map,
                    cert_type: CertificateType::PublisherCertificate,
                    public_key: key,
                },
            ],
        }
    }

    #[test]
    fn test_tree_lookup_by_kind_and_type() {
        let info = ils_info();
        assert_eq!(
            info.log_tree(CertificateType::PublisherCertificate)
                .map(|tree| tree.tree_id),
            Some(11)
        );
        assert_eq!(
            info.map_tree(CertificateType::PublisherCertificate)
                .map(|tree| tree.tree_id),
            Some(12)
        );
        assert!(info
            .log_tree(CertificateType::ApplicationCertificate)
            .is_none());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(&ils_info()).unwrap();
        assert_eq!(json["role"], "ils");
        assert_eq!(json["trees"][0]["treeId"], "11");
    }

    #[test]
    fn test_trees_default_to_empty() {
        let back: ParticipantInfo = serde_json::from_str(
            r#"{"role":"ca","url":"ca1.example.org","publicKey":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="}"#,
        )
        .unwrap();
        assert_eq!(back.role, ParticipantRole::Ca);
        assert!(back.trees.is_empty());
    }
}

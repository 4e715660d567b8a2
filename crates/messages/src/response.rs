//! Response messages.
//!
//! Every response echoes the request it answers and its nonce, and carries a
//! nonce signature over the whole response: the innermost layer is the log
//! server's signature over the response with the `nonceSignature` field
//! removed, and each CA that relays the response wraps it one layer deeper.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arpki_merkle::{LogLeaf, MapLeafInclusion, MapRootV1, Proof};
use arpki_types::{canonical_value, ArpkiCert, CryptoError, MultiSignature, Signature};

use crate::request::{
    AuditRequest, GenerateRequest, GetRequest, ModificationRequest, RootRequest,
    SynchronizationCommit, SynchronizationRequest,
};

/// Canonical value of a response with its `nonceSignature` field removed;
/// what the log server's innermost nonce signature covers.
pub fn nonce_payload<T: Serialize>(response: &T) -> Result<Value, CryptoError> {
    let mut value = canonical_value(response)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("nonceSignature");
    }
    Ok(value)
}

/// A CA's signature over a certificate draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub nonce: u64,
    pub request: GenerateRequest,
    pub cert_signature: Signature,
    pub nonce_signature: MultiSignature,
}

/// The primary log server's answer to a synchronized modification,
/// countersigned by every relaying CA on its way back to the requester.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationResponse {
    pub nonce: u64,
    pub request: ModificationRequest,
    /// Nested attestation that every listed party accepted the certificate.
    pub acceptance_confirmation: MultiSignature,
    /// Map head after the modification was applied.
    pub root: MapRootV1,
    pub root_signature: MultiSignature,
    /// Log consistency from the previous revision to `root`.
    pub consistency_proof: Proof,
    pub consistency_proof_signature: Signature,
    /// Inclusion of the new log entry under `root`'s log head.
    pub log_proof: Proof,
    pub log_proof_signature: Signature,
    /// Inclusion of the updated map leaf under `root`.
    pub map_proof: MapLeafInclusion,
    pub map_proof_signature: Signature,
    /// One acknowledgement per secondary log server.
    pub acknowledgements: Vec<SynchronizationAcknowledge>,
    pub nonce_signature: MultiSignature,
}

/// A secondary log server's answer to a synchronization request: the hash it
/// will commit once the acceptance confirmation arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationResponse {
    pub nonce: u64,
    pub request: SynchronizationRequest,
    pub hash: String,
    pub nonce_signature: MultiSignature,
}

/// A secondary log server's proof that it applied a committed modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationAcknowledge {
    pub nonce: u64,
    pub request: SynchronizationCommit,
    pub acceptance_confirmation: MultiSignature,
    pub root: MapRootV1,
    pub root_signature: MultiSignature,
    pub consistency_proof: Proof,
    pub consistency_proof_signature: Signature,
    pub log_proof: Proof,
    pub log_proof_signature: Signature,
    pub map_proof: MapLeafInclusion,
    pub map_proof_signature: Signature,
    pub nonce_signature: MultiSignature,
}

/// Certificate lookup result with its map inclusion proof; `cert` is absent
/// when the domain has no registered certificate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub nonce: u64,
    pub request: GetRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<ArpkiCert>,
    pub proof: MapLeafInclusion,
    pub proof_signature: Signature,
    pub root: MapRootV1,
    pub root_signature: MultiSignature,
    pub nonce_signature: MultiSignature,
}

/// A map head at the requested revision. When served by a CA on behalf of a
/// log server it names the independent CAs that vouched for it; when served
/// with `old_revision` set it carries the consistency proof between the two
/// log heads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub nonce: u64,
    pub request: RootRequest,
    pub root: MapRootV1,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_proof: Option<Proof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cas: Option<Vec<String>>,
    pub nonce_signature: MultiSignature,
}

/// Everything appended to a log since a revision, with the proofs a monitor
/// needs to replay it against the map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub nonce: u64,
    pub request: AuditRequest,
    /// Log leaves appended since the requested revision, in log order.
    pub leaves: Vec<LogLeaf>,
    pub leaves_signature: Signature,
    /// One inclusion proof per leaf under the new log head.
    pub log_proofs: Vec<Proof>,
    pub log_proofs_signature: Signature,
    /// Log consistency from the requested revision to the new head.
    pub consistency_proof: Proof,
    pub consistency_proof_signature: Signature,
    /// Map inclusion for the leaf each log entry must have produced.
    pub map_proofs: Vec<MapLeafInclusion>,
    pub map_proofs_signature: Signature,
    pub root: MapRootV1,
    pub root_signature: MultiSignature,
    pub nonce_signature: MultiSignature,
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpki_merkle::LogRootV1;
    use arpki_types::{CertificateType, KeyPair};

    fn map_root() -> MapRootV1 {
        MapRootV1 {
            root_hash: vec![1; 32],
            timestamp_nanos: 0,
            revision: 1,
            log_root: LogRootV1 {
                tree_size: 1,
                root_hash: vec![2; 32],
                timestamp_nanos: 0,
                revision: 1,
                metadata: Vec::new(),
                signature: Vec::new(),
            },
            signature: Vec::new(),
        }
    }

    #[test]
    fn test_nonce_payload_strips_nonce_signature() {
        let keypair = KeyPair::from_seed(&[6u8; 32]);
        let response = RootResponse {
            nonce: 3,
            request: RootRequest {
                nonce: 3,
                cert_type: CertificateType::PublisherCertificate,
                ils: "ils.example.org".into(),
                revision: 1,
                old_revision: None,
            },
            root: map_root(),
            consistency_proof: None,
            cas: None,
            nonce_signature: MultiSignature::leaf(keypair.sign(b"n")),
        };

        let payload = nonce_payload(&response).unwrap();
        assert!(payload.get("nonceSignature").is_none());
        assert_eq!(payload["nonce"], 3);
    }

    #[test]
    fn test_optional_fields_absent_from_wire() {
        let keypair = KeyPair::from_seed(&[6u8; 32]);
        let response = RootResponse {
            nonce: 1,
            request: RootRequest {
                nonce: 1,
                cert_type: CertificateType::PublisherCertificate,
                ils: "ils.example.org".into(),
                revision: 1,
                old_revision: None,
            },
            root: map_root(),
            consistency_proof: None,
            cas: None,
            nonce_signature: MultiSignature::leaf(keypair.sign(b"n")),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("consistencyProof"));
        assert!(!json.contains("\"cas\""));

        let back: RootResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }
}

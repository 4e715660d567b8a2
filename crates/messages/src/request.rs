//! Request messages.
//!
//! Requester-signed requests carry their signature over the canonical JSON
//! of the request with the `signature` field removed; [`signing_payload`]
//! computes that form for both signing and verification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arpki_merkle::Operation;
use arpki_types::{
    canonical_value, wire, ArpkiCert, Certificate, CertificateType, CryptoError, KeyPair,
    MultiSignature, PublicKey, Signature,
};

/// Canonical value of a message with its `signature` field removed; what a
/// requester actually signs.
pub fn signing_payload<T: Serialize>(message: &T) -> Result<Value, CryptoError> {
    let mut value = canonical_value(message)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("signature");
    }
    Ok(value)
}

/// A certificate awaiting CA signatures: an [`ArpkiCert`] minus the
/// `signatures` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDraft {
    #[serde(flatten)]
    pub cert: Certificate,
    pub ilses: Vec<String>,
    pub cas: Vec<String>,
    pub ca_min: usize,
}

impl CertificateDraft {
    /// Attach the collected CA signatures, completing the certificate.
    pub fn into_cert(self, signatures: Vec<Signature>) -> ArpkiCert {
        ArpkiCert {
            cert: self.cert,
            ilses: self.ilses,
            cas: self.cas,
            ca_min: self.ca_min,
            signatures,
        }
    }
}

/// Ask a CA to sign a certificate draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub nonce: u64,
    pub cert: CertificateDraft,
    pub signature: Signature,
}

impl GenerateRequest {
    pub fn new(cert: CertificateDraft, nonce: u64, keypair: &KeyPair) -> Result<Self, CryptoError> {
        let mut request = GenerateRequest {
            nonce,
            cert,
            signature: Signature::from_bytes(Vec::new()),
        };
        request.signature = keypair.sign_payload(&signing_payload(&request)?)?;
        Ok(request)
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        match signing_payload(self) {
            Ok(payload) => key.verify_payload(&payload, &self.signature),
            Err(_) => false,
        }
    }
}

/// Register, update or delete a certificate. Dispatched by the requester to
/// the first listed CA, which runs the synchronization round for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub operation: Operation,
    pub nonce: u64,
    pub cert: ArpkiCert,
    pub signature: Signature,
}

impl ModificationRequest {
    pub fn new(
        operation: Operation,
        cert: ArpkiCert,
        nonce: u64,
        keypair: &KeyPair,
    ) -> Result<Self, CryptoError> {
        let mut request = ModificationRequest {
            operation,
            nonce,
            cert,
            signature: Signature::from_bytes(Vec::new()),
        };
        request.signature = keypair.sign_payload(&signing_payload(&request)?)?;
        Ok(request)
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        match signing_payload(self) {
            Ok(payload) => key.verify_payload(&payload, &self.signature),
            Err(_) => false,
        }
    }
}

/// Forward a modification request from the first CA to the primary log
/// server, signed by the forwarding CA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationRequest {
    pub nonce: u64,
    pub request: ModificationRequest,
    pub signature: Signature,
}

impl SynchronizationRequest {
    pub fn new(
        request: ModificationRequest,
        nonce: u64,
        keypair: &KeyPair,
    ) -> Result<Self, CryptoError> {
        let mut wrapped = SynchronizationRequest {
            nonce,
            request,
            signature: Signature::from_bytes(Vec::new()),
        };
        wrapped.signature = keypair.sign_payload(&signing_payload(&wrapped)?)?;
        Ok(wrapped)
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        match signing_payload(self) {
            Ok(payload) => key.verify_payload(&payload, &self.signature),
            Err(_) => false,
        }
    }
}

/// Commit a synchronized modification on the secondary log servers once the
/// acceptance confirmation has been collected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationCommit {
    pub nonce: u64,
    pub acceptance_confirmation: MultiSignature,
    pub hash: String,
    pub signature: Signature,
}

impl SynchronizationCommit {
    pub fn new(
        acceptance_confirmation: MultiSignature,
        hash: String,
        nonce: u64,
        keypair: &KeyPair,
    ) -> Result<Self, CryptoError> {
        let mut commit = SynchronizationCommit {
            nonce,
            acceptance_confirmation,
            hash,
            signature: Signature::from_bytes(Vec::new()),
        };
        commit.signature = keypair.sign_payload(&signing_payload(&commit)?)?;
        Ok(commit)
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        match signing_payload(self) {
            Ok(payload) => key.verify_payload(&payload, &self.signature),
            Err(_) => false,
        }
    }
}

/// Look up the current certificate for a domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequest {
    pub nonce: u64,
    pub domain: String,
    pub cas: Vec<String>,
    pub ils: String,
    pub cert_type: CertificateType,
}

/// Fetch a signed map root at a revision, optionally with a consistency
/// proof from an older revision the requester already trusts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootRequest {
    pub nonce: u64,
    pub cert_type: CertificateType,
    pub ils: String,
    #[serde(with = "wire::u64_string")]
    pub revision: u64,
    #[serde(default, with = "wire::opt_u64_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_revision: Option<u64>,
}

/// Fetch everything appended to a log since a revision, for audit replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub nonce: u64,
    pub cert_type: CertificateType,
    pub cas: Vec<String>,
    pub ils: String,
    #[serde(with = "wire::u64_string")]
    pub since_revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpki_types::{PublisherCertificate, Validity, CA_MIN};

    fn draft() -> CertificateDraft {
        CertificateDraft {
            cert: Certificate::PublisherCertificate(PublisherCertificate {
                version: 1,
                domains: vec!["app.example.org".into()],
                subject: "example-publisher".into(),
                subject_public_key: KeyPair::from_seed(&[1u8; 32]).public_key(),
                validity: Validity {
                    not_before: 0,
                    not_after: 1_000,
                },
                expected_lifetime: 2_000,
            }),
            ilses: vec!["ils.example.org".into()],
            cas: vec!["ca1.example.org".into(), "ca2.example.org".into()],
            ca_min: CA_MIN,
        }
    }

    #[test]
    fn test_signing_payload_strips_signature() {
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let request = GenerateRequest::new(draft(), 7, &keypair).unwrap();

        let payload = signing_payload(&request).unwrap();
        assert!(payload.get("signature").is_none());
        assert_eq!(payload["nonce"], 7);
    }

    #[test]
    fn test_request_signature_verifies() {
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let request =
            ModificationRequest::new(Operation::Create, draft().into_cert(vec![]), 1, &keypair)
                .unwrap();
        assert!(request.verify(&keypair.public_key()));
        assert!(!request.verify(&KeyPair::from_seed(&[5u8; 32]).public_key()));
    }

    #[test]
    fn test_tampered_request_fails_verification() {
        let keypair = KeyPair::from_seed(&[4u8; 32]);
        let mut request =
            ModificationRequest::new(Operation::Create, draft().into_cert(vec![]), 1, &keypair)
                .unwrap();
        request.nonce += 1;
        assert!(!request.verify(&keypair.public_key()));
    }

    #[test]
    fn test_root_request_omits_absent_old_revision() {
        let request = RootRequest {
            nonce: 1,
            cert_type: CertificateType::PublisherCertificate,
            ils: "ils.example.org".into(),
            revision: 4,
            old_revision: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("oldRevision"));

        let back: RootRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}

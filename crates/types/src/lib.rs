//! Core types for the ARPKI protocol.
//!
//! Certificates, recursive multi-signatures, participant metadata and the
//! canonical JSON form every signature in the system is computed over.

mod canonical;
mod cert;
mod crypto;
mod multisig;
mod participant;
pub mod wire;

pub use canonical::{canonical_json, canonical_value};
pub use cert::{
    ApplicationCertificate, ArpkiCert, AuditProperty, AuditionCertificate, Certificate,
    CertificateType, PublisherCertificate, RegisteredCert, Resource, Validity, CA_MIN,
};
pub use crypto::{fingerprint, CryptoError, KeyPair, PublicKey, Signature};
pub use multisig::{MultiSignature, MultiSignatureError};
pub use participant::{ParticipantInfo, ParticipantRole, TreeInfo, TreeKind};

//! Certificate formats.
//!
//! A plain [`Certificate`] is what a requester submits. Once a quorum of CAs
//! has countersigned it, it becomes an [`ArpkiCert`] carrying the accountable
//! party lists and their signatures; once a log server has accepted it, a
//! [`RegisteredCert`] additionally carries the nested acceptance confirmation
//! proving every listed party attested the registration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MultiSignature, PublicKey, Signature};

/// Lower bound on `caMin` accepted anywhere in the system.
pub const CA_MIN: usize = 2;

/// Time window during which a certificate is valid, in unix milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub not_before: u64,
    pub not_after: u64,
}

/// A deployed artifact bound to its content hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_url: String,
    pub content_hash: String,
}

/// A property an auditor vouches for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditProperty {
    pub property: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<Value>>,
}

/// A publisher's identity certificate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherCertificate {
    pub version: u32,
    pub domains: Vec<String>,
    pub subject: String,
    pub subject_public_key: PublicKey,
    pub validity: Validity,
    pub expected_lifetime: u64,
}

/// A certificate for one deployed application version, signed by its
/// registered publisher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCertificate {
    pub deployment_version: u32,
    pub application_url: String,
    pub resources: Vec<Resource>,
    pub publisher: Box<RegisteredCert>,
    pub signature: Signature,
    pub validity: Validity,
}

/// An auditor's attestation over a specific application version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditionCertificate {
    pub application: String,
    pub application_version: u32,
    pub auditor: Box<RegisteredCert>,
    pub resources: Vec<Resource>,
    pub signature: Signature,
    pub methods: Vec<String>,
    pub properties: Vec<AuditProperty>,
    pub validity: Validity,
}

/// Any certificate the system registers, discriminated on the wire by its
/// `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Certificate {
    PublisherCertificate(PublisherCertificate),
    ApplicationCertificate(ApplicationCertificate),
    AuditionCertificate(AuditionCertificate),
}

/// Discriminant of [`Certificate`], used to select the tree pair a
/// certificate lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateType {
    PublisherCertificate,
    ApplicationCertificate,
    AuditionCertificate,
}

impl Certificate {
    /// The domain this certificate is registered under, which keys its map
    /// leaf.
    pub fn domain(&self) -> &str {
        match self {
            Certificate::PublisherCertificate(cert) => &cert.subject,
            Certificate::ApplicationCertificate(cert) => &cert.application_url,
            Certificate::AuditionCertificate(cert) => &cert.application,
        }
    }

    pub fn cert_type(&self) -> CertificateType {
        match self {
            Certificate::PublisherCertificate(_) => CertificateType::PublisherCertificate,
            Certificate::ApplicationCertificate(_) => CertificateType::ApplicationCertificate,
            Certificate::AuditionCertificate(_) => CertificateType::AuditionCertificate,
        }
    }
}

/// A certificate bound to its accountable parties: the log servers that will
/// maintain it, the CAs that vouch for it (at least `caMin` of which must
/// stay honest), and one signature per listed CA over the inner certificate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArpkiCert {
    #[serde(flatten)]
    pub cert: Certificate,
    pub ilses: Vec<String>,
    pub cas: Vec<String>,
    pub ca_min: usize,
    pub signatures: Vec<Signature>,
}

impl ArpkiCert {
    pub fn domain(&self) -> &str {
        self.cert.domain()
    }

    pub fn cert_type(&self) -> CertificateType {
        self.cert.cert_type()
    }
}

/// An [`ArpkiCert`] together with the acceptance confirmation collected when
/// it was synchronized into the logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCert {
    #[serde(flatten)]
    pub cert: ArpkiCert,
    pub acceptance_confirmation: MultiSignature,
}

impl RegisteredCert {
    pub fn domain(&self) -> &str {
        self.cert.domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn publisher_cert() -> Certificate {
        Certificate::PublisherCertificate(PublisherCertificate {
            version: 1,
            domains: vec!["app.example.org".into()],
            subject: "example-publisher".into(),
            subject_public_key: KeyPair::from_seed(&[1u8; 32]).public_key(),
            validity: Validity {
                not_before: 0,
                not_after: 1_000_000,
            },
            expected_lifetime: 2_000_000,
        })
    }

    #[test]
    fn test_type_tag_on_the_wire() {
        let json = serde_json::to_value(publisher_cert()).unwrap();
        assert_eq!(json["type"], "PublisherCertificate");
        assert_eq!(json["subject"], "example-publisher");

        let back: Certificate = serde_json::from_value(json).unwrap();
        assert_eq!(back, publisher_cert());
    }

    #[test]
    fn test_domain_per_certificate_kind() {
        assert_eq!(publisher_cert().domain(), "example-publisher");
        assert_eq!(
            publisher_cert().cert_type(),
            CertificateType::PublisherCertificate
        );
    }

    #[test]
    fn test_arpki_cert_flattens_inner_fields() {
        let keypair = KeyPair::from_seed(&[2u8; 32]);
        let arpki = ArpkiCert {
            cert: publisher_cert(),
            ilses: vec!["ils.example.org".into()],
            cas: vec!["ca1.example.org".into(), "ca2.example.org".into()],
            ca_min: CA_MIN,
            signatures: vec![keypair.sign(b"a"), keypair.sign(b"b")],
        };

        let json = serde_json::to_value(&arpki).unwrap();
        assert_eq!(json["type"], "PublisherCertificate");
        assert_eq!(json["caMin"], 2);
        assert_eq!(json["subject"], "example-publisher");

        let back: ArpkiCert = serde_json::from_value(json).unwrap();
        assert_eq!(back, arpki);
    }

    #[test]
    fn test_registered_cert_roundtrip() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);
        let registered = RegisteredCert {
            cert: ArpkiCert {
                cert: publisher_cert(),
                ilses: vec!["ils.example.org".into()],
                cas: vec!["ca1.example.org".into(), "ca2.example.org".into()],
                ca_min: CA_MIN,
                signatures: vec![keypair.sign(b"a")],
            },
            acceptance_confirmation: MultiSignature::leaf(keypair.sign(b"accept"))
                .wrap(keypair.sign(b"ca")),
        };

        let json = serde_json::to_string(&registered).unwrap();
        assert!(json.contains("acceptanceConfirmation"));
        let back: RegisteredCert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registered);
    }
}

//! Signature chain and participant list verification.
//!
//! Responses and acceptance confirmations carry [`MultiSignature`] chains:
//! the innermost layer is a log server's signature over the protocol
//! payload, and every party that relays or attests wraps the chain one layer
//! deeper by signing the canonical JSON of the chain it received. Verifying
//! means peeling the layers against a known, ordered participant list; a
//! depth that does not match the list fails outright.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use arpki_messages::nonce_payload;
use arpki_types::{
    canonical_value, ArpkiCert, KeyPair, MultiSignature, MultiSignatureError, ParticipantRole,
    PublicKey, CA_MIN,
};

use crate::error::ProtocolError;

/// Check a certificate's accountable-party lists against the verifier's
/// trusted sets. When the verifier is itself a CA or log server it must be
/// listed, otherwise it has no business handling the certificate.
pub fn verify_participants(
    cas: &[String],
    ilses: &[String],
    ca_min: usize,
    trusted_cas: &[String],
    trusted_ilses: &[String],
    own: Option<(ParticipantRole, &str)>,
) -> Result<(), ProtocolError> {
    let required = ca_min.max(CA_MIN);
    if cas.len() < required {
        return Err(ProtocolError::invalid(
            "participants",
            format!("{} CAs listed, at least {required} required", cas.len()),
        ));
    }
    let unique_cas: HashSet<&String> = cas.iter().collect();
    if unique_cas.len() != cas.len() {
        return Err(ProtocolError::invalid("participants", "duplicate CA"));
    }
    for ca in cas {
        if !trusted_cas.contains(ca) {
            return Err(ProtocolError::invalid(
                "participants",
                format!("untrusted CA {ca}"),
            ));
        }
    }

    if ilses.is_empty() {
        return Err(ProtocolError::invalid(
            "participants",
            "no log server listed",
        ));
    }
    let unique_ilses: HashSet<&String> = ilses.iter().collect();
    if unique_ilses.len() != ilses.len() {
        return Err(ProtocolError::invalid(
            "participants",
            "duplicate log server",
        ));
    }
    for ils in ilses {
        if !trusted_ilses.contains(ils) {
            return Err(ProtocolError::invalid(
                "participants",
                format!("untrusted log server {ils}"),
            ));
        }
    }

    match own {
        Some((ParticipantRole::Ca, url)) if !cas.iter().any(|ca| ca == url) => Err(
            ProtocolError::invalid("participants", format!("{url} is not a listed CA")),
        ),
        Some((ParticipantRole::Ils, url)) if !ilses.iter().any(|ils| ils == url) => Err(
            ProtocolError::invalid("participants", format!("{url} is not a listed log server")),
        ),
        _ => Ok(()),
    }
}

/// Verify a multi-signature chain: one wrapping layer per key in
/// `wrapping_keys` (outermost first), then the innermost layer's signature
/// over `payload` with `leaf_key`.
pub fn verify_multi_signature(
    multi: &MultiSignature,
    payload: &Value,
    wrapping_keys: &[PublicKey],
    leaf_key: &PublicKey,
) -> Result<(), ProtocolError> {
    let mut current = multi;
    for (layer, key) in wrapping_keys.iter().enumerate() {
        let inner = current
            .data
            .as_deref()
            .ok_or(MultiSignatureError::TooShallow {
                expected: wrapping_keys.len() + 1,
                actual: layer + 1,
            })?;
        if !key.verify_payload(inner, &current.signature) {
            return Err(ProtocolError::BadSignature("confirmation layer"));
        }
        current = inner;
    }
    if current.data.is_some() {
        return Err(MultiSignatureError::TooDeep {
            expected: wrapping_keys.len() + 1,
        }
        .into());
    }
    if !leaf_key.verify_payload(payload, &current.signature) {
        return Err(ProtocolError::BadSignature("confirmation"));
    }
    Ok(())
}

/// Whether a JSON value looks like a serialized [`MultiSignature`].
pub(crate) fn is_multi_signature_value(value: &Value) -> bool {
    match value.as_object() {
        Some(object) => {
            object.contains_key("signature")
                && object.keys().all(|key| key == "signature" || key == "data")
        }
        None => false,
    }
}

/// Verify a response's nonce signature.
///
/// The log server signed the response before any CA relayed it, so every
/// top-level multi-signature field is rewound by one layer per relaying CA
/// to recover the form the server actually signed, and the nonce signature
/// chain itself must carry exactly one wrapping layer per relaying CA over
/// the server's innermost signature.
pub fn verify_nonce_signature<T: Serialize>(
    response: &T,
    nonce_signature: &MultiSignature,
    wrapping_keys: &[PublicKey],
    server_key: &PublicKey,
) -> Result<(), ProtocolError> {
    let mut payload = nonce_payload(response)?;
    if let Some(object) = payload.as_object_mut() {
        for value in object.values_mut() {
            if is_multi_signature_value(value) {
                let multi: MultiSignature = serde_json::from_value(value.clone())?;
                let rewound = multi.unwrap_layers(wrapping_keys.len())?;
                *value = canonical_value(rewound)?;
            }
        }
    }
    verify_multi_signature(nonce_signature, &payload, wrapping_keys, server_key)
}

/// Verify an acceptance confirmation in its final form: outermost the
/// certificate's CAs in list order, then the secondary log servers in
/// reverse synchronization order, innermost the head log server over the
/// certificate itself. A publisher that countersigned the confirmation adds
/// one more outer layer.
pub fn verify_acceptance_confirmation(
    acceptance: &MultiSignature,
    cert: &ArpkiCert,
    ca_keys: &[PublicKey],
    ils_keys: &[PublicKey],
    publisher_key: Option<&PublicKey>,
) -> Result<(), ProtocolError> {
    let (head_key, secondary_keys) = ils_keys
        .split_first()
        .ok_or_else(|| ProtocolError::invalid("participants", "no log server listed"))?;

    let mut wrapping_keys = Vec::with_capacity(ca_keys.len() + secondary_keys.len() + 1);
    if let Some(key) = publisher_key {
        wrapping_keys.push(*key);
    }
    wrapping_keys.extend_from_slice(ca_keys);
    wrapping_keys.extend(secondary_keys.iter().rev());

    let payload = canonical_value(cert)?;
    verify_multi_signature(acceptance, &payload, &wrapping_keys, head_key)
}

/// Verify a certificate's CA signatures: one per listed CA, each over the
/// certificate with its `signatures` list removed.
pub fn verify_arpki_cert(cert: &ArpkiCert, ca_keys: &[PublicKey]) -> Result<(), ProtocolError> {
    if cert.signatures.len() != cert.cas.len() || ca_keys.len() != cert.cas.len() {
        return Err(ProtocolError::invalid(
            "certificate",
            format!(
                "{} signatures for {} CAs",
                cert.signatures.len(),
                cert.cas.len()
            ),
        ));
    }
    let mut payload = canonical_value(cert)?;
    if let Some(object) = payload.as_object_mut() {
        object.remove("signatures");
    }
    for (key, signature) in ca_keys.iter().zip(&cert.signatures) {
        if !key.verify_payload(&payload, signature) {
            return Err(ProtocolError::BadSignature("certificate"));
        }
    }
    Ok(())
}

/// The key that must have signed a request concerning this certificate: the
/// publisher's own key, or for derived certificates the key of the
/// registered identity embedded in them.
pub fn requester_key(cert: &arpki_types::Certificate) -> Result<&PublicKey, ProtocolError> {
    use arpki_types::Certificate;
    let identity = match cert {
        Certificate::PublisherCertificate(cert) => return Ok(&cert.subject_public_key),
        Certificate::ApplicationCertificate(cert) => &cert.publisher.cert.cert,
        Certificate::AuditionCertificate(cert) => &cert.auditor.cert.cert,
    };
    match identity {
        Certificate::PublisherCertificate(publisher) => Ok(&publisher.subject_public_key),
        _ => Err(ProtocolError::invalid(
            "certificate",
            "embedded identity is not a publisher certificate",
        )),
    }
}

/// Sign a response's nonce signature leaf: the server's signature over the
/// response with `nonceSignature` removed.
pub fn sign_nonce<T: Serialize>(
    keypair: &KeyPair,
    response: &T,
) -> Result<MultiSignature, ProtocolError> {
    let payload = nonce_payload(response)?;
    Ok(MultiSignature::leaf(keypair.sign_payload(&payload)?))
}

/// Wrap a multi-signature chain one layer deeper: sign the canonical JSON of
/// the chain as received.
pub fn wrap_multi_signature(
    keypair: &KeyPair,
    multi: MultiSignature,
) -> Result<MultiSignature, ProtocolError> {
    let signature = keypair.sign_payload(&multi)?;
    Ok(multi.wrap(signature))
}

//! Requester-side operations: collecting CA signatures on a certificate,
//! registering it through the relay chain, and looking certificates up.

use futures::future::try_join_all;
use tracing::debug;

use arpki_merkle::Operation;
use arpki_messages::{
    CertificateDraft, GenerateRequest, GetRequest, Message, ModificationRequest,
};
use arpki_types::{ArpkiCert, CertificateType, KeyPair, RegisteredCert, Signature};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::get::verify_get_response;
use crate::modification::verify_modification_response;
use crate::storage::TreeRootStore;
use crate::verification::verify_nonce_signature;

/// A fresh request nonce.
pub fn create_nonce() -> u64 {
    rand::random()
}

/// Collect one signature per listed CA over `draft`, in parallel, and
/// assemble the certificate.
pub async fn generate_certificate(
    directory: &dyn Directory,
    transport: &dyn Transport,
    keypair: &KeyPair,
    draft: CertificateDraft,
) -> Result<ArpkiCert, ProtocolError> {
    let tasks = draft.cas.iter().map(|ca| {
        let draft = &draft;
        async move {
            let ca_info = directory.lookup(ca).await?;
            let request = GenerateRequest::new(draft.clone(), create_nonce(), keypair)?;
            let nonce = request.nonce;
            let response = match transport
                .send(ca, Message::GenerateRequest(request))
                .await?
            {
                Some(Message::GenerateResponse(response)) => response,
                _ => return Err(ProtocolError::UnexpectedResponse("generate request")),
            };
            if response.nonce != nonce {
                return Err(ProtocolError::BadNonce);
            }
            verify_nonce_signature(
                &response,
                &response.nonce_signature,
                &[],
                &ca_info.public_key,
            )?;
            if !ca_info
                .public_key
                .verify_payload(draft, &response.cert_signature)
            {
                return Err(ProtocolError::BadSignature("certificate"));
            }
            Ok::<Signature, ProtocolError>(response.cert_signature)
        }
    });
    let signatures = try_join_all(tasks).await?;
    debug!(cas = draft.cas.len(), "certificate signatures collected");
    Ok(draft.into_cert(signatures))
}

/// Register, update or delete a certificate through its first listed CA and
/// verify the fully countersigned response.
pub async fn modify_certificate(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    keypair: &KeyPair,
    cert: ArpkiCert,
    operation: Operation,
) -> Result<RegisteredCert, ProtocolError> {
    let first_ca = cert
        .cas
        .first()
        .cloned()
        .ok_or_else(|| ProtocolError::invalid("certificate", "no CA listed"))?;
    let request = ModificationRequest::new(operation, cert, create_nonce(), keypair)?;

    let response = match transport
        .send(&first_ca, Message::ModificationRequest(request.clone()))
        .await?
    {
        Some(Message::ModificationResponse(response)) => response,
        _ => return Err(ProtocolError::UnexpectedResponse("modification request")),
    };
    if response.nonce != request.nonce {
        return Err(ProtocolError::BadNonce);
    }
    if response.request != request {
        return Err(ProtocolError::invalid(
            "modification response",
            "echoed request differs",
        ));
    }
    let wrapping_cas = request.cert.cas.clone();
    verify_modification_response(
        directory,
        transport,
        roots,
        own_url,
        &response,
        &wrapping_cas,
    )
    .await?;
    debug!(domain = request.cert.domain(), ?operation, "modification confirmed");

    Ok(RegisteredCert {
        cert: response.request.cert.clone(),
        acceptance_confirmation: response.acceptance_confirmation.clone(),
    })
}

/// Look up the registered certificate for a domain, verifying the map proof
/// against a root resolved through independent CAs.
pub async fn fetch_certificate(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    domain: &str,
    cert_type: CertificateType,
    cas: Vec<String>,
    ils: String,
) -> Result<Option<ArpkiCert>, ProtocolError> {
    let first_ca = cas
        .first()
        .cloned()
        .ok_or_else(|| ProtocolError::invalid("get request", "no CA listed"))?;
    let request = GetRequest {
        nonce: create_nonce(),
        domain: domain.to_owned(),
        cas,
        ils,
        cert_type,
    };

    let response = match transport
        .send(&first_ca, Message::GetRequest(request.clone()))
        .await?
    {
        Some(Message::GetResponse(response)) => response,
        _ => return Err(ProtocolError::UnexpectedResponse("get request")),
    };
    if response.nonce != request.nonce {
        return Err(ProtocolError::BadNonce);
    }
    if response.request != request {
        return Err(ProtocolError::invalid(
            "get response",
            "echoed request differs",
        ));
    }
    verify_get_response(
        directory,
        transport,
        roots,
        own_url,
        &response,
        &request.cas,
    )
    .await?;

    Ok(response.cert.clone())
}

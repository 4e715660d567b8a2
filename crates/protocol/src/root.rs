//! Trusted root resolution.
//!
//! Whenever a participant is shown a map root it resolves it against the
//! root it last trusted for that log server. A root that comes with a
//! consistency proof is verified directly; one that does not is fetched
//! again from the log server and cross-checked with independent CAs before
//! it is trusted. Either way a root is only adopted as an append-only
//! extension of the previous one.

use futures::future::try_join_all;
use tracing::{debug, warn};

use arpki_merkle::{log, MapRootV1, Proof};
use arpki_messages::{Message, RootRequest, RootResponse};
use arpki_types::CertificateType;

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::operations::create_nonce;
use crate::storage::TreeRootStore;
use crate::verification::verify_nonce_signature;

/// Resolve `asserted` against the stored root for `(ils, cert_type)`.
///
/// Returns the root proofs should be verified against. A root that advanced
/// past the stored one with a valid consistency proof is returned without
/// being persisted; the caller persists it once the proofs it guards have
/// also been checked. All other paths persist internally.
pub async fn resolve_current_root(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    ils: &str,
    cert_type: CertificateType,
    asserted: &MapRootV1,
    consistency_proof: Option<&Proof>,
) -> Result<MapRootV1, ProtocolError> {
    let cached = roots.get(ils, cert_type, None);
    let Some(cached) = cached else {
        // Nothing trusted yet. A consistency proof can only anchor to a
        // previous root, so with none stored a pushed root is trusted on
        // first use, as is the revision-zero root of a tree nobody has
        // written to; a pulled root is cross-checked with independent CAs.
        if consistency_proof.is_some() || asserted.revision == 0 {
            debug!(ils, ?cert_type, revision = asserted.revision, "trusting first root");
            return Ok(asserted.clone());
        }
        let root =
            request_root(directory, transport, own_url, ils, cert_type, asserted, None).await?;
        roots.set(ils, cert_type, root.clone());
        return Ok(root);
    };

    if asserted.revision < cached.revision {
        return Err(ProtocolError::ConsistencyViolation(format!(
            "root revision {} is behind the trusted revision {}",
            asserted.revision, cached.revision
        )));
    }
    if asserted.revision == cached.revision {
        if consistency_proof.is_some() {
            return Err(ProtocolError::invalid(
                "root",
                "consistency proof for an unchanged revision",
            ));
        }
        return Ok(cached);
    }

    match consistency_proof {
        Some(proof) => {
            match log::verify_root(&cached.log_root, &asserted.log_root, &proof.hashes_list) {
                Ok(()) => Ok(asserted.clone()),
                Err(err) => {
                    // The pushed proof did not check out; derive the root
                    // independently, then hold the pushed proof against it.
                    warn!(ils, %err, "pushed consistency proof rejected, re-deriving root");
                    let root = request_root(
                        directory,
                        transport,
                        own_url,
                        ils,
                        cert_type,
                        asserted,
                        Some(&cached),
                    )
                    .await?;
                    log::verify_root(&cached.log_root, &root.log_root, &proof.hashes_list)?;
                    roots.set(ils, cert_type, root.clone());
                    Ok(root)
                }
            }
        }
        None => {
            let root = request_root(
                directory,
                transport,
                own_url,
                ils,
                cert_type,
                asserted,
                Some(&cached),
            )
            .await?;
            roots.set(ils, cert_type, root.clone());
            Ok(root)
        }
    }
}

/// Fetch the root at `target`'s revision from the log server and cross-check
/// it with CAs the server does not control before trusting it.
async fn request_root(
    directory: &dyn Directory,
    transport: &dyn Transport,
    own_url: &str,
    ils: &str,
    cert_type: CertificateType,
    target: &MapRootV1,
    cached: Option<&MapRootV1>,
) -> Result<MapRootV1, ProtocolError> {
    let ils_info = directory.lookup(ils).await?;

    let request = RootRequest {
        nonce: create_nonce(),
        cert_type,
        ils: ils.to_owned(),
        revision: target.revision,
        old_revision: cached.map(|root| root.revision),
    };
    let response = send_root_request(transport, ils, &request).await?;
    if response.nonce != request.nonce {
        return Err(ProtocolError::BadNonce);
    }
    verify_nonce_signature(
        &*response,
        &response.nonce_signature,
        &[],
        &ils_info.public_key,
    )?;
    if response.root != *target {
        return Err(ProtocolError::ConsistencyViolation(
            "log server served a different root than it asserted".into(),
        ));
    }

    // The server must name CAs that can independently vouch for this root;
    // its own word, or ours, proves nothing.
    let vouching: Vec<String> = response
        .cas
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|ca| ca != own_url)
        .collect();
    if vouching.is_empty() {
        return Err(ProtocolError::ConsistencyViolation(
            "no independent CA vouches for this root".into(),
        ));
    }

    let expected_root = response.root.clone();
    let checks = vouching.iter().map(|ca| {
        let expected_root = expected_root.clone();
        async move {
            let ca_info = directory.lookup(ca).await?;
            let ca_request = RootRequest {
                nonce: create_nonce(),
                cert_type,
                ils: ils.to_owned(),
                revision: target.revision,
                old_revision: None,
            };
            let ca_response = send_root_request(transport, ca, &ca_request).await?;
            if ca_response.nonce != ca_request.nonce {
                return Err(ProtocolError::BadNonce);
            }
            verify_nonce_signature(
                &*ca_response,
                &ca_response.nonce_signature,
                &[],
                &ca_info.public_key,
            )?;
            if ca_response.root != expected_root {
                return Err(ProtocolError::ConsistencyViolation(format!(
                    "{ca} holds a different root for revision {}",
                    target.revision
                )));
            }
            Ok(())
        }
    });
    try_join_all(checks).await?;

    if let Some(cached) = cached {
        let proof = response.consistency_proof.as_ref().ok_or_else(|| {
            ProtocolError::invalid("root response", "missing consistency proof")
        })?;
        log::verify_root(&cached.log_root, &response.root.log_root, &proof.hashes_list)?;
    }

    debug!(ils, revision = response.root.revision, "root cross-checked");
    Ok(response.root)
}

async fn send_root_request(
    transport: &dyn Transport,
    to: &str,
    request: &RootRequest,
) -> Result<Box<RootResponse>, ProtocolError> {
    match transport
        .send(to, Message::RootRequest(request.clone()))
        .await?
    {
        Some(Message::RootResponse(response)) => Ok(response),
        _ => Err(ProtocolError::UnexpectedResponse("root request")),
    }
}

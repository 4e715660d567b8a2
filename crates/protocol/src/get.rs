//! Certificate lookup response verification.

use arpki_merkle::{build_map_leaf, map, map_index, MapEntry};
use arpki_messages::GetResponse;
use arpki_types::{canonical_json, canonical_value, PublicKey};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::root::resolve_current_root;
use crate::storage::TreeRootStore;
use crate::verification::{verify_arpki_cert, verify_multi_signature, verify_nonce_signature};

/// Verify a lookup response as seen after `wrapping_cas` have relayed it;
/// the requester passes the request's full CA list.
pub(crate) async fn verify_get_response(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    response: &GetResponse,
    wrapping_cas: &[String],
) -> Result<(), ProtocolError> {
    let request = &response.request;
    let ils_info = directory.lookup(&request.ils).await?;
    let ca_keys: Vec<PublicKey> = directory
        .lookup_many(wrapping_cas)
        .await?
        .into_iter()
        .map(|info| info.public_key)
        .collect();

    verify_nonce_signature(response, &response.nonce_signature, &ca_keys, &ils_info.public_key)?;
    if !ils_info
        .public_key
        .verify_payload(&response.proof, &response.proof_signature)
    {
        return Err(ProtocolError::BadSignature("map proof"));
    }
    verify_multi_signature(
        &response.root_signature,
        &canonical_value(&response.root)?,
        &ca_keys,
        &ils_info.public_key,
    )?;

    let resolved = resolve_current_root(
        directory,
        transport,
        roots,
        own_url,
        &request.ils,
        request.cert_type,
        &response.root,
        None,
    )
    .await?;

    let map_tree = ils_info
        .map_tree(request.cert_type)
        .ok_or_else(|| ProtocolError::MissingTree {
            url: request.ils.clone(),
            what: "map",
        })?;
    map::verify_map_leaf_inclusion(map_tree.tree_id, &resolved, &response.proof)?;

    let proven_leaf = response
        .proof
        .leaf
        .as_ref()
        .ok_or(arpki_merkle::ProofError::MissingMapLeaf)?;
    if proven_leaf.index != map_index(&request.domain) {
        return Err(ProtocolError::invalid(
            "get response",
            "proven leaf is for a different domain",
        ));
    }
    match &response.cert {
        Some(cert) => {
            if cert.domain() != request.domain || cert.cert_type() != request.cert_type {
                return Err(ProtocolError::invalid(
                    "get response",
                    "certificate does not match the request",
                ));
            }
            let cert_ca_keys: Vec<PublicKey> = directory
                .lookup_many(&cert.cas)
                .await?
                .into_iter()
                .map(|info| info.public_key)
                .collect();
            verify_arpki_cert(cert, &cert_ca_keys)?;

            let expected = build_map_leaf(&request.domain, canonical_json(cert)?)?;
            if proven_leaf.index != expected.index || proven_leaf.leaf_value != expected.leaf_value
            {
                return Err(ProtocolError::invalid(
                    "get response",
                    "proven leaf does not carry the returned certificate",
                ));
            }
        }
        None => {
            // Absent means never registered (empty leaf) or deleted (a leaf
            // whose entry carries no certificate).
            if !proven_leaf.leaf_value.is_empty() {
                let entry: MapEntry = serde_json::from_slice(&proven_leaf.leaf_value)?;
                if entry.domain != request.domain || !entry.cert.is_empty() {
                    return Err(ProtocolError::invalid(
                        "get response",
                        "map holds a certificate the response omitted",
                    ));
                }
            }
        }
    }

    roots.set(&request.ils, request.cert_type, resolved);
    Ok(())
}

//! Modification response verification.
//!
//! A modification response carries one proof bundle from the head log server
//! and one acknowledgement per secondary. Every relaying CA, and finally the
//! requester, checks all of them: each server's root must extend the root
//! last trusted for it, the new log entry and the map leaf it produced must
//! be proven under that root, and the acceptance confirmation must carry
//! exactly the layers collected so far.

use arpki_merkle::{
    build_log_leaf, build_map_leaf, log, map, MapLeafInclusion, MapRootV1, Operation, Proof,
};
use arpki_messages::{ModificationRequest, ModificationResponse};
use arpki_types::{
    canonical_json, canonical_value, fingerprint, MultiSignature, PublicKey, Signature,
};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::root::resolve_current_root;
use crate::storage::TreeRootStore;
use crate::verification::{verify_multi_signature, verify_nonce_signature};

/// One log server's view of an applied modification.
pub(crate) struct ProofBundle<'a> {
    pub ils: &'a str,
    pub root: &'a MapRootV1,
    pub root_signature: &'a MultiSignature,
    pub consistency_proof: &'a Proof,
    pub consistency_proof_signature: &'a Signature,
    pub log_proof: &'a Proof,
    pub log_proof_signature: &'a Signature,
    pub map_proof: &'a MapLeafInclusion,
    pub map_proof_signature: &'a Signature,
}

/// Verify a modification response as seen after `wrapping_cas` have relayed
/// it; the requester passes the certificate's full CA list.
pub(crate) async fn verify_modification_response(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    response: &ModificationResponse,
    wrapping_cas: &[String],
) -> Result<(), ProtocolError> {
    let request = &response.request;
    let cert = &request.cert;

    let ca_keys: Vec<PublicKey> = directory
        .lookup_many(wrapping_cas)
        .await?
        .into_iter()
        .map(|info| info.public_key)
        .collect();
    let ils_infos = directory.lookup_many(&cert.ilses).await?;
    let ils_keys: Vec<PublicKey> = ils_infos.iter().map(|info| info.public_key).collect();
    let (head_key, secondary_keys) = ils_keys
        .split_first()
        .ok_or_else(|| ProtocolError::invalid("participants", "no log server listed"))?;

    verify_nonce_signature(response, &response.nonce_signature, &ca_keys, head_key)?;

    // The acceptance confirmation so far: the log servers' layers plus one
    // per CA that has already relayed.
    let mut acceptance_keys = ca_keys.clone();
    acceptance_keys.extend(secondary_keys.iter().rev());
    verify_multi_signature(
        &response.acceptance_confirmation,
        &canonical_value(cert)?,
        &acceptance_keys,
        head_key,
    )?;

    if response.acknowledgements.len() != secondary_keys.len() {
        return Err(ProtocolError::invalid(
            "modification response",
            format!(
                "{} acknowledgements for {} secondary log servers",
                response.acknowledgements.len(),
                secondary_keys.len()
            ),
        ));
    }

    let head_bundle = ProofBundle {
        ils: &cert.ilses[0],
        root: &response.root,
        root_signature: &response.root_signature,
        consistency_proof: &response.consistency_proof,
        consistency_proof_signature: &response.consistency_proof_signature,
        log_proof: &response.log_proof,
        log_proof_signature: &response.log_proof_signature,
        map_proof: &response.map_proof,
        map_proof_signature: &response.map_proof_signature,
    };
    verify_proof_bundle(
        directory, transport, roots, own_url, request, head_bundle, head_key, &ca_keys,
    )
    .await?;

    let request_hash = fingerprint(request)?;
    for (position, ack) in response.acknowledgements.iter().enumerate() {
        let ils = &cert.ilses[position + 1];
        let ils_key = &secondary_keys[position];

        if ack.nonce != ack.request.nonce {
            return Err(ProtocolError::BadNonce);
        }
        if ack.request.hash != request_hash {
            return Err(ProtocolError::invalid(
                "acknowledgement",
                "commit refers to a different request",
            ));
        }
        if !ack.request.verify(head_key) {
            return Err(ProtocolError::BadSignature("synchronization commit"));
        }
        verify_nonce_signature(ack, &ack.nonce_signature, &[], ils_key)?;

        // This server's acceptance layers: the secondaries up to and
        // including itself, in reverse synchronization order.
        let partial_keys: Vec<PublicKey> =
            secondary_keys[..=position].iter().rev().copied().collect();
        verify_multi_signature(
            &ack.acceptance_confirmation,
            &canonical_value(cert)?,
            &partial_keys,
            head_key,
        )?;

        let bundle = ProofBundle {
            ils,
            root: &ack.root,
            root_signature: &ack.root_signature,
            consistency_proof: &ack.consistency_proof,
            consistency_proof_signature: &ack.consistency_proof_signature,
            log_proof: &ack.log_proof,
            log_proof_signature: &ack.log_proof_signature,
            map_proof: &ack.map_proof,
            map_proof_signature: &ack.map_proof_signature,
        };
        verify_proof_bundle(
            directory, transport, roots, own_url, request, bundle, ils_key, &[],
        )
        .await?;
    }

    Ok(())
}

/// Verify one server's proofs for an applied modification and persist its
/// root once they hold.
#[allow(clippy::too_many_arguments)]
async fn verify_proof_bundle(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    request: &ModificationRequest,
    bundle: ProofBundle<'_>,
    ils_key: &PublicKey,
    root_wrapping_keys: &[PublicKey],
) -> Result<(), ProtocolError> {
    let cert = &request.cert;
    let cert_type = cert.cert_type();
    let domain = cert.domain();

    if !ils_key.verify_payload(bundle.consistency_proof, bundle.consistency_proof_signature) {
        return Err(ProtocolError::BadSignature("consistency proof"));
    }
    if !ils_key.verify_payload(bundle.log_proof, bundle.log_proof_signature) {
        return Err(ProtocolError::BadSignature("log proof"));
    }
    if !ils_key.verify_payload(bundle.map_proof, bundle.map_proof_signature) {
        return Err(ProtocolError::BadSignature("map proof"));
    }
    verify_multi_signature(
        bundle.root_signature,
        &canonical_value(bundle.root)?,
        root_wrapping_keys,
        ils_key,
    )?;

    let resolved = resolve_current_root(
        directory,
        transport,
        roots,
        own_url,
        bundle.ils,
        cert_type,
        bundle.root,
        Some(bundle.consistency_proof),
    )
    .await?;

    let cert_json = canonical_json(cert)?;
    let log_leaf = build_log_leaf(domain, cert_json.clone(), request.operation)?;
    log::verify_inclusion_by_hash(&resolved.log_root, &log_leaf.merkle_leaf_hash, bundle.log_proof)?;

    let map_value = match request.operation {
        Operation::Create | Operation::Update => cert_json,
        Operation::Delete => String::new(),
    };
    let expected_leaf = build_map_leaf(domain, map_value)?;
    let proven_leaf = bundle
        .map_proof
        .leaf
        .as_ref()
        .ok_or(arpki_merkle::ProofError::MissingMapLeaf)?;
    if proven_leaf.index != expected_leaf.index || proven_leaf.leaf_value != expected_leaf.leaf_value
    {
        return Err(ProtocolError::invalid(
            "map proof",
            "proven leaf does not match the modification",
        ));
    }
    let ils_info = directory.lookup(bundle.ils).await?;
    let map_tree = ils_info
        .map_tree(cert_type)
        .ok_or_else(|| ProtocolError::MissingTree {
            url: bundle.ils.to_owned(),
            what: "map",
        })?;
    map::verify_map_leaf_inclusion(map_tree.tree_id, &resolved, bundle.map_proof)?;

    roots.set(bundle.ils, cert_type, resolved);
    Ok(())
}

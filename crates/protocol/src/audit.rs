//! Audit response verification.
//!
//! A relaying CA does not replay the log itself; that is the monitor's job.
//! It still refuses to countersign an audit it cannot account for: every
//! proof group must carry the log server's signature, and the advertised
//! root must resolve against the root this CA last trusted for that
//! server.

use arpki_messages::AuditResponse;
use arpki_types::{canonical_value, PublicKey};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::root::resolve_current_root;
use crate::storage::TreeRootStore;
use crate::verification::{verify_multi_signature, verify_nonce_signature};

/// Verify an audit response as seen after `wrapping_cas` have relayed it.
pub(crate) async fn verify_audit_response(
    directory: &dyn Directory,
    transport: &dyn Transport,
    roots: &dyn TreeRootStore,
    own_url: &str,
    response: &AuditResponse,
    wrapping_cas: &[String],
) -> Result<(), ProtocolError> {
    let request = &response.request;
    if response.nonce != request.nonce {
        return Err(ProtocolError::BadNonce);
    }

    let ils_info = directory.lookup(&request.ils).await?;
    let ils_key = &ils_info.public_key;
    let ca_keys: Vec<PublicKey> = directory
        .lookup_many(wrapping_cas)
        .await?
        .into_iter()
        .map(|info| info.public_key)
        .collect();

    verify_nonce_signature(response, &response.nonce_signature, &ca_keys, ils_key)?;
    verify_multi_signature(
        &response.root_signature,
        &canonical_value(&response.root)?,
        &ca_keys,
        ils_key,
    )?;
    if !ils_key.verify_payload(&response.leaves, &response.leaves_signature) {
        return Err(ProtocolError::BadSignature("leaves"));
    }
    if !ils_key.verify_payload(&response.log_proofs, &response.log_proofs_signature) {
        return Err(ProtocolError::BadSignature("log proofs"));
    }
    if !ils_key.verify_payload(&response.consistency_proof, &response.consistency_proof_signature)
    {
        return Err(ProtocolError::BadSignature("consistency proof"));
    }
    if !ils_key.verify_payload(&response.map_proofs, &response.map_proofs_signature) {
        return Err(ProtocolError::BadSignature("map proofs"));
    }

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
    if resolved != response.root {
        return Err(ProtocolError::ConsistencyViolation(
            "audited root diverges from the trusted root".into(),
        ));
    }

    roots.set(&request.ils, request.cert_type, resolved);
    Ok(())
}

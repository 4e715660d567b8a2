//! The monitor.
//!
//! A monitor replays a log server's history: it fetches every leaf appended
//! since its last audit, folds them into the advertised log head one prefix
//! at a time, rebuilds the map those entries must have produced and holds it
//! against the server's map proofs. Any divergence is evidence against the
//! server. State is only advanced when every certificate type audits
//! cleanly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use arpki_merkle::{build_map_leaf_from_log_leaf, log, map, LogLeaf, MapRootV1};
use arpki_messages::{AuditRequest, AuditResponse, Message};
use arpki_types::{canonical_value, CertificateType, ParticipantInfo, PublicKey};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::operations::create_nonce;
use crate::verification::{verify_multi_signature, verify_nonce_signature};

const AUDITED_TYPES: [CertificateType; 3] = [
    CertificateType::PublisherCertificate,
    CertificateType::ApplicationCertificate,
    CertificateType::AuditionCertificate,
];

#[derive(Clone)]
struct AuditState {
    root: MapRootV1,
    leaves: Vec<LogLeaf>,
}

pub struct Monitor {
    url: String,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    state: Mutex<HashMap<(String, CertificateType), AuditState>>,
}

impl Monitor {
    pub fn new(url: String, directory: Arc<dyn Directory>, transport: Arc<dyn Transport>) -> Self {
        Monitor {
            url,
            directory,
            transport,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The log revision this monitor has audited `ils` up to.
    pub fn audited_revision(&self, ils: &str, cert_type: CertificateType) -> Option<u64> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state
            .get(&(ils.to_owned(), cert_type))
            .map(|audit| audit.root.revision)
    }

    /// Audit every certificate type on `ils`, relaying through `cas`.
    /// Either all types verify and the monitor's state advances, or none of
    /// it is persisted.
    pub async fn audit(&self, ils: &str, cas: &[String]) -> Result<(), ProtocolError> {
        let ils_info = self.directory.lookup(ils).await?;
        let ca_keys: Vec<PublicKey> = self
            .directory
            .lookup_many(cas)
            .await?
            .into_iter()
            .map(|info| info.public_key)
            .collect();

        let mut staged = Vec::with_capacity(AUDITED_TYPES.len());
        for cert_type in AUDITED_TYPES {
            let previous = {
                let state = match self.state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.get(&(ils.to_owned(), cert_type)).cloned()
            };
            let next = self
                .audit_one(ils, &ils_info, cas, &ca_keys, cert_type, previous)
                .await?;
            staged.push((cert_type, next));
        }

        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (cert_type, next) in staged {
            state.insert((ils.to_owned(), cert_type), next);
        }
        info!(ils, "audit passed");
        Ok(())
    }

    async fn audit_one(
        &self,
        ils: &str,
        ils_info: &ParticipantInfo,
        cas: &[String],
        ca_keys: &[PublicKey],
        cert_type: CertificateType,
        previous: Option<AuditState>,
    ) -> Result<AuditState, ProtocolError> {
        let first_ca = cas
            .first()
            .cloned()
            .ok_or_else(|| ProtocolError::invalid("audit request", "no CA listed"))?;
        let since_revision = previous.as_ref().map_or(0, |state| state.root.revision);
        let request = AuditRequest {
            nonce: create_nonce(),
            cert_type,
            cas: cas.to_vec(),
            ils: ils.to_owned(),
            since_revision,
        };

        let response = match self
            .transport
            .send(&first_ca, Message::AuditRequest(request.clone()))
            .await?
        {
            Some(Message::AuditResponse(response)) => response,
            _ => return Err(ProtocolError::UnexpectedResponse("audit request")),
        };
        if response.nonce != request.nonce {
            return Err(ProtocolError::BadNonce);
        }
        if response.request != request {
            return Err(ProtocolError::invalid(
                "audit response",
                "echoed request differs",
            ));
        }

        self.verify_signatures(&response, ils_info, ca_keys)?;
        self.verify_log_replay(&response, previous.as_ref())?;
        let leaves = self.verify_map_snapshot(&response, ils_info, cert_type, previous.as_ref())?;

        debug!(
            ils,
            ?cert_type,
            revision = response.root.revision,
            appended = response.leaves.len(),
            "audit replay verified"
        );
        Ok(AuditState {
            root: response.root.clone(),
            leaves,
        })
    }

    fn verify_signatures(
        &self,
        response: &AuditResponse,
        ils_info: &ParticipantInfo,
        ca_keys: &[PublicKey],
    ) -> Result<(), ProtocolError> {
        let ils_key = &ils_info.public_key;
        verify_nonce_signature(response, &response.nonce_signature, ca_keys, ils_key)?;
        verify_multi_signature(
            &response.root_signature,
            &canonical_value(&response.root)?,
            ca_keys,
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
        Ok(())
    }

    /// Fold the appended leaves into the advertised log head: every leaf
    /// must extend the verified prefix by exactly one, and the final prefix
    /// must be the whole tree.
    fn verify_log_replay(
        &self,
        response: &AuditResponse,
        previous: Option<&AuditState>,
    ) -> Result<(), ProtocolError> {
        let new_log = &response.root.log_root;
        if let Some(previous) = previous {
            log::verify_root(
                &previous.root.log_root,
                new_log,
                &response.consistency_proof.hashes_list,
            )?;
        }

        if response.leaves.len() != response.log_proofs.len() {
            return Err(ProtocolError::invalid(
                "audit response",
                format!(
                    "{} leaves with {} inclusion proofs",
                    response.leaves.len(),
                    response.log_proofs.len()
                ),
            ));
        }

        let mut prefix_size = previous.map_or(0, |state| state.root.log_root.tree_size);
        let mut prefix_hash: Option<Vec<u8>> = None;
        for (leaf, proof) in response.leaves.iter().zip(&response.log_proofs) {
            let new_size = prefix_size + 1;
            if proof.leaf_index != new_size - 1 || leaf.leaf_index != proof.leaf_index {
                return Err(ProtocolError::ConsistencyViolation(format!(
                    "leaf {} served out of order, expected index {}",
                    leaf.leaf_index,
                    new_size - 1
                )));
            }
            if log::hash_leaf(&leaf.leaf_value) != leaf.merkle_leaf_hash {
                return Err(ProtocolError::ConsistencyViolation(
                    "leaf hash does not cover the served value".into(),
                ));
            }
            let hash = log::verified_prefix_hash_from_inclusion_proof(
                new_size,
                new_log.tree_size,
                &proof.hashes_list,
                &new_log.root_hash,
                &leaf.merkle_leaf_hash,
            )?;
            prefix_hash = Some(hash);
            prefix_size = new_size;
        }

        if prefix_size != new_log.tree_size {
            return Err(ProtocolError::ConsistencyViolation(format!(
                "log served {prefix_size} of {} leaves",
                new_log.tree_size
            )));
        }
        if let Some(hash) = prefix_hash {
            if hash != new_log.root_hash {
                return Err(ProtocolError::ConsistencyViolation(
                    "replayed leaves do not reproduce the log head".into(),
                ));
            }
        }
        Ok(())
    }

    /// Rebuild the map the log entries must have produced and hold it
    /// against the server's map proofs. Returns the full leaf history.
    fn verify_map_snapshot(
        &self,
        response: &AuditResponse,
        ils_info: &ParticipantInfo,
        cert_type: CertificateType,
        previous: Option<&AuditState>,
    ) -> Result<Vec<LogLeaf>, ProtocolError> {
        let map_tree = ils_info
            .map_tree(cert_type)
            .ok_or_else(|| ProtocolError::MissingTree {
                url: ils_info.url.clone(),
                what: "map",
            })?;

        let mut leaves = previous.map_or_else(Vec::new, |state| state.leaves.clone());
        leaves.extend(response.leaves.iter().cloned());

        // Later entries for the same domain overwrite earlier ones.
        let mut expected: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        for leaf in &leaves {
            let map_leaf = build_map_leaf_from_log_leaf(leaf)?;
            expected.insert(map_leaf.index, map_leaf.leaf_value);
        }

        let mut proven: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        for inclusion in &response.map_proofs {
            map::verify_map_leaf_inclusion(map_tree.tree_id, &response.root, inclusion)?;
            let leaf = inclusion
                .leaf
                .as_ref()
                .ok_or(arpki_merkle::ProofError::MissingMapLeaf)?;
            proven.insert(leaf.index.clone(), leaf.leaf_value.clone());
        }

        if proven != expected {
            return Err(ProtocolError::ConsistencyViolation(
                "map diverges from the log that feeds it".into(),
            ));
        }
        Ok(leaves)
    }
}

//! A scripted indexed log server.
//!
//! Implements the server side of the protocol over the in-memory trees:
//! applying synchronized modifications as the primary, committing them as a
//! secondary, and serving lookups, roots and audit replays. Faults can be
//! injected to exercise the monitor's misbehavior detection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use arpki_merkle::{
    build_log_leaf, build_map_leaf_from_log_leaf, log, map_index, LogLeaf, LogRootV1, MapEntry,
    MapLeafInclusion, MapRootV1, Proof,
};
use arpki_messages::{
    AuditRequest, AuditResponse, GetRequest, GetResponse, Message, ModificationRequest,
    ModificationResponse, RootRequest, RootResponse, SynchronizationAcknowledge,
    SynchronizationCommit, SynchronizationRequest, SynchronizationResponse,
};
use arpki_protocol::operations::create_nonce;
use arpki_protocol::verification::{
    requester_key, sign_nonce, verify_arpki_cert, verify_nonce_signature, verify_participants,
    wrap_multi_signature,
};
use arpki_protocol::{Directory, ProtocolError, Transport};
use arpki_types::{
    canonical_json, fingerprint, ArpkiCert, CertificateType, KeyPair, MultiSignature,
    ParticipantRole, PublicKey, Signature,
};

use crate::tree::{InMemoryLog, InMemoryMap};

/// Deterministic tree ids for a log server's log/map pair.
pub fn tree_ids(url: &str, cert_type: CertificateType) -> (u64, u64) {
    let mut seed: u64 = 0;
    for byte in url.bytes() {
        seed = seed.wrapping_mul(131).wrapping_add(byte as u64);
    }
    let offset = match cert_type {
        CertificateType::PublisherCertificate => 0,
        CertificateType::ApplicationCertificate => 2,
        CertificateType::AuditionCertificate => 4,
    };
    (seed.wrapping_add(offset), seed.wrapping_add(offset + 1))
}

/// Misbehavior switches.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// Serve audit responses without any map proofs.
    pub omit_audit_map_proofs: bool,
}

#[derive(Clone, Debug)]
pub struct IlsConfig {
    pub url: String,
    pub trusted_cas: Vec<String>,
    pub trusted_ilses: Vec<String>,
}

struct TreePair {
    log: InMemoryLog,
    map: InMemoryMap,
    revision: u64,
    history: Vec<MapRootV1>,
}

impl TreePair {
    fn new(map_tree_id: u64) -> Self {
        let log = InMemoryLog::new();
        let map = InMemoryMap::new(map_tree_id);
        let genesis = MapRootV1 {
            root_hash: map.root_hash(),
            timestamp_nanos: 0,
            revision: 0,
            log_root: LogRootV1 {
                tree_size: 0,
                root_hash: log::empty_root(),
                timestamp_nanos: 0,
                revision: 0,
                metadata: Vec::new(),
                signature: Vec::new(),
            },
            signature: Vec::new(),
        };
        TreePair {
            log,
            map,
            revision: 0,
            history: vec![genesis],
        }
    }

    fn current_root(&self) -> MapRootV1 {
        self.history[self.history.len() - 1].clone()
    }
}

struct Applied {
    root: MapRootV1,
    consistency_proof: Proof,
    log_proof: Proof,
    map_proof: MapLeafInclusion,
}

pub struct IndexedLogServer {
    config: IlsConfig,
    keypair: KeyPair,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    trees: Mutex<HashMap<CertificateType, TreePair>>,
    pending_sync: Mutex<HashMap<String, ModificationRequest>>,
    faults: Faults,
}

impl IndexedLogServer {
    pub fn new(
        config: IlsConfig,
        keypair: KeyPair,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        faults: Faults,
    ) -> Self {
        IndexedLogServer {
            config,
            keypair,
            directory,
            transport,
            trees: Mutex::new(HashMap::new()),
            pending_sync: Mutex::new(HashMap::new()),
            faults,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub async fn handle(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        match message {
            Message::SynchronizationRequest(request) => {
                if request.request.cert.ilses.first() == Some(&self.config.url) {
                    self.handle_primary_sync(request).await
                } else {
                    self.handle_secondary_sync(request).await
                }
            }
            Message::SynchronizationCommit(commit) => self.handle_commit(commit).await,
            Message::RootRequest(request) => Ok(Some(Message::RootResponse(Box::new(
                self.handle_root(request)?,
            )))),
            Message::GetRequest(request) => self.handle_get(request).await,
            Message::AuditRequest(request) => self.handle_audit(request).await,
            _ => Err(ProtocolError::UnexpectedResponse("message for a log server")),
        }
    }

    /// As the primary: apply the modification, run the synchronization round
    /// with the secondaries and send the assembled response to the last CA.
    async fn handle_primary_sync(
        &self,
        sync: SynchronizationRequest,
    ) -> Result<Option<Message>, ProtocolError> {
        let request = sync.request.clone();
        let cert = request.cert.clone();

        verify_participants(
            &cert.cas,
            &cert.ilses,
            cert.ca_min,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ils, &self.config.url)),
        )?;
        let first_ca = self.directory.lookup(&cert.cas[0]).await?;
        if !sync.verify(&first_ca.public_key) {
            return Err(ProtocolError::BadSignature("synchronization request"));
        }
        let ca_keys = self.participant_keys(&cert.cas).await?;
        verify_arpki_cert(&cert, &ca_keys)?;
        if !request.verify(requester_key(&cert.cert)?) {
            return Err(ProtocolError::BadSignature("request"));
        }

        debug!(
            domain = cert.domain(),
            operation = ?request.operation,
            "applying modification as primary"
        );
        let applied = self.apply(&request)?;
        let mut acceptance = MultiSignature::leaf(self.keypair.sign_payload(&cert)?);
        let hash = fingerprint(&request)?;

        let mut acknowledgements = Vec::new();
        for secondary in &cert.ilses[1..] {
            let info = self.directory.lookup(secondary).await?;
            let peer_sync = SynchronizationRequest::new(request.clone(), create_nonce(), &self.keypair)?;
            let sync_nonce = peer_sync.nonce;
            let response = match self
                .transport
                .send(secondary, Message::SynchronizationRequest(peer_sync))
                .await?
            {
                Some(Message::SynchronizationResponse(response)) => response,
                _ => return Err(ProtocolError::UnexpectedResponse("synchronization request")),
            };
            if response.nonce != sync_nonce {
                return Err(ProtocolError::BadNonce);
            }
            if response.hash != hash {
                return Err(ProtocolError::invalid(
                    "synchronization response",
                    "peer hashed a different request",
                ));
            }
            verify_nonce_signature(&response, &response.nonce_signature, &[], &info.public_key)?;

            let commit =
                SynchronizationCommit::new(acceptance.clone(), hash.clone(), create_nonce(), &self.keypair)?;
            let commit_nonce = commit.nonce;
            let ack = match self
                .transport
                .send(secondary, Message::SynchronizationCommit(commit))
                .await?
            {
                Some(Message::SynchronizationAcknowledge(ack)) => ack,
                _ => return Err(ProtocolError::UnexpectedResponse("synchronization commit")),
            };
            if ack.nonce != commit_nonce || ack.request.hash != hash {
                return Err(ProtocolError::BadNonce);
            }
            verify_nonce_signature(&*ack, &ack.nonce_signature, &[], &info.public_key)?;
            acceptance = ack.acceptance_confirmation.clone();
            acknowledgements.push(*ack);
        }

        let last_ca = cert
            .cas
            .last()
            .cloned()
            .ok_or_else(|| ProtocolError::invalid("certificate", "no CA listed"))?;
        let root_signature = MultiSignature::leaf(self.keypair.sign_payload(&applied.root)?);
        let consistency_proof_signature = self.keypair.sign_payload(&applied.consistency_proof)?;
        let log_proof_signature = self.keypair.sign_payload(&applied.log_proof)?;
        let map_proof_signature = self.keypair.sign_payload(&applied.map_proof)?;
        let mut response = ModificationResponse {
            nonce: request.nonce,
            request,
            acceptance_confirmation: acceptance,
            root: applied.root,
            root_signature,
            consistency_proof: applied.consistency_proof,
            consistency_proof_signature,
            log_proof: applied.log_proof,
            log_proof_signature,
            map_proof: applied.map_proof,
            map_proof_signature,
            acknowledgements,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;

        self.transport
            .send(&last_ca, Message::ModificationResponse(Box::new(response)))
            .await?;
        Ok(None)
    }

    /// As a secondary: stage the modification and answer with its hash.
    async fn handle_secondary_sync(
        &self,
        sync: SynchronizationRequest,
    ) -> Result<Option<Message>, ProtocolError> {
        let cert = &sync.request.cert;
        verify_participants(
            &cert.cas,
            &cert.ilses,
            cert.ca_min,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ils, &self.config.url)),
        )?;
        let head = self.directory.lookup(&cert.ilses[0]).await?;
        if !sync.verify(&head.public_key) {
            return Err(ProtocolError::BadSignature("synchronization request"));
        }

        let hash = fingerprint(&sync.request)?;
        {
            let mut pending = match self.pending_sync.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.insert(hash.clone(), sync.request.clone());
        }

        let mut response = SynchronizationResponse {
            nonce: sync.nonce,
            request: sync,
            hash,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;
        Ok(Some(Message::SynchronizationResponse(response)))
    }

    /// As a secondary: apply the staged modification and acknowledge with
    /// proofs and the acceptance confirmation wrapped one layer deeper.
    async fn handle_commit(
        &self,
        commit: SynchronizationCommit,
    ) -> Result<Option<Message>, ProtocolError> {
        let request = {
            let mut pending = match self.pending_sync.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.remove(&commit.hash)
        }
        .ok_or_else(|| {
            ProtocolError::invalid("synchronization commit", "no staged modification")
        })?;
        let head = self.directory.lookup(&request.cert.ilses[0]).await?;
        if !commit.verify(&head.public_key) {
            return Err(ProtocolError::BadSignature("synchronization commit"));
        }

        debug!(domain = request.cert.domain(), "committing modification as secondary");
        let applied = self.apply(&request)?;
        let acceptance = wrap_multi_signature(&self.keypair, commit.acceptance_confirmation.clone())?;

        let root_signature = MultiSignature::leaf(self.keypair.sign_payload(&applied.root)?);
        let consistency_proof_signature = self.keypair.sign_payload(&applied.consistency_proof)?;
        let log_proof_signature = self.keypair.sign_payload(&applied.log_proof)?;
        let map_proof_signature = self.keypair.sign_payload(&applied.map_proof)?;
        let mut ack = SynchronizationAcknowledge {
            nonce: commit.nonce,
            request: commit,
            acceptance_confirmation: acceptance,
            root: applied.root,
            root_signature,
            consistency_proof: applied.consistency_proof,
            consistency_proof_signature,
            log_proof: applied.log_proof,
            log_proof_signature,
            map_proof: applied.map_proof,
            map_proof_signature,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        ack.nonce_signature = sign_nonce(&self.keypair, &ack)?;
        Ok(Some(Message::SynchronizationAcknowledge(Box::new(ack))))
    }

    fn handle_root(&self, request: RootRequest) -> Result<RootResponse, ProtocolError> {
        let (root, consistency_proof) = {
            let mut trees = self.lock_trees();
            let pair = self.tree_pair(&mut trees, request.cert_type);
            let root = pair
                .history
                .get(request.revision as usize)
                .cloned()
                .ok_or_else(|| {
                    ProtocolError::invalid(
                        "root request",
                        format!("no root at revision {}", request.revision),
                    )
                })?;
            let consistency_proof = request
                .old_revision
                .map(|old| pair.log.consistency_proof(old, request.revision));
            (root, consistency_proof)
        };

        let mut response = RootResponse {
            nonce: request.nonce,
            request,
            root,
            consistency_proof,
            cas: Some(self.config.trusted_cas.clone()),
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;
        Ok(response)
    }

    async fn handle_get(&self, request: GetRequest) -> Result<Option<Message>, ProtocolError> {
        let index = map_index(&request.domain);
        let (root, proof, value) = {
            let mut trees = self.lock_trees();
            let pair = self.tree_pair(&mut trees, request.cert_type);
            (
                pair.current_root(),
                pair.map.inclusion(&index),
                pair.map.get(&index).cloned(),
            )
        };

        let cert = match value {
            Some(value) if !value.is_empty() => {
                let entry: MapEntry = serde_json::from_slice(&value)?;
                if entry.cert.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str::<ArpkiCert>(&entry.cert)?)
                }
            }
            _ => None,
        };

        let last_ca = request
            .cas
            .last()
            .cloned()
            .ok_or_else(|| ProtocolError::invalid("get request", "no CA listed"))?;
        let proof_signature = self.keypair.sign_payload(&proof)?;
        let root_signature = MultiSignature::leaf(self.keypair.sign_payload(&root)?);
        let mut response = GetResponse {
            nonce: request.nonce,
            request,
            cert,
            proof,
            proof_signature,
            root,
            root_signature,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;

        self.transport
            .send(&last_ca, Message::GetResponse(Box::new(response)))
            .await?;
        Ok(None)
    }

    async fn handle_audit(&self, request: AuditRequest) -> Result<Option<Message>, ProtocolError> {
        let (root, leaves, log_proofs, consistency_proof, map_proofs) = {
            let mut trees = self.lock_trees();
            let pair = self.tree_pair(&mut trees, request.cert_type);
            let size = pair.log.size();
            let leaves: Vec<LogLeaf> = (request.since_revision..size)
                .filter_map(|index| pair.log.leaf(index))
                .collect();
            let log_proofs: Vec<Proof> = (request.since_revision..size)
                .map(|index| pair.log.inclusion_proof(index))
                .collect();
            let consistency_proof = pair.log.consistency_proof(request.since_revision, size);
            let map_proofs: Vec<MapLeafInclusion> = if self.faults.omit_audit_map_proofs {
                Vec::new()
            } else {
                pair.map
                    .indices()
                    .map(|index| pair.map.inclusion(index))
                    .collect()
            };
            (pair.current_root(), leaves, log_proofs, consistency_proof, map_proofs)
        };

        let last_ca = request
            .cas
            .last()
            .cloned()
            .ok_or_else(|| ProtocolError::invalid("audit request", "no CA listed"))?;
        let leaves_signature = self.keypair.sign_payload(&leaves)?;
        let log_proofs_signature = self.keypair.sign_payload(&log_proofs)?;
        let consistency_proof_signature = self.keypair.sign_payload(&consistency_proof)?;
        let map_proofs_signature = self.keypair.sign_payload(&map_proofs)?;
        let root_signature = MultiSignature::leaf(self.keypair.sign_payload(&root)?);
        let mut response = AuditResponse {
            nonce: request.nonce,
            request,
            leaves,
            leaves_signature,
            log_proofs,
            log_proofs_signature,
            consistency_proof,
            consistency_proof_signature,
            map_proofs,
            map_proofs_signature,
            root,
            root_signature,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;

        self.transport
            .send(&last_ca, Message::AuditResponse(Box::new(response)))
            .await?;
        Ok(None)
    }

    /// Append the log entry, update the map leaf, advance the revision and
    /// collect the proofs the response needs.
    fn apply(&self, request: &ModificationRequest) -> Result<Applied, ProtocolError> {
        let cert_type = request.cert.cert_type();
        let domain = request.cert.domain().to_owned();
        let cert_json = canonical_json(&request.cert)?;

        let mut trees = self.lock_trees();
        let pair = self.tree_pair(&mut trees, cert_type);

        let old_size = pair.log.size();
        let log_leaf = build_log_leaf(&domain, cert_json, request.operation)?;
        let index = pair.log.append(log_leaf.leaf_value.clone());
        let map_leaf = build_map_leaf_from_log_leaf(&log_leaf)?;
        let map_index = map_leaf.index.clone();
        pair.map.set(map_leaf.index, map_leaf.leaf_value);
        pair.revision += 1;

        let root = MapRootV1 {
            root_hash: pair.map.root_hash(),
            timestamp_nanos: 0,
            revision: pair.revision,
            log_root: LogRootV1 {
                tree_size: pair.log.size(),
                root_hash: pair.log.root_hash(),
                timestamp_nanos: 0,
                revision: pair.revision,
                metadata: Vec::new(),
                signature: Vec::new(),
            },
            signature: Vec::new(),
        };
        pair.history.push(root.clone());

        Ok(Applied {
            root,
            consistency_proof: pair.log.consistency_proof(old_size, pair.log.size()),
            log_proof: pair.log.inclusion_proof(index),
            map_proof: pair.map.inclusion(&map_index),
        })
    }

    fn lock_trees(&self) -> std::sync::MutexGuard<'_, HashMap<CertificateType, TreePair>> {
        match self.trees.lock() {
            Ok(trees) => trees,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tree_pair<'a>(
        &self,
        trees: &'a mut HashMap<CertificateType, TreePair>,
        cert_type: CertificateType,
    ) -> &'a mut TreePair {
        let (_, map_tree_id) = tree_ids(&self.config.url, cert_type);
        trees
            .entry(cert_type)
            .or_insert_with(|| TreePair::new(map_tree_id))
    }

    async fn participant_keys(&self, urls: &[String]) -> Result<Vec<PublicKey>, ProtocolError> {
        Ok(self
            .directory
            .lookup_many(urls)
            .await?
            .into_iter()
            .map(|info| info.public_key)
            .collect())
    }
}

//! The certificate authority.
//!
//! A CA signs certificate drafts, relays modifications to the primary log
//! server and countersigns every response that travels back down the chain:
//! each relay layer it adds makes it accountable for the checks it ran. It
//! also answers root requests from peers cross-checking a log server.

use std::sync::Arc;

use tracing::{debug, warn};

use arpki_messages::{
    AuditRequest, AuditResponse, GenerateRequest, GenerateResponse, GetRequest, GetResponse,
    Message, ModificationRequest, ModificationResponse, RootRequest, RootResponse,
    SynchronizationRequest,
};
use arpki_types::{
    fingerprint, Certificate, KeyPair, MultiSignature, ParticipantRole, PublicKey, RegisteredCert,
    Signature, CA_MIN,
};

use crate::audit::verify_audit_response;
use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::get::verify_get_response;
use crate::modification::verify_modification_response;
use crate::operations::create_nonce;
use crate::pending::PendingRequestTable;
use crate::storage::TreeRootStore;
use crate::verification::{
    requester_key, sign_nonce, verify_acceptance_confirmation, verify_arpki_cert,
    verify_participants, wrap_multi_signature,
};

/// Static configuration of one CA.
#[derive(Clone, Debug)]
pub struct CaConfig {
    pub url: String,
    /// CAs this CA accepts as co-signers.
    pub trusted_cas: Vec<String>,
    /// Log servers this CA accepts certificates to be registered with.
    pub trusted_ilses: Vec<String>,
}

pub struct CertificateAuthority {
    config: CaConfig,
    keypair: KeyPair,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    roots: Arc<dyn TreeRootStore>,
    pending: PendingRequestTable,
}

impl CertificateAuthority {
    pub fn new(
        config: CaConfig,
        keypair: KeyPair,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        roots: Arc<dyn TreeRootStore>,
    ) -> Self {
        CertificateAuthority {
            config,
            keypair,
            directory,
            transport,
            roots,
            pending: PendingRequestTable::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Dispatch one inbound message. Requests that travel the relay chain
    /// return their eventual response; forwarded messages return nothing.
    pub async fn handle(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        match message {
            Message::GenerateRequest(request) => Ok(Some(Message::GenerateResponse(
                self.handle_generate(request).await?,
            ))),
            Message::ModificationRequest(request) => {
                self.handle_modification_request(request).await
            }
            Message::ModificationResponse(response) => {
                self.handle_modification_response(*response).await
            }
            Message::GetRequest(request) => self.handle_get_request(request).await,
            Message::GetResponse(response) => self.handle_get_response(*response).await,
            Message::AuditRequest(request) => self.handle_audit_request(request).await,
            Message::AuditResponse(response) => self.handle_audit_response(*response).await,
            Message::RootRequest(request) => Ok(Some(Message::RootResponse(Box::new(
                self.handle_root_request(request)?,
            )))),
            _ => Err(ProtocolError::UnexpectedResponse("message for a CA")),
        }
    }

    async fn handle_generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, ProtocolError> {
        let draft = &request.cert;
        verify_participants(
            &draft.cas,
            &draft.ilses,
            draft.ca_min,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ca, &self.config.url)),
        )?;
        let key = requester_key(&draft.cert)?;
        if !request.verify(key) {
            return Err(ProtocolError::BadSignature("request"));
        }
        self.verify_embedded_identity(&draft.cert).await?;

        debug!(domain = draft.cert.domain(), "signing certificate draft");
        let cert_signature = self.keypair.sign_payload(draft)?;
        let mut response = GenerateResponse {
            nonce: request.nonce,
            request,
            cert_signature,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;
        Ok(response)
    }

    async fn handle_modification_request(
        &self,
        request: ModificationRequest,
    ) -> Result<Option<Message>, ProtocolError> {
        let cert = &request.cert;
        verify_participants(
            &cert.cas,
            &cert.ilses,
            cert.ca_min,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ca, &self.config.url)),
        )?;
        if cert.cas.first() != Some(&self.config.url) {
            return Err(ProtocolError::invalid(
                "modification request",
                "not addressed to the first listed CA",
            ));
        }

        let ca_keys = self.participant_keys(&cert.cas).await?;
        verify_arpki_cert(cert, &ca_keys)?;
        let key = requester_key(&cert.cert)?;
        if !request.verify(key) {
            return Err(ProtocolError::BadSignature("request"));
        }
        self.verify_embedded_identity(&cert.cert).await?;

        let primary = cert.ilses[0].clone();
        debug!(
            domain = cert.domain(),
            operation = ?request.operation,
            ils = %primary,
            "forwarding modification to primary log server"
        );
        let receiver = self.pending.register(fingerprint(&request)?);
        let sync = SynchronizationRequest::new(request, create_nonce(), &self.keypair)?;
        self.transport
            .send(&primary, Message::SynchronizationRequest(sync))
            .await?;

        match receiver.await.map_err(|_| ProtocolError::ChannelClosed)? {
            response @ Message::ModificationResponse(_) => Ok(Some(response)),
            _ => Err(ProtocolError::UnexpectedResponse("modification request")),
        }
    }

    async fn handle_modification_response(
        &self,
        mut response: ModificationResponse,
    ) -> Result<Option<Message>, ProtocolError> {
        let cert = response.request.cert.clone();
        verify_participants(
            &cert.cas,
            &cert.ilses,
            cert.ca_min,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ca, &self.config.url)),
        )?;
        let position = cert
            .cas
            .iter()
            .position(|ca| ca == &self.config.url)
            .ok_or_else(|| {
                ProtocolError::invalid("modification response", "not a listed CA")
            })?;

        verify_modification_response(
            self.directory.as_ref(),
            self.transport.as_ref(),
            self.roots.as_ref(),
            &self.config.url,
            &response,
            &cert.cas[position + 1..],
        )
        .await?;

        response.acceptance_confirmation =
            wrap_multi_signature(&self.keypair, response.acceptance_confirmation)?;
        response.root_signature = wrap_multi_signature(&self.keypair, response.root_signature)?;
        response.nonce_signature = wrap_multi_signature(&self.keypair, response.nonce_signature)?;

        if position == 0 {
            let key = fingerprint(&response.request)?;
            let message = Message::ModificationResponse(Box::new(response));
            if !self.pending.resolve(&key, &message) {
                warn!("modification response arrived with no pending request");
            }
            Ok(None)
        } else {
            self.transport
                .send(
                    &cert.cas[position - 1],
                    Message::ModificationResponse(Box::new(response)),
                )
                .await?;
            Ok(None)
        }
    }

    async fn handle_get_request(
        &self,
        request: GetRequest,
    ) -> Result<Option<Message>, ProtocolError> {
        if request.cas.first() != Some(&self.config.url) {
            return Err(ProtocolError::invalid(
                "get request",
                "not addressed to the first listed CA",
            ));
        }
        let ils = request.ils.clone();
        let receiver = self.pending.register(fingerprint(&request)?);
        self.transport
            .send(&ils, Message::GetRequest(request))
            .await?;
        match receiver.await.map_err(|_| ProtocolError::ChannelClosed)? {
            response @ Message::GetResponse(_) => Ok(Some(response)),
            _ => Err(ProtocolError::UnexpectedResponse("get request")),
        }
    }

    async fn handle_get_response(
        &self,
        mut response: GetResponse,
    ) -> Result<Option<Message>, ProtocolError> {
        let cas = response.request.cas.clone();
        let position = cas
            .iter()
            .position(|ca| ca == &self.config.url)
            .ok_or_else(|| ProtocolError::invalid("get response", "not a listed CA"))?;

        verify_get_response(
            self.directory.as_ref(),
            self.transport.as_ref(),
            self.roots.as_ref(),
            &self.config.url,
            &response,
            &cas[position + 1..],
        )
        .await?;

        response.root_signature = wrap_multi_signature(&self.keypair, response.root_signature)?;
        response.nonce_signature = wrap_multi_signature(&self.keypair, response.nonce_signature)?;

        if position == 0 {
            let key = fingerprint(&response.request)?;
            let message = Message::GetResponse(Box::new(response));
            if !self.pending.resolve(&key, &message) {
                warn!("get response arrived with no pending request");
            }
            Ok(None)
        } else {
            self.transport
                .send(&cas[position - 1], Message::GetResponse(Box::new(response)))
                .await?;
            Ok(None)
        }
    }

    async fn handle_audit_request(
        &self,
        request: AuditRequest,
    ) -> Result<Option<Message>, ProtocolError> {
        if request.cas.first() != Some(&self.config.url) {
            return Err(ProtocolError::invalid(
                "audit request",
                "not addressed to the first listed CA",
            ));
        }
        let ils = request.ils.clone();
        let receiver = self.pending.register(fingerprint(&request)?);
        self.transport
            .send(&ils, Message::AuditRequest(request))
            .await?;
        match receiver.await.map_err(|_| ProtocolError::ChannelClosed)? {
            response @ Message::AuditResponse(_) => Ok(Some(response)),
            _ => Err(ProtocolError::UnexpectedResponse("audit request")),
        }
    }

    async fn handle_audit_response(
        &self,
        mut response: AuditResponse,
    ) -> Result<Option<Message>, ProtocolError> {
        let request = response.request.clone();
        verify_participants(
            &request.cas,
            std::slice::from_ref(&request.ils),
            CA_MIN,
            &self.config.trusted_cas,
            &self.config.trusted_ilses,
            Some((ParticipantRole::Ca, &self.config.url)),
        )?;
        let position = request
            .cas
            .iter()
            .position(|ca| ca == &self.config.url)
            .ok_or_else(|| ProtocolError::invalid("audit response", "not a listed CA"))?;

        verify_audit_response(
            self.directory.as_ref(),
            self.transport.as_ref(),
            self.roots.as_ref(),
            &self.config.url,
            &response,
            &request.cas[position + 1..],
        )
        .await?;

        response.root_signature = wrap_multi_signature(&self.keypair, response.root_signature)?;
        response.nonce_signature = wrap_multi_signature(&self.keypair, response.nonce_signature)?;

        if position == 0 {
            let key = fingerprint(&response.request)?;
            let message = Message::AuditResponse(Box::new(response));
            if !self.pending.resolve(&key, &message) {
                warn!("audit response arrived with no pending request");
            }
            Ok(None)
        } else {
            self.transport
                .send(
                    &request.cas[position - 1],
                    Message::AuditResponse(Box::new(response)),
                )
                .await?;
            Ok(None)
        }
    }

    /// Serve a trusted root to a peer cross-checking a log server.
    fn handle_root_request(&self, request: RootRequest) -> Result<RootResponse, ProtocolError> {
        let root = self
            .roots
            .get(&request.ils, request.cert_type, Some(request.revision))
            .ok_or_else(|| {
                ProtocolError::invalid(
                    "root request",
                    format!(
                        "no trusted root for {} at revision {}",
                        request.ils, request.revision
                    ),
                )
            })?;
        let mut response = RootResponse {
            nonce: request.nonce,
            request,
            root,
            consistency_proof: None,
            cas: None,
            nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
        };
        response.nonce_signature = sign_nonce(&self.keypair, &response)?;
        Ok(response)
    }

    /// For derived certificates, check the registered identity embedded in
    /// them: its CA signatures and its acceptance confirmation.
    async fn verify_embedded_identity(&self, cert: &Certificate) -> Result<(), ProtocolError> {
        let embedded: &RegisteredCert = match cert {
            Certificate::PublisherCertificate(_) => return Ok(()),
            Certificate::ApplicationCertificate(app) => &app.publisher,
            Certificate::AuditionCertificate(audition) => &audition.auditor,
        };
        let ca_keys = self.participant_keys(&embedded.cert.cas).await?;
        verify_arpki_cert(&embedded.cert, &ca_keys)?;
        let ils_keys = self.participant_keys(&embedded.cert.ilses).await?;
        verify_acceptance_confirmation(
            &embedded.acceptance_confirmation,
            &embedded.cert,
            &ca_keys,
            &ils_keys,
            None,
        )
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use arpki_types::{CertificateType, ParticipantInfo};

    use crate::storage::MemoryRootStore;

    struct Sink;

    #[async_trait]
    impl Directory for Sink {
        async fn lookup(&self, url: &str) -> Result<ParticipantInfo, ProtocolError> {
            Err(ProtocolError::UnknownParticipant(url.to_owned()))
        }
    }

    #[async_trait]
    impl Transport for Sink {
        async fn send(&self, _: &str, _: Message) -> Result<Option<Message>, ProtocolError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_relayed_response_must_match_request_kind() {
        let ca = Arc::new(CertificateAuthority::new(
            CaConfig {
                url: "ca1.example.org".into(),
                trusted_cas: vec!["ca1.example.org".into()],
                trusted_ilses: vec!["ils1.example.org".into()],
            },
            KeyPair::from_seed(&[7; 32]),
            Arc::new(Sink),
            Arc::new(Sink),
            Arc::new(MemoryRootStore::new()),
        ));
        let request = GetRequest {
            nonce: 1,
            domain: "app.example.org".into(),
            cas: vec!["ca1.example.org".into()],
            ils: "ils1.example.org".into(),
            cert_type: CertificateType::ApplicationCertificate,
        };
        let key = fingerprint(&request).unwrap();

        let handler = tokio::spawn({
            let ca = Arc::clone(&ca);
            let request = request.clone();
            async move { ca.handle(Message::GetRequest(request)).await }
        });

        // A response of the wrong kind must not satisfy the waiting request.
        let stray = Message::RootRequest(RootRequest {
            nonce: 2,
            cert_type: CertificateType::ApplicationCertificate,
            ils: "ils1.example.org".into(),
            revision: 0,
            old_revision: None,
        });
        while !ca.pending.resolve(&key, &stray) {
            tokio::task::yield_now().await;
        }

        let result = handler.await.unwrap();
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedResponse(_))
        ));
    }
}

//! The publisher.
//!
//! A publisher owns one identity certificate and registers one application
//! certificate per deployed version, signed with its identity key. Deploying
//! reuses the registered identity unless asked to recreate it, bumps the
//! deployment version past whatever the log server currently holds, and
//! hands the caller the acceptance confirmation countersigned by the
//! publisher itself.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use arpki_merkle::Operation;
use arpki_messages::{signing_payload, CertificateDraft};
use arpki_types::{
    ApplicationCertificate, ArpkiCert, Certificate, CertificateType, KeyPair, MultiSignature,
    PublisherCertificate, RegisteredCert, Resource, Signature, Validity,
};

use crate::directory::{Directory, Transport};
use crate::error::ProtocolError;
use crate::operations::{fetch_certificate, generate_certificate, modify_certificate};
use crate::storage::{CertStore, TreeRootStore};

/// Static configuration of one publisher.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub url: String,
    /// Name the identity certificate is registered under.
    pub subject: String,
    /// Domains the identity certificate claims.
    pub domains: Vec<String>,
    /// Accountable parties listed on every certificate this publisher
    /// registers.
    pub cas: Vec<String>,
    pub ilses: Vec<String>,
    pub ca_min: usize,
    /// Certificate validity window in milliseconds.
    pub cert_lifetime: u64,
}

/// One application version to register.
#[derive(Clone, Debug)]
pub struct Deployment {
    pub application_url: String,
    pub resources: Vec<Resource>,
    /// Re-register the identity certificate even when one exists.
    pub force_recreate_publisher: bool,
}

/// The certificates a deployment produced.
pub struct DeployOutcome {
    pub publisher_cert: RegisteredCert,
    pub application_cert: RegisteredCert,
    /// The application's acceptance confirmation, countersigned by the
    /// publisher for distribution to clients.
    pub acceptance_confirmation: MultiSignature,
}

pub struct Publisher {
    config: PublisherConfig,
    keypair: KeyPair,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    roots: Arc<dyn TreeRootStore>,
    certs: Arc<dyn CertStore>,
}

impl Publisher {
    pub fn new(
        config: PublisherConfig,
        keypair: KeyPair,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        roots: Arc<dyn TreeRootStore>,
        certs: Arc<dyn CertStore>,
    ) -> Self {
        Publisher {
            config,
            keypair,
            directory,
            transport,
            roots,
            certs,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Register one application version, creating or reusing the identity
    /// certificate as needed.
    pub async fn deploy(&self, deployment: Deployment) -> Result<DeployOutcome, ProtocolError> {
        let publisher_cert = self
            .ensure_publisher_cert(deployment.force_recreate_publisher)
            .await?;

        let existing = fetch_certificate(
            self.directory.as_ref(),
            self.transport.as_ref(),
            self.roots.as_ref(),
            &self.config.url,
            &deployment.application_url,
            CertificateType::ApplicationCertificate,
            self.config.cas.clone(),
            self.primary_ils()?,
        )
        .await?;
        let deployment_version = existing
            .as_ref()
            .and_then(application_version)
            .map_or(1, |version| version + 1);
        let operation = if existing.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };

        let mut app = ApplicationCertificate {
            deployment_version,
            application_url: deployment.application_url.clone(),
            resources: deployment.resources,
            publisher: Box::new(publisher_cert.clone()),
            signature: Signature::from_bytes(Vec::new()),
            validity: self.validity(),
        };
        let unsigned = Certificate::ApplicationCertificate(app.clone());
        app.signature = self.keypair.sign_payload(&signing_payload(&unsigned)?)?;

        let registered = self
            .register(Certificate::ApplicationCertificate(app), operation)
            .await?;
        self.certs.set(
            &deployment.application_url,
            CertificateType::ApplicationCertificate,
            registered.clone(),
        );

        let acceptance = {
            let signature = self
                .keypair
                .sign_payload(&registered.acceptance_confirmation)?;
            registered.acceptance_confirmation.clone().wrap(signature)
        };
        info!(
            application = %deployment.application_url,
            version = deployment_version,
            "application deployed"
        );
        Ok(DeployOutcome {
            publisher_cert,
            application_cert: registered,
            acceptance_confirmation: acceptance,
        })
    }

    /// The registered identity certificate, creating or refreshing it when
    /// missing or when `force` is set.
    async fn ensure_publisher_cert(&self, force: bool) -> Result<RegisteredCert, ProtocolError> {
        let existing = self
            .certs
            .get(&self.config.subject, CertificateType::PublisherCertificate);
        if let Some(cert) = &existing {
            if !force {
                debug!(subject = %self.config.subject, "reusing registered identity");
                return Ok(cert.clone());
            }
        }

        let version = existing
            .as_ref()
            .and_then(|cert| publisher_version(&cert.cert))
            .map_or(1, |version| version + 1);
        let cert = Certificate::PublisherCertificate(PublisherCertificate {
            version,
            domains: self.config.domains.clone(),
            subject: self.config.subject.clone(),
            subject_public_key: self.keypair.public_key(),
            validity: self.validity(),
            expected_lifetime: self.config.cert_lifetime,
        });
        let operation = if existing.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };

        let registered = self.register(cert, operation).await?;
        self.certs.set(
            &self.config.subject,
            CertificateType::PublisherCertificate,
            registered.clone(),
        );
        info!(subject = %self.config.subject, version, "identity certificate registered");
        Ok(registered)
    }

    async fn register(
        &self,
        cert: Certificate,
        operation: Operation,
    ) -> Result<RegisteredCert, ProtocolError> {
        let draft = CertificateDraft {
            cert,
            ilses: self.config.ilses.clone(),
            cas: self.config.cas.clone(),
            ca_min: self.config.ca_min,
        };
        let arpki = generate_certificate(
            self.directory.as_ref(),
            self.transport.as_ref(),
            &self.keypair,
            draft,
        )
        .await?;
        modify_certificate(
            self.directory.as_ref(),
            self.transport.as_ref(),
            self.roots.as_ref(),
            &self.config.url,
            &self.keypair,
            arpki,
            operation,
        )
        .await
    }

    fn primary_ils(&self) -> Result<String, ProtocolError> {
        self.config
            .ilses
            .first()
            .cloned()
            .ok_or_else(|| ProtocolError::invalid("configuration", "no log server configured"))
    }

    fn validity(&self) -> Validity {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Validity {
            not_before: now,
            not_after: now + self.config.cert_lifetime,
        }
    }
}

fn publisher_version(cert: &ArpkiCert) -> Option<u32> {
    match &cert.cert {
        Certificate::PublisherCertificate(publisher) => Some(publisher.version),
        _ => None,
    }
}

fn application_version(cert: &ArpkiCert) -> Option<u32> {
    match &cert.cert {
        Certificate::ApplicationCertificate(app) => Some(app.deployment_version),
        _ => None,
    }
}

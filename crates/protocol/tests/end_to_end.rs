//! End-to-end protocol runs over an in-process network: registration through
//! the relay chain, lookups, deletion and monitor audits.

use std::sync::Arc;

use arpki_merkle::{LogLeaf, LogRootV1, MapLeafInclusion, MapRootV1, Operation, Proof};
use arpki_messages::{AuditRequest, AuditResponse, Message};
use arpki_protocol::operations::{fetch_certificate, modify_certificate};
use arpki_protocol::verification::{sign_nonce, verify_acceptance_confirmation};
use arpki_protocol::{Deployment, Directory, MemoryRootStore, Monitor, ProtocolError, Transport};
use arpki_test_helpers::{
    build_network, build_network_with_faults, build_publisher, seeded_keypair, Faults, TestNet,
};
use arpki_types::{
    Certificate, CertificateType, MultiSignature, PublicKey, Resource, Signature,
};

const PUBLISHER_SEED: u8 = 99;

fn deployment(application_url: &str) -> Deployment {
    Deployment {
        application_url: application_url.to_owned(),
        resources: vec![Resource {
            resource_url: format!("{application_url}/bundle.js"),
            content_hash: "c2hhMjU2LWFhYWE=".into(),
        }],
        force_recreate_publisher: false,
    }
}

async fn participant_keys(net: &TestNet, urls: &[String]) -> Vec<PublicKey> {
    let mut keys = Vec::with_capacity(urls.len());
    for url in urls {
        keys.push(net.network.lookup(url).await.unwrap().public_key);
    }
    keys
}

#[tokio::test]
async fn test_deploy_registers_publisher_and_application() {
    let net = build_network(3, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);

    let outcome = publisher.deploy(deployment("app.example.org")).await.unwrap();

    match &outcome.publisher_cert.cert.cert {
        Certificate::PublisherCertificate(cert) => {
            assert_eq!(cert.version, 1);
            assert_eq!(cert.subject, "publisher.example.org");
        }
        other => panic!("unexpected identity certificate: {other:?}"),
    }
    match &outcome.application_cert.cert.cert {
        Certificate::ApplicationCertificate(cert) => {
            assert_eq!(cert.deployment_version, 1);
            assert_eq!(cert.application_url, "app.example.org");
        }
        other => panic!("unexpected application certificate: {other:?}"),
    }

    // One head log server, three CAs, one publisher countersignature.
    assert_eq!(outcome.acceptance_confirmation.depth(), 5);
    let ca_keys = participant_keys(&net, &net.ca_urls).await;
    let ils_keys = participant_keys(&net, &net.ils_urls).await;
    verify_acceptance_confirmation(
        &outcome.acceptance_confirmation,
        &outcome.application_cert.cert,
        &ca_keys,
        &ils_keys,
        Some(&seeded_keypair(PUBLISHER_SEED).public_key()),
    )
    .unwrap();
}

#[tokio::test]
async fn test_fetch_returns_registered_certificate() {
    let net = build_network(2, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    let outcome = publisher.deploy(deployment("app.example.org")).await.unwrap();

    let roots = MemoryRootStore::new();
    let fetched = fetch_certificate(
        net.network.as_ref(),
        net.network.as_ref(),
        &roots,
        "client.example.org",
        "app.example.org",
        CertificateType::ApplicationCertificate,
        net.ca_urls.clone(),
        net.ils_urls[0].clone(),
    )
    .await
    .unwrap();
    assert_eq!(fetched, Some(outcome.application_cert.cert));

    let absent = fetch_certificate(
        net.network.as_ref(),
        net.network.as_ref(),
        &roots,
        "client.example.org",
        "nobody.example.org",
        CertificateType::ApplicationCertificate,
        net.ca_urls.clone(),
        net.ils_urls[0].clone(),
    )
    .await
    .unwrap();
    assert_eq!(absent, None);
}

#[tokio::test]
async fn test_redeploy_reuses_identity_and_bumps_version() {
    let net = build_network(2, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);

    publisher.deploy(deployment("app.example.org")).await.unwrap();
    let second = publisher.deploy(deployment("app.example.org")).await.unwrap();

    match &second.publisher_cert.cert.cert {
        Certificate::PublisherCertificate(cert) => assert_eq!(cert.version, 1),
        other => panic!("unexpected identity certificate: {other:?}"),
    }
    match &second.application_cert.cert.cert {
        Certificate::ApplicationCertificate(cert) => assert_eq!(cert.deployment_version, 2),
        other => panic!("unexpected application certificate: {other:?}"),
    }
}

#[tokio::test]
async fn test_force_recreate_bumps_publisher_version() {
    let net = build_network(2, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);

    publisher.deploy(deployment("app.example.org")).await.unwrap();
    let mut redeploy = deployment("app.example.org");
    redeploy.force_recreate_publisher = true;
    let second = publisher.deploy(redeploy).await.unwrap();

    match &second.publisher_cert.cert.cert {
        Certificate::PublisherCertificate(cert) => assert_eq!(cert.version, 2),
        other => panic!("unexpected identity certificate: {other:?}"),
    }
}

#[tokio::test]
async fn test_synchronization_across_log_servers() {
    let net = build_network(2, 2);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    let outcome = publisher.deploy(deployment("app.example.org")).await.unwrap();

    // Head log server, one secondary, two CAs.
    assert_eq!(
        outcome.application_cert.acceptance_confirmation.depth(),
        4
    );
    let ca_keys = participant_keys(&net, &net.ca_urls).await;
    let ils_keys = participant_keys(&net, &net.ils_urls).await;
    verify_acceptance_confirmation(
        &outcome.application_cert.acceptance_confirmation,
        &outcome.application_cert.cert,
        &ca_keys,
        &ils_keys,
        None,
    )
    .unwrap();

    // The secondary applied the same modifications and serves the
    // certificate itself.
    let roots = MemoryRootStore::new();
    let fetched = fetch_certificate(
        net.network.as_ref(),
        net.network.as_ref(),
        &roots,
        "client.example.org",
        "app.example.org",
        CertificateType::ApplicationCertificate,
        net.ca_urls.clone(),
        net.ils_urls[1].clone(),
    )
    .await
    .unwrap();
    assert_eq!(fetched, Some(outcome.application_cert.cert));
}

#[tokio::test]
async fn test_delete_unregisters_certificate() {
    let net = build_network(2, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    let outcome = publisher.deploy(deployment("app.example.org")).await.unwrap();

    let roots = MemoryRootStore::new();
    modify_certificate(
        net.network.as_ref(),
        net.network.as_ref(),
        &roots,
        "publisher.example.org",
        &seeded_keypair(PUBLISHER_SEED),
        outcome.application_cert.cert.clone(),
        Operation::Delete,
    )
    .await
    .unwrap();

    let fetched = fetch_certificate(
        net.network.as_ref(),
        net.network.as_ref(),
        &roots,
        "publisher.example.org",
        "app.example.org",
        CertificateType::ApplicationCertificate,
        net.ca_urls.clone(),
        net.ils_urls[0].clone(),
    )
    .await
    .unwrap();
    assert_eq!(fetched, None);
}

#[tokio::test]
async fn test_monitor_audits_cleanly_and_incrementally() {
    let net = build_network(2, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    publisher.deploy(deployment("app.example.org")).await.unwrap();

    let monitor = Monitor::new(
        "monitor.example.org".into(),
        net.network.clone() as Arc<dyn Directory>,
        net.network.clone(),
    );
    let ils = &net.ils_urls[0];
    monitor.audit(ils, &net.ca_urls).await.unwrap();
    assert_eq!(
        monitor.audited_revision(ils, CertificateType::PublisherCertificate),
        Some(1)
    );
    assert_eq!(
        monitor.audited_revision(ils, CertificateType::ApplicationCertificate),
        Some(1)
    );
    assert_eq!(
        monitor.audited_revision(ils, CertificateType::AuditionCertificate),
        Some(0)
    );

    // A second deployment appends to the application log; the next audit
    // replays only the new entry.
    publisher.deploy(deployment("app.example.org")).await.unwrap();
    monitor.audit(ils, &net.ca_urls).await.unwrap();
    assert_eq!(
        monitor.audited_revision(ils, CertificateType::ApplicationCertificate),
        Some(2)
    );
}

#[tokio::test]
async fn test_misbehaving_log_server_fails_audit() {
    let net = build_network_with_faults(
        2,
        1,
        Faults {
            omit_audit_map_proofs: true,
        },
    );
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    publisher.deploy(deployment("app.example.org")).await.unwrap();

    let monitor = Monitor::new(
        "monitor.example.org".into(),
        net.network.clone() as Arc<dyn Directory>,
        net.network.clone(),
    );
    let ils = &net.ils_urls[0];
    let err = monitor.audit(ils, &net.ca_urls).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConsistencyViolation(_)));

    // A failed audit advances nothing.
    assert_eq!(
        monitor.audited_revision(ils, CertificateType::PublisherCertificate),
        None
    );
}

fn forged_root(revision: u64) -> MapRootV1 {
    MapRootV1 {
        root_hash: vec![7; 32],
        timestamp_nanos: 0,
        revision,
        log_root: LogRootV1 {
            tree_size: revision,
            root_hash: vec![8; 32],
            timestamp_nanos: 0,
            revision,
            metadata: Vec::new(),
            signature: Vec::new(),
        },
        signature: Vec::new(),
    }
}

#[tokio::test]
async fn test_relaying_ca_refuses_forged_audit_proofs() {
    let net = build_network(2, 1);
    let ils_keypair = seeded_keypair(50);
    let request = AuditRequest {
        nonce: 7,
        cert_type: CertificateType::PublisherCertificate,
        cas: net.ca_urls.clone(),
        ils: net.ils_urls[0].clone(),
        since_revision: 0,
    };

    // The nonce and root signatures are genuine but every proof group
    // carries garbage bytes instead of the server's signature.
    let root = forged_root(1);
    let garbage = || Signature::from_bytes(vec![0; 64]);
    let mut response = AuditResponse {
        nonce: request.nonce,
        request,
        leaves: Vec::new(),
        leaves_signature: garbage(),
        log_proofs: Vec::new(),
        log_proofs_signature: garbage(),
        consistency_proof: Proof {
            leaf_index: 0,
            hashes_list: Vec::new(),
        },
        consistency_proof_signature: garbage(),
        map_proofs: Vec::new(),
        map_proofs_signature: garbage(),
        root_signature: MultiSignature::leaf(ils_keypair.sign_payload(&root).unwrap()),
        root,
        nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
    };
    response.nonce_signature = sign_nonce(&ils_keypair, &response).unwrap();

    let tail = net.ca_urls.last().unwrap();
    let err = net
        .network
        .send(tail, Message::AuditResponse(Box::new(response)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::BadSignature(_)));
}

#[tokio::test]
async fn test_relaying_ca_refuses_unverifiable_audit_root() {
    let net = build_network(2, 1);
    let ils_keypair = seeded_keypair(50);
    let request = AuditRequest {
        nonce: 8,
        cert_type: CertificateType::PublisherCertificate,
        cas: net.ca_urls.clone(),
        ils: net.ils_urls[0].clone(),
        since_revision: 0,
    };

    // Every signature checks out, but the root was never produced by the
    // log server and no consistency can be derived for it.
    let root = forged_root(9);
    let leaves: Vec<LogLeaf> = Vec::new();
    let log_proofs: Vec<Proof> = Vec::new();
    let consistency_proof = Proof {
        leaf_index: 0,
        hashes_list: Vec::new(),
    };
    let map_proofs: Vec<MapLeafInclusion> = Vec::new();
    let mut response = AuditResponse {
        nonce: request.nonce,
        request,
        leaves_signature: ils_keypair.sign_payload(&leaves).unwrap(),
        leaves,
        log_proofs_signature: ils_keypair.sign_payload(&log_proofs).unwrap(),
        log_proofs,
        consistency_proof_signature: ils_keypair.sign_payload(&consistency_proof).unwrap(),
        consistency_proof,
        map_proofs_signature: ils_keypair.sign_payload(&map_proofs).unwrap(),
        map_proofs,
        root_signature: MultiSignature::leaf(ils_keypair.sign_payload(&root).unwrap()),
        root,
        nonce_signature: MultiSignature::leaf(Signature::from_bytes(Vec::new())),
    };
    response.nonce_signature = sign_nonce(&ils_keypair, &response).unwrap();

    let tail = net.ca_urls.last().unwrap();
    let result = net
        .network
        .send(tail, Message::AuditResponse(Box::new(response)))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_registration_requires_ca_quorum() {
    let net = build_network(1, 1);
    let publisher = build_publisher(&net, "publisher.example.org", PUBLISHER_SEED);
    assert!(publisher.deploy(deployment("app.example.org")).await.is_err());
}

//! Fixtures for exercising the protocol end to end in one process.
//!
//! [`build_network`] stands up certificate authorities and scripted log
//! servers on an [`InMemoryNetwork`]; [`build_publisher`] attaches a
//! requester to it. Keys are derived from fixed seeds so failures reproduce.

pub mod ils;
pub mod net;
pub mod tree;

pub use ils::{tree_ids, Faults, IlsConfig, IndexedLogServer};
pub use net::{InMemoryNetwork, Node};
pub use tree::{InMemoryLog, InMemoryMap};

use std::sync::Arc;

use arpki_protocol::{
    CaConfig, CertificateAuthority, MemoryCertStore, MemoryRootStore, Publisher, PublisherConfig,
};
use arpki_types::{
    CertificateType, KeyPair, ParticipantInfo, ParticipantRole, TreeInfo, TreeKind,
};

const CERT_TYPES: [CertificateType; 3] = [
    CertificateType::PublisherCertificate,
    CertificateType::ApplicationCertificate,
    CertificateType::AuditionCertificate,
];

/// A network of CAs and log servers, all mutually trusting.
pub struct TestNet {
    pub network: Arc<InMemoryNetwork>,
    pub cas: Vec<Arc<CertificateAuthority>>,
    pub ilses: Vec<Arc<IndexedLogServer>>,
    pub ca_urls: Vec<String>,
    pub ils_urls: Vec<String>,
}

pub fn seeded_keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(&[seed; 32])
}

pub fn build_network(num_cas: usize, num_ilses: usize) -> TestNet {
    build_network_with_faults(num_cas, num_ilses, Faults::default())
}

/// As [`build_network`], with the given faults injected into every log
/// server.
pub fn build_network_with_faults(num_cas: usize, num_ilses: usize, faults: Faults) -> TestNet {
    let network = Arc::new(InMemoryNetwork::new());
    let ca_urls: Vec<String> = (1..=num_cas)
        .map(|i| format!("ca{i}.example.org"))
        .collect();
    let ils_urls: Vec<String> = (1..=num_ilses)
        .map(|i| format!("ils{i}.example.org"))
        .collect();

    let mut cas = Vec::with_capacity(num_cas);
    for (i, url) in ca_urls.iter().enumerate() {
        let keypair = seeded_keypair(10 + i as u8);
        let info = ParticipantInfo {
            role: ParticipantRole::Ca,
            url: url.clone(),
            public_key: keypair.public_key(),
            trees: Vec::new(),
        };
        let ca = Arc::new(CertificateAuthority::new(
            CaConfig {
                url: url.clone(),
                trusted_cas: ca_urls.clone(),
                trusted_ilses: ils_urls.clone(),
            },
            keypair,
            network.clone(),
            network.clone(),
            Arc::new(MemoryRootStore::new()),
        ));
        network.register(info, ca.clone());
        cas.push(ca);
    }

    let mut ilses = Vec::with_capacity(num_ilses);
    for (i, url) in ils_urls.iter().enumerate() {
        let keypair = seeded_keypair(50 + i as u8);
        let public_key = keypair.public_key();
        let trees = CERT_TYPES
            .iter()
            .flat_map(|&cert_type| {
                let (log_id, map_id) = tree_ids(url, cert_type);
                [
                    TreeInfo {
                        tree_id: log_id,
                        kind: TreeKind::Log,
                        cert_type,
                        public_key,
                    },
                    TreeInfo {
                        tree_id: map_id,
                        kind: TreeKind::Map,
                        cert_type,
                        public_key,
                    },
                ]
            })
            .collect();
        let info = ParticipantInfo {
            role: ParticipantRole::Ils,
            url: url.clone(),
            public_key,
            trees,
        };
        let ils = Arc::new(IndexedLogServer::new(
            IlsConfig {
                url: url.clone(),
                trusted_cas: ca_urls.clone(),
                trusted_ilses: ils_urls.clone(),
            },
            keypair,
            network.clone(),
            network.clone(),
            faults.clone(),
        ));
        network.register(info, ils.clone());
        ilses.push(ils);
    }

    TestNet {
        network,
        cas,
        ilses,
        ca_urls,
        ils_urls,
    }
}

/// A publisher wired to the network, with empty stores of its own.
pub fn build_publisher(net: &TestNet, subject: &str, seed: u8) -> Publisher {
    Publisher::new(
        PublisherConfig {
            url: subject.to_owned(),
            subject: subject.to_owned(),
            domains: vec![subject.to_owned()],
            cas: net.ca_urls.clone(),
            ilses: net.ils_urls.clone(),
            ca_min: 2,
            cert_lifetime: 86_400_000,
        },
        seeded_keypair(seed),
        net.network.clone(),
        net.network.clone(),
        Arc::new(MemoryRootStore::new()),
        Arc::new(MemoryCertStore::new()),
    )
}

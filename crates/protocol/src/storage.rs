//! Trusted root and certificate stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use arpki_merkle::MapRootV1;
use arpki_types::{CertificateType, RegisteredCert};

/// Map roots a participant has come to trust, per log server and certificate
/// type, indexed by revision.
pub trait TreeRootStore: Send + Sync {
    /// The root at `revision`, or the latest one when `revision` is `None`.
    fn get(&self, ils: &str, cert_type: CertificateType, revision: Option<u64>)
        -> Option<MapRootV1>;

    fn set(&self, ils: &str, cert_type: CertificateType, root: MapRootV1);

    fn latest_revision(&self, ils: &str, cert_type: CertificateType) -> Option<u64> {
        self.get(ils, cert_type, None).map(|root| root.revision)
    }
}

/// In-memory [`TreeRootStore`].
#[derive(Default)]
pub struct MemoryRootStore {
    roots: Mutex<HashMap<(String, CertificateType), BTreeMap<u64, MapRootV1>>>,
}

impl MemoryRootStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TreeRootStore for MemoryRootStore {
    fn get(
        &self,
        ils: &str,
        cert_type: CertificateType,
        revision: Option<u64>,
    ) -> Option<MapRootV1> {
        let roots = match self.roots.lock() {
            Ok(roots) => roots,
            Err(poisoned) => poisoned.into_inner(),
        };
        let by_revision = roots.get(&(ils.to_owned(), cert_type))?;
        match revision {
            Some(revision) => by_revision.get(&revision).cloned(),
            None => by_revision.values().next_back().cloned(),
        }
    }

    fn set(&self, ils: &str, cert_type: CertificateType, root: MapRootV1) {
        let mut roots = match self.roots.lock() {
            Ok(roots) => roots,
            Err(poisoned) => poisoned.into_inner(),
        };
        roots
            .entry((ils.to_owned(), cert_type))
            .or_default()
            .insert(root.revision, root);
    }
}

/// Registered certificates a publisher holds on to between deployments.
pub trait CertStore: Send + Sync {
    fn get(&self, domain: &str, cert_type: CertificateType) -> Option<RegisteredCert>;
    fn set(&self, domain: &str, cert_type: CertificateType, cert: RegisteredCert);
}

/// In-memory [`CertStore`].
#[derive(Default)]
pub struct MemoryCertStore {
    certs: Mutex<HashMap<(String, CertificateType), RegisteredCert>>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertStore for MemoryCertStore {
    fn get(&self, domain: &str, cert_type: CertificateType) -> Option<RegisteredCert> {
        let certs = match self.certs.lock() {
            Ok(certs) => certs,
            Err(poisoned) => poisoned.into_inner(),
        };
        certs.get(&(domain.to_owned(), cert_type)).cloned()
    }

    fn set(&self, domain: &str, cert_type: CertificateType, cert: RegisteredCert) {
        let mut certs = match self.certs.lock() {
            Ok(certs) => certs,
            Err(poisoned) => poisoned.into_inner(),
        };
        certs.insert((domain.to_owned(), cert_type), cert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpki_merkle::LogRootV1;

    fn root(revision: u64) -> MapRootV1 {
        MapRootV1 {
            root_hash: vec![revision as u8; 32],
            timestamp_nanos: 0,
            revision,
            log_root: LogRootV1 {
                tree_size: revision,
                root_hash: vec![revision as u8; 32],
                timestamp_nanos: 0,
                revision,
                metadata: Vec::new(),
                signature: Vec::new(),
            },
            signature: Vec::new(),
        }
    }

    #[test]
    fn test_latest_root_wins() {
        let store = MemoryRootStore::new();
        let cert_type = CertificateType::PublisherCertificate;
        store.set("ils.example.org", cert_type, root(1));
        store.set("ils.example.org", cert_type, root(3));
        store.set("ils.example.org", cert_type, root(2));

        let latest = store.get("ils.example.org", cert_type, None).unwrap();
        assert_eq!(latest.revision, 3);
        assert_eq!(store.latest_revision("ils.example.org", cert_type), Some(3));
    }

    #[test]
    fn test_roots_retrievable_by_revision() {
        let store = MemoryRootStore::new();
        let cert_type = CertificateType::PublisherCertificate;
        store.set("ils.example.org", cert_type, root(1));
        store.set("ils.example.org", cert_type, root(2));

        assert_eq!(
            store
                .get("ils.example.org", cert_type, Some(1))
                .map(|r| r.revision),
            Some(1)
        );
        assert!(store.get("ils.example.org", cert_type, Some(9)).is_none());
    }

    #[test]
    fn test_roots_keyed_per_ils_and_type() {
        let store = MemoryRootStore::new();
        store.set(
            "ils1.example.org",
            CertificateType::PublisherCertificate,
            root(1),
        );

        assert!(store
            .get("ils2.example.org", CertificateType::PublisherCertificate, None)
            .is_none());
        assert!(store
            .get("ils1.example.org", CertificateType::ApplicationCertificate, None)
            .is_none());
    }
}

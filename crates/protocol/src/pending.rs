//! Pending request tracking.
//!
//! Responses to relayed requests do not come back on the call that sent
//! them; they arrive as fresh inbound messages after travelling the relay
//! chain. A handler that needs the eventual response registers the request's
//! fingerprint here and awaits the channel; the inbound handler for the
//! response resolves it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use arpki_messages::Message;

/// Waiters keyed by request fingerprint.
#[derive(Default)]
pub struct PendingRequestTable {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Message>>>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the response to the request with this
    /// fingerprint.
    pub fn register(&self, fingerprint: String) -> oneshot::Receiver<Message> {
        let (sender, receiver) = oneshot::channel();
        let mut waiters = match self.waiters.lock() {
            Ok(waiters) => waiters,
            Err(poisoned) => poisoned.into_inner(),
        };
        waiters.entry(fingerprint).or_default().push(sender);
        receiver
    }

    /// Deliver `message` to every waiter for `fingerprint`. Returns whether
    /// anyone was waiting.
    pub fn resolve(&self, fingerprint: &str, message: &Message) -> bool {
        let senders = {
            let mut waiters = match self.waiters.lock() {
                Ok(waiters) => waiters,
                Err(poisoned) => poisoned.into_inner(),
            };
            waiters.remove(fingerprint)
        };
        match senders {
            Some(senders) => {
                let mut delivered = false;
                for sender in senders {
                    delivered |= sender.send(message.clone()).is_ok();
                }
                delivered
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpki_messages::GetRequest;
    use arpki_types::CertificateType;

    fn message() -> Message {
        Message::GetRequest(GetRequest {
            nonce: 1,
            domain: "app.example.org".into(),
            cas: Vec::new(),
            ils: "ils.example.org".into(),
            cert_type: CertificateType::PublisherCertificate,
        })
    }

    #[tokio::test]
    async fn test_resolve_wakes_registered_waiter() {
        let table = PendingRequestTable::new();
        let receiver = table.register("abc".into());

        assert!(table.resolve("abc", &message()));
        assert_eq!(receiver.await.unwrap(), message());
    }

    #[tokio::test]
    async fn test_identical_requests_share_one_resolution() {
        let table = PendingRequestTable::new();
        let first = table.register("abc".into());
        let second = table.register("abc".into());

        assert!(table.resolve("abc", &message()));
        assert_eq!(first.await.unwrap(), message());
        assert_eq!(second.await.unwrap(), message());
        // Both waiters rode the same entry; nothing is left behind.
        assert!(!table.resolve("abc", &message()));
    }

    #[tokio::test]
    async fn test_resolve_without_waiter_reports_false() {
        let table = PendingRequestTable::new();
        assert!(!table.resolve("nobody", &message()));
    }

    #[tokio::test]
    async fn test_waiter_removed_after_resolution() {
        let table = PendingRequestTable::new();
        let _receiver = table.register("abc".into());
        assert!(table.resolve("abc", &message()));
        assert!(!table.resolve("abc", &message()));
    }
}

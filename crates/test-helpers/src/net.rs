//! An in-process network of protocol participants.
//!
//! Every participant registers under its URL; sending a message runs the
//! receiver's handler on the caller's task and returns its reply. The same
//! table doubles as the participant directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use arpki_messages::Message;
use arpki_protocol::{CertificateAuthority, Directory, ProtocolError, Transport};
use arpki_types::ParticipantInfo;

use crate::ils::IndexedLogServer;

/// A participant reachable on the network.
#[async_trait]
pub trait Node: Send + Sync {
    async fn handle(&self, message: Message) -> Result<Option<Message>, ProtocolError>;
}

#[async_trait]
impl Node for CertificateAuthority {
    async fn handle(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        CertificateAuthority::handle(self, message).await
    }
}

#[async_trait]
impl Node for IndexedLogServer {
    async fn handle(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        IndexedLogServer::handle(self, message).await
    }
}

#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: Mutex<HashMap<String, Arc<dyn Node>>>,
    participants: Mutex<HashMap<String, ParticipantInfo>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a participant on the network under its directory entry's URL.
    pub fn register(&self, info: ParticipantInfo, node: Arc<dyn Node>) {
        let url = info.url.clone();
        self.register_participant(info);
        match self.nodes.lock() {
            Ok(mut nodes) => {
                nodes.insert(url, node);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(url, node);
            }
        }
    }

    /// List a participant in the directory without attaching a handler, for
    /// requesters that only ever initiate.
    pub fn register_participant(&self, info: ParticipantInfo) {
        match self.participants.lock() {
            Ok(mut participants) => {
                participants.insert(info.url.clone(), info);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(info.url.clone(), info);
            }
        }
    }

    fn node(&self, url: &str) -> Option<Arc<dyn Node>> {
        match self.nodes.lock() {
            Ok(nodes) => nodes.get(url).cloned(),
            Err(poisoned) => poisoned.into_inner().get(url).cloned(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn send(&self, to: &str, message: Message) -> Result<Option<Message>, ProtocolError> {
        let node = self
            .node(to)
            .ok_or_else(|| ProtocolError::UnknownParticipant(to.to_owned()))?;
        trace!(to, "delivering message");
        node.handle(message).await
    }
}

#[async_trait]
impl Directory for InMemoryNetwork {
    async fn lookup(&self, url: &str) -> Result<ParticipantInfo, ProtocolError> {
        let participants = match self.participants.lock() {
            Ok(participants) => participants,
            Err(poisoned) => poisoned.into_inner(),
        };
        participants
            .get(url)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownParticipant(url.to_owned()))
    }
}

//! Participant directory and message transport seams.

use async_trait::async_trait;

use arpki_messages::Message;
use arpki_types::ParticipantInfo;

use crate::error::ProtocolError;

/// Resolves participant URLs to their directory entries.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<ParticipantInfo, ProtocolError>;

    /// Look up several participants, preserving order.
    async fn lookup_many(&self, urls: &[String]) -> Result<Vec<ParticipantInfo>, ProtocolError> {
        let mut infos = Vec::with_capacity(urls.len());
        for url in urls {
            infos.push(self.lookup(url).await?);
        }
        Ok(infos)
    }
}

/// Delivers a message to a participant. The reply, if the receiver produces
/// one synchronously, comes back on the same call; responses that travel the
/// relay chain arrive as separate inbound messages instead.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, message: Message) -> Result<Option<Message>, ProtocolError>;
}

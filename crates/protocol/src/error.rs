//! Protocol errors.

use arpki_merkle::ProofError;
use arpki_types::{CryptoError, MultiSignatureError};

/// Why a request, response or audit was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A message or certificate is structurally invalid.
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    /// A signature did not verify against the expected key.
    #[error("invalid {0} signature")]
    BadSignature(&'static str),

    /// A response nonce did not match its request.
    #[error("invalid response nonce")]
    BadNonce,

    /// Evidence of log misbehavior or a forked view.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// A participant could not be found in the directory.
    #[error("unknown participant {0}")]
    UnknownParticipant(String),

    /// A participant has no tree for the requested certificate type.
    #[error("participant {url} has no {what} tree")]
    MissingTree { url: String, what: &'static str },

    /// The peer answered with the wrong message type, or not at all.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    /// Sending a message failed.
    #[error("transport: {0}")]
    Transport(String),

    /// The awaited response never arrived.
    #[error("response channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    MultiSignature(#[from] MultiSignatureError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::Invalid {
            what,
            reason: reason.into(),
        }
    }
}

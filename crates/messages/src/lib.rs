//! Wire messages exchanged between ARPKI participants.
//!
//! Messages travel as JSON, discriminated by a top-level `type` field on the
//! [`Message`] envelope. Signed requests and the nonce-signature scheme on
//! responses are documented in [`request`] and [`response`].

pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};

pub use request::{
    signing_payload, AuditRequest, CertificateDraft, GenerateRequest, GetRequest,
    ModificationRequest, RootRequest, SynchronizationCommit, SynchronizationRequest,
};
pub use response::{
    nonce_payload, AuditResponse, GenerateResponse, GetResponse, ModificationResponse,
    RootResponse, SynchronizationAcknowledge, SynchronizationResponse,
};

/// Transport envelope for every message in the system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    GenerateRequest(GenerateRequest),
    GenerateResponse(GenerateResponse),
    ModificationRequest(ModificationRequest),
    ModificationResponse(Box<ModificationResponse>),
    SynchronizationRequest(SynchronizationRequest),
    SynchronizationResponse(SynchronizationResponse),
    SynchronizationCommit(SynchronizationCommit),
    SynchronizationAcknowledge(Box<SynchronizationAcknowledge>),
    GetRequest(GetRequest),
    GetResponse(Box<GetResponse>),
    RootRequest(RootRequest),
    RootResponse(Box<RootResponse>),
    AuditRequest(AuditRequest),
    AuditResponse(Box<AuditResponse>),
}

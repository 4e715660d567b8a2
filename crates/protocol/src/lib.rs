//! Participant logic for the ARPKI protocol.
//!
//! The pieces: [`CertificateAuthority`] signs and relays, [`Publisher`]
//! registers certificates, [`Monitor`] replays log history, and the
//! [`operations`] module exposes the requester-side primitives they share.
//! Messaging and persistence sit behind the [`Directory`], [`Transport`],
//! [`TreeRootStore`] and [`CertStore`] seams.

pub mod operations;
pub mod verification;

mod audit;
mod ca;
mod directory;
mod error;
mod get;
mod modification;
mod monitor;
mod pending;
mod publisher;
mod root;
mod storage;

pub use ca::{CaConfig, CertificateAuthority};
pub use directory::{Directory, Transport};
pub use error::ProtocolError;
pub use monitor::Monitor;
pub use pending::PendingRequestTable;
pub use publisher::{DeployOutcome, Deployment, Publisher, PublisherConfig};
pub use root::resolve_current_root;
pub use storage::{CertStore, MemoryCertStore, MemoryRootStore, TreeRootStore};

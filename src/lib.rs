#![forbid(unsafe_code)]

//! Shared-workspace replication: optimistic clients, a single serializer.
//!
//! Every client sees one totally-ordered stream of shared events. Local
//! mutations apply optimistically and are proposed to the server, which
//! linearizes them into a canonical log and broadcasts what it accepts.
//! Stale proposals come back with the missing tail so the client can catch
//! up and retry.

pub mod client;
pub mod config;
pub mod core;
pub mod engine;
mod error;
pub mod proto;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};

// Re-export the protocol surface at the crate root.
pub use crate::client::{Client, ClientError};
pub use crate::core::{
    ClientEventId, Event, EventId, EventLog, PendingProposal, RejectionStrategy,
    SharedDecodeError, Workspace,
};
pub use crate::engine::{ControlMsg, Engine, EngineAction, LocalOrigin, ProtocolViolation};
pub use crate::proto::{Accept, Catchup, Proposal, ProposalReply, Reject};

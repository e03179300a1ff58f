//! Wire message schemas and JSON encoding.
//!
//! Everything on the wire is JSON with camelCase keys. Transport envelopes
//! are tagged with `"type"`; the proposal reply keeps its own external
//! `accept`/`reject` tag so the payload shape matches the protocol exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{ClientEventId, Event, EventId};

/// A client's bid to append one shared message to the canonical log.
///
/// `latest_known_event_id` is the causal context: the highest id the client
/// had folded when it formed the proposal. The server accepts only proposals
/// made with full knowledge of the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub shared_msg: Value,
    pub latest_known_event_id: EventId,
    pub client_event_id: ClientEventId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accept {
    pub client_event_id: ClientEventId,
    pub event_id: EventId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reject {
    pub client_event_id: ClientEventId,
    pub missing_events: Vec<Event<Value>>,
}

/// Reply to a proposal: `{"accept": {..}}` or `{"reject": {..}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProposalReply {
    #[serde(rename = "accept")]
    Accept(Accept),
    #[serde(rename = "reject")]
    Reject(Reject),
}

/// The catch-up bundle: the full log at connect time. May be empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catchup {
    pub event_stream: Vec<Event<Value>>,
}

/// Messages a client sends to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientToServer {
    Propose(Proposal),
    Pong { nonce: u64 },
}

/// Messages the server sends to a client.
///
/// `Catchup` is sent exactly once, as the first message of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerToClient {
    Catchup(Catchup),
    Event(Event<Value>),
    Reply(ProposalReply),
    Ping { nonce: u64 },
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("json encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("json decode: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode_client_message(msg: &ClientToServer) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(msg).map_err(ProtoError::Encode)
}

pub fn decode_client_message(bytes: &[u8]) -> Result<ClientToServer, ProtoError> {
    serde_json::from_slice(bytes).map_err(ProtoError::Decode)
}

pub fn encode_server_message(msg: &ServerToClient) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(msg).map_err(ProtoError::Encode)
}

pub fn decode_server_message(bytes: &[u8]) -> Result<ServerToClient, ProtoError> {
    serde_json::from_slice(bytes).map_err(ProtoError::Decode)
}

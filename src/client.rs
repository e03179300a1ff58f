//! Single-threaded client runtime: binds an engine to a transport channel.
//!
//! Cooperative scheduling: every `dispatch` and every message processed by
//! `pump` runs to completion against the replica before the next one starts.

use std::time::Duration;

use thiserror::Error;

use crate::core::{EventId, Workspace};
use crate::engine::{Engine, EngineAction, LocalOrigin, ProtocolViolation};
use crate::proto::{ClientToServer, ServerToClient};
use crate::transport::{ClientChannel, Incoming, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

pub struct Client<A: Workspace, C: ClientChannel> {
    engine: Engine<A>,
    channel: C,
}

impl<A: Workspace, C: ClientChannel> Client<A, C> {
    /// Wraps a freshly connected channel. The catch-up bundle is folded by
    /// the first `pump` that sees it.
    pub fn new(app: A, channel: C) -> Self {
        Self {
            engine: Engine::new(app),
            channel,
        }
    }

    /// Feeds a view-produced action into the engine and performs whatever
    /// transport work it requests.
    pub fn dispatch(&mut self, origin: LocalOrigin<A>) -> Result<(), ClientError> {
        let actions = self.engine.handle_local(origin);
        self.apply(actions)
    }

    /// Drains every delivery currently queued on the channel. Returns how
    /// many were processed.
    pub fn pump(&mut self) -> Result<usize, ClientError> {
        let mut processed = 0;
        while let Some(incoming) = self.channel.poll()? {
            self.process(incoming)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Blocks up to `timeout` for one delivery, then drains the rest.
    pub fn pump_wait(&mut self, timeout: Duration) -> Result<usize, ClientError> {
        match self.channel.recv_timeout(timeout)? {
            Some(incoming) => {
                self.process(incoming)?;
                Ok(1 + self.pump()?)
            }
            None => Ok(0),
        }
    }

    pub fn predicted(&self) -> A::SharedState {
        self.engine.predicted()
    }

    pub fn view(&self) -> A::View {
        self.engine.view()
    }

    pub fn canonical(&self) -> &A::SharedState {
        self.engine.canonical()
    }

    pub fn local(&self) -> &A::LocalState {
        self.engine.local()
    }

    pub fn latest_known_event_id(&self) -> EventId {
        self.engine.latest_known_event_id()
    }

    pub fn pending_len(&self) -> usize {
        self.engine.pending_len()
    }

    fn process(&mut self, incoming: Incoming) -> Result<(), ClientError> {
        match incoming {
            // Keepalive is answered here; the engine never sees it.
            Incoming::Message(ServerToClient::Ping { nonce }) => {
                self.channel.send(&ClientToServer::Pong { nonce })?;
                Ok(())
            }
            Incoming::Message(msg) => {
                let actions = self.engine.handle_incoming(msg);
                self.apply(actions)
            }
            Incoming::Malformed(reason) => {
                self.engine.note_decode_error(reason);
                Ok(())
            }
        }
    }

    fn apply(&mut self, actions: Vec<EngineAction>) -> Result<(), ClientError> {
        for action in actions {
            match action {
                EngineAction::Send(proposal) => {
                    self.channel.send(&ClientToServer::Propose(proposal))?;
                }
                EngineAction::Close { reason } => {
                    tracing::error!("closing session: {reason}");
                    return Err(reason.into());
                }
            }
        }
        Ok(())
    }
}

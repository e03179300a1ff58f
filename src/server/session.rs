//! Per-connection session loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::config::Limits;
use crate::proto::{Catchup, ClientToServer, ServerToClient};
use crate::transport::{MessageReader, MessageWriter, ServerConnection, TransportError};

use super::broadcast::{BroadcastError, EventBroadcaster};
use super::serializer::StateRequest;
use super::SessionId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error("state thread unavailable")]
    StateUnavailable,
}

#[derive(Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub req_tx: Sender<StateRequest>,
    pub broadcaster: EventBroadcaster,
    pub limits: Limits,
    pub shutdown: Arc<AtomicBool>,
}

enum ReaderEvent {
    Message(ClientToServer),
    Closed,
    Failed(String),
}

/// Drives one session to completion: catch-up first, then a select loop over
/// inbound proposals, broadcast events, and the keepalive tick.
pub fn run_session<C: ServerConnection>(conn: C, ctx: SessionContext) -> Result<(), SessionError> {
    let peer = conn.peer();
    let (reader, mut writer) = conn.split()?;

    // Subscribe before snapshotting so no event can fall between the
    // catch-up bundle and the live stream; the client's duplicate filter
    // absorbs the overlap this can produce.
    let subscription = ctx.broadcaster.subscribe()?;

    let (snap_tx, snap_rx) = crossbeam::channel::bounded(1);
    ctx.req_tx
        .send(StateRequest::Snapshot { respond: snap_tx })
        .map_err(|_| SessionError::StateUnavailable)?;
    let event_stream = snap_rx.recv().map_err(|_| SessionError::StateUnavailable)?;

    tracing::debug!(
        session = ctx.id.get(),
        peer = %peer,
        events = event_stream.len(),
        "session connected; sending catch-up"
    );
    writer.write_message(&ServerToClient::Catchup(Catchup { event_stream }))?;

    let (in_tx, in_rx) = crossbeam::channel::unbounded();
    spawn_reader(reader, in_tx);

    let tick = crossbeam::channel::tick(Duration::from_millis(250));
    let broadcast_rx = subscription.receiver();
    let ping_every = Duration::from_millis(ctx.limits.ping_interval_ms);
    let mut last_ping = Instant::now();
    let mut next_ping_nonce = 1u64;

    loop {
        crossbeam::select! {
            recv(in_rx) -> msg => match msg {
                Ok(ReaderEvent::Message(ClientToServer::Propose(proposal))) => {
                    let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
                    ctx.req_tx
                        .send(StateRequest::Propose {
                            origin: ctx.id,
                            proposal,
                            respond: reply_tx,
                        })
                        .map_err(|_| SessionError::StateUnavailable)?;
                    let reply = reply_rx
                        .recv()
                        .map_err(|_| SessionError::StateUnavailable)?;
                    writer.write_message(&ServerToClient::Reply(reply))?;
                }
                Ok(ReaderEvent::Message(ClientToServer::Pong { nonce })) => {
                    tracing::trace!(session = ctx.id.get(), nonce, "pong");
                }
                Ok(ReaderEvent::Closed) | Err(_) => break,
                Ok(ReaderEvent::Failed(reason)) => {
                    tracing::warn!(session = ctx.id.get(), peer = %peer, "session read failed: {reason}");
                    break;
                }
            },
            recv(broadcast_rx) -> event => match event {
                Ok(broadcast) => {
                    // The accepter learns the id from its reply instead.
                    if broadcast.origin != ctx.id {
                        writer.write_message(&ServerToClient::Event(broadcast.event))?;
                    }
                }
                Err(_) => {
                    // Dropped as a lagged subscriber, or the broadcaster is
                    // gone; either way this session cannot stay consistent.
                    tracing::warn!(session = ctx.id.get(), "broadcast stream ended");
                    break;
                }
            },
            recv(tick) -> _ => {
                if ctx.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if ping_every > Duration::ZERO && last_ping.elapsed() >= ping_every {
                    writer.write_message(&ServerToClient::Ping { nonce: next_ping_nonce })?;
                    next_ping_nonce += 1;
                    last_ping = Instant::now();
                }
            },
        }
    }

    tracing::debug!(session = ctx.id.get(), peer = %peer, "session closed");
    Ok(())
}

/// The reader thread outlives the session loop when the peer holds its read
/// half open; it is detached and dies with the connection.
fn spawn_reader<R: MessageReader + 'static>(mut reader: R, tx: Sender<ReaderEvent>) {
    thread::spawn(move || {
        loop {
            match reader.read_message() {
                Ok(Some(msg)) => {
                    if tx.send(ReaderEvent::Message(msg)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(ReaderEvent::Closed);
                    break;
                }
                Err(err) => {
                    let _ = tx.send(ReaderEvent::Failed(err.to_string()));
                    break;
                }
            }
        }
    });
}

//! The canonical log owner and its single-writer state loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value;

use crate::core::{Event, EventLog};
use crate::proto::{Accept, Proposal, ProposalReply, Reject};

use super::broadcast::{BroadcastEvent, EventBroadcaster};
use super::SessionId;

/// Owns the event log and decides every proposal's fate.
///
/// A proposal is accepted only when its causal context equals the current
/// head of the log: first writer wins among concurrent proposers, everyone
/// else gets the tail they were missing.
#[derive(Debug, Default)]
pub struct Serializer {
    log: EventLog,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Accept or reject. On accept, returns the newly appended event for
    /// broadcast to the other sessions.
    pub fn handle_propose(&mut self, proposal: Proposal) -> (ProposalReply, Option<Event<Value>>) {
        if proposal.latest_known_event_id == self.log.head_id() {
            let event_id = self.log.append(proposal.shared_msg.clone());
            tracing::debug!(
                event_id = event_id.get(),
                client_event_id = proposal.client_event_id.get(),
                "proposal accepted"
            );
            let event = Event {
                id: event_id,
                msg: proposal.shared_msg,
            };
            (
                ProposalReply::Accept(Accept {
                    client_event_id: proposal.client_event_id,
                    event_id,
                }),
                Some(event),
            )
        } else {
            let missing_events = self.log.tail_from(proposal.latest_known_event_id);
            tracing::debug!(
                advertised = proposal.latest_known_event_id.get(),
                head = self.log.head_id().get(),
                missing = missing_events.len(),
                "proposal rejected as stale"
            );
            (
                ProposalReply::Reject(Reject {
                    client_event_id: proposal.client_event_id,
                    missing_events,
                }),
                None,
            )
        }
    }

    /// The full log for a catch-up bundle.
    pub fn snapshot(&self) -> Vec<Event<Value>> {
        self.log.snapshot()
    }
}

/// Work items for the state thread.
pub enum StateRequest {
    Propose {
        origin: SessionId,
        proposal: Proposal,
        respond: Sender<ProposalReply>,
    },
    Snapshot {
        respond: Sender<Vec<Event<Value>>>,
    },
}

/// Runs the state thread. This is THE serialization point: every append and
/// every consistent read of the log happens here, one request at a time.
pub fn run_state_loop(
    mut serializer: Serializer,
    req_rx: Receiver<StateRequest>,
    broadcaster: EventBroadcaster,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match req_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(StateRequest::Propose {
                origin,
                proposal,
                respond,
            }) => {
                let (reply, accepted) = serializer.handle_propose(proposal);
                // Publish before replying: the accepter learns the id from
                // its reply, everyone else from the broadcast stream.
                if let Some(event) = accepted {
                    if let Err(err) = broadcaster.publish(BroadcastEvent { origin, event }) {
                        tracing::warn!("broadcast failed: {err}");
                    }
                }
                let _ = respond.send(reply);
            }
            Ok(StateRequest::Snapshot { respond }) => {
                let _ = respond.send(serializer.snapshot());
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(events = serializer.log_len(), "state thread stopped");
}

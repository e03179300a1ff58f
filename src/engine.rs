//! Client reconciliation engine.
//!
//! A pure state machine over the client replica: callers feed it actions of
//! local origin, control replies, and remote events, and apply the returned
//! actions (dispatch a proposal, close the session) to the transport. No I/O
//! happens in here.

use serde_json::Value;
use thiserror::Error;

use crate::core::{
    ClientEventId, ClientReplica, Event, EventId, PendingProposal, SharedDecodeError, Workspace,
};
use crate::proto::{Proposal, ProposalReply, ServerToClient};

/// An action produced by the view layer. Either or both fields may be set.
pub struct LocalOrigin<A: Workspace> {
    pub local: Option<A::LocalMsg>,
    pub proposed: Option<A::SharedMsg>,
}

impl<A: Workspace> LocalOrigin<A> {
    pub fn local(msg: A::LocalMsg) -> Self {
        Self {
            local: Some(msg),
            proposed: None,
        }
    }

    pub fn propose(msg: A::SharedMsg) -> Self {
        Self {
            local: None,
            proposed: Some(msg),
        }
    }

    pub fn both(local: A::LocalMsg, proposed: A::SharedMsg) -> Self {
        Self {
            local: Some(local),
            proposed: Some(proposed),
        }
    }
}

/// Server verdict on the in-flight proposal.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMsg<M> {
    Accept {
        event_id: EventId,
        client_event_id: ClientEventId,
    },
    Reject {
        client_event_id: ClientEventId,
        missing_events: Vec<Event<M>>,
    },
}

/// What the caller must do after a handler runs.
#[derive(Debug, PartialEq)]
pub enum EngineAction {
    /// Dispatch this proposal to the server. At most one is ever in flight.
    Send(Proposal),
    /// The session is unrecoverable; tear it down.
    Close { reason: ProtocolViolation },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("accept for client event {got} does not match pending head {head}")]
    AcceptMismatch {
        head: ClientEventId,
        got: ClientEventId,
    },
}

pub struct Engine<A: Workspace> {
    app: A,
    replica: ClientReplica<A>,
    next_client_event_id: ClientEventId,
}

impl<A: Workspace> Engine<A> {
    pub fn new(app: A) -> Self {
        let replica = ClientReplica::new(&app);
        Self {
            app,
            replica,
            next_client_event_id: ClientEventId::default(),
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn latest_known_event_id(&self) -> EventId {
        self.replica.latest_known_event_id()
    }

    pub fn pending_len(&self) -> usize {
        self.replica.pending_len()
    }

    /// True while a proposal response is outstanding. The head of the queue
    /// is always the dispatched one.
    pub fn is_waiting(&self) -> bool {
        self.replica.pending_len() > 0
    }

    pub fn canonical(&self) -> &A::SharedState {
        self.replica.canonical()
    }

    pub fn local(&self) -> &A::LocalState {
        self.replica.local()
    }

    /// Canonical state with the pending queue applied on top. Recomputed on
    /// every call; storing it could drift from the pair it projects.
    pub fn predicted(&self) -> A::SharedState {
        self.replica.predicted(&self.app)
    }

    pub fn view(&self) -> A::View {
        let predicted = self.replica.predicted(&self.app);
        self.app.view(&predicted, self.replica.local())
    }

    // =========================================================================
    // Local origin
    // =========================================================================

    pub fn handle_local(&mut self, origin: LocalOrigin<A>) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if let Some(msg) = origin.local {
            self.run_local(msg);
        }

        if let Some(msg) = origin.proposed {
            let client_event_id = self.next_client_event_id;
            self.next_client_event_id = client_event_id.next();

            let was_empty = self.replica.pending.is_empty();
            self.replica.pending.push_back(PendingProposal {
                client_event_id,
                msg,
            });
            // Only the head of the queue holds the pipeline slot; later
            // proposals wait for it to resolve.
            if was_empty {
                actions.push(self.dispatch_head());
            }
        }

        actions
    }

    /// Runs a local message and any follow-ups it emits to completion.
    fn run_local(&mut self, msg: A::LocalMsg) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(msg);
        while let Some(msg) = queue.pop_front() {
            let (state, followups) = self.app.reduce_local(msg, self.replica.local());
            self.replica.local = state;
            queue.extend(followups);
        }
    }

    // =========================================================================
    // Remote origin
    // =========================================================================

    /// Folds canonical events from a broadcast or catch-up bundle. Events at
    /// or below the high-water mark are dropped as duplicates.
    pub fn handle_remote(&mut self, events: Vec<Event<A::SharedMsg>>) {
        for event in &events {
            if !self.replica.fold_canonical(&self.app, event) {
                tracing::debug!(id = event.id.get(), "dropped duplicate remote event");
            }
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub fn handle_control(&mut self, msg: ControlMsg<A::SharedMsg>) -> Vec<EngineAction> {
        match msg {
            ControlMsg::Accept {
                event_id,
                client_event_id,
            } => self.handle_accept(event_id, client_event_id),
            ControlMsg::Reject {
                client_event_id,
                missing_events,
            } => self.handle_reject(client_event_id, missing_events),
        }
    }

    fn handle_accept(
        &mut self,
        event_id: EventId,
        client_event_id: ClientEventId,
    ) -> Vec<EngineAction> {
        let Some(head) = self.replica.pending.front() else {
            tracing::warn!(
                event_id = event_id.get(),
                client_event_id = client_event_id.get(),
                "accept with no pending proposal; ignoring"
            );
            return Vec::new();
        };

        if head.client_event_id != client_event_id {
            return vec![EngineAction::Close {
                reason: ProtocolViolation::AcceptMismatch {
                    head: head.client_event_id,
                    got: client_event_id,
                },
            }];
        }

        let head = self
            .replica
            .pending
            .pop_front()
            .expect("pending head present");

        // The accepted proposal becomes the next canonical event. If a racing
        // broadcast already advanced the replica past it, only the
        // bookkeeping remains.
        if event_id > self.replica.latest_known_event_id {
            self.replica.latest_known_shared = self
                .app
                .reduce_shared(&head.msg, &self.replica.latest_known_shared);
            self.replica.latest_known_event_id = event_id;
        } else {
            tracing::debug!(
                event_id = event_id.get(),
                "accepted event already folded via broadcast"
            );
        }

        if self.replica.pending.is_empty() {
            Vec::new()
        } else {
            vec![self.dispatch_head()]
        }
    }

    fn handle_reject(
        &mut self,
        client_event_id: ClientEventId,
        missing_events: Vec<Event<A::SharedMsg>>,
    ) -> Vec<EngineAction> {
        match self.replica.pending.front() {
            Some(head) if head.client_event_id != client_event_id => {
                tracing::warn!(
                    head = head.client_event_id.get(),
                    got = client_event_id.get(),
                    "reject does not match pending head"
                );
            }
            None => {
                tracing::warn!(
                    client_event_id = client_event_id.get(),
                    "reject with no pending proposal"
                );
            }
            Some(_) => {}
        }

        // Catch up first: fold the missing tail, dropping events a racing
        // broadcast already delivered.
        for event in &missing_events {
            self.replica.fold_canonical(&self.app, event);
        }

        let old = std::mem::take(&mut self.replica.pending);
        let strategy = self.app.rejection_strategy();
        self.replica.pending = strategy.rebuild(old, &self.replica.latest_known_shared);

        if self.replica.pending.is_empty() {
            Vec::new()
        } else {
            vec![self.dispatch_head()]
        }
    }

    // =========================================================================
    // Wire-level entry
    // =========================================================================

    /// Handles a decoded transport message, running the application decoder
    /// over embedded shared messages. Any decode failure turns the whole
    /// message into a decode-error local action and leaves the replica
    /// untouched.
    pub fn handle_incoming(&mut self, msg: ServerToClient) -> Vec<EngineAction> {
        match msg {
            ServerToClient::Catchup(catchup) => match self.decode_events(&catchup.event_stream) {
                Ok(events) => {
                    self.handle_remote(events);
                    Vec::new()
                }
                Err(err) => {
                    self.note_decode_error(err.to_string());
                    Vec::new()
                }
            },
            ServerToClient::Event(event) => match self.decode_events(std::slice::from_ref(&event))
            {
                Ok(events) => {
                    self.handle_remote(events);
                    Vec::new()
                }
                Err(err) => {
                    self.note_decode_error(err.to_string());
                    Vec::new()
                }
            },
            ServerToClient::Reply(ProposalReply::Accept(accept)) => self.handle_control(
                ControlMsg::Accept {
                    event_id: accept.event_id,
                    client_event_id: accept.client_event_id,
                },
            ),
            ServerToClient::Reply(ProposalReply::Reject(reject)) => {
                match self.decode_events(&reject.missing_events) {
                    Ok(missing_events) => self.handle_control(ControlMsg::Reject {
                        client_event_id: reject.client_event_id,
                        missing_events,
                    }),
                    Err(err) => {
                        self.note_decode_error(err.to_string());
                        Vec::new()
                    }
                }
            }
            ServerToClient::Ping { nonce } => {
                // Keepalive is the runtime's concern; nothing to reconcile.
                tracing::debug!(nonce, "ping reached engine");
                Vec::new()
            }
        }
    }

    /// Coerces a transport or decode failure into an application-visible
    /// local message.
    pub fn note_decode_error(&mut self, reason: String) {
        let msg = self.app.on_decode_error(reason);
        self.run_local(msg);
    }

    fn decode_events(
        &self,
        events: &[Event<Value>],
    ) -> Result<Vec<Event<A::SharedMsg>>, SharedDecodeError> {
        events
            .iter()
            .map(|event| {
                Ok(Event {
                    id: event.id,
                    msg: self.app.decode_shared(&event.msg)?,
                })
            })
            .collect()
    }

    fn dispatch_head(&self) -> EngineAction {
        let head = self
            .replica
            .pending
            .front()
            .expect("dispatch requires a pending head");
        EngineAction::Send(Proposal {
            shared_msg: self.app.encode_shared(&head.msg),
            latest_known_event_id: self.replica.latest_known_event_id(),
            client_event_id: head.client_event_id,
        })
    }
}

//! Client-side replica state: canonical + pending + local.

use std::collections::VecDeque;

use super::event::{ClientEventId, Event, EventId};
use super::workspace::Workspace;

/// A shared message the client has queued or dispatched but whose server
/// outcome is unknown.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingProposal<M> {
    pub client_event_id: ClientEventId,
    pub msg: M,
}

/// The engine's replicated state.
///
/// INVARIANT: `latest_known_event_id` equals the id of the last event folded
/// into `latest_known_shared`. The predicted state shown to the view is never
/// stored; it is recomputed from canonical + pending on demand.
pub struct ClientReplica<A: Workspace> {
    pub(crate) latest_known_event_id: EventId,
    pub(crate) latest_known_shared: A::SharedState,
    pub(crate) pending: VecDeque<PendingProposal<A::SharedMsg>>,
    pub(crate) local: A::LocalState,
}

impl<A: Workspace> ClientReplica<A> {
    pub fn new(app: &A) -> Self {
        Self {
            latest_known_event_id: EventId::ZERO,
            latest_known_shared: app.init_shared(),
            pending: VecDeque::new(),
            local: app.init_local(),
        }
    }

    pub fn latest_known_event_id(&self) -> EventId {
        self.latest_known_event_id
    }

    /// The canonical shared state, without any optimistic overlay.
    pub fn canonical(&self) -> &A::SharedState {
        &self.latest_known_shared
    }

    pub fn local(&self) -> &A::LocalState {
        &self.local
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Folds one canonical event. Returns false for events at or below the
    /// replica's high-water mark; catch-up and concurrent broadcasts may
    /// race, so duplicate delivery must be a no-op.
    pub(crate) fn fold_canonical(&mut self, app: &A, event: &Event<A::SharedMsg>) -> bool {
        if event.id <= self.latest_known_event_id {
            return false;
        }
        self.latest_known_shared = app.reduce_shared(&event.msg, &self.latest_known_shared);
        self.latest_known_event_id = event.id;
        true
    }

    /// The state the view renders: canonical with every pending proposal
    /// applied on top, in submission order.
    pub fn predicted(&self, app: &A) -> A::SharedState {
        self.pending
            .iter()
            .fold(self.latest_known_shared.clone(), |state, proposal| {
                app.reduce_shared(&proposal.msg, &state)
            })
    }
}

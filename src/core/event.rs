//! Event identities and the canonical append-only log.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-assigned position in the canonical log.
///
/// Ids are dense: the event stored at log index `i` carries id `i + 1`.
/// `EventId::ZERO` is never assigned; a client advertising it has seen
/// nothing yet.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    pub const ZERO: EventId = EventId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> EventId {
        EventId(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-local identity of a proposal, stable across retries.
///
/// The server echoes it opaquely in replies and never interprets it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientEventId(pub u64);

impl ClientEventId {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> ClientEventId {
        ClientEventId(self.0 + 1)
    }
}

impl fmt::Display for ClientEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accepted, id-bearing record in the canonical log.
///
/// On the wire and in the server `M` is raw JSON; a client that has run the
/// workspace decoder holds a typed message instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event<M> {
    pub id: EventId,
    pub msg: M,
}

/// The canonical event log.
///
/// INVARIANT: append-only, and `events[i].id == i + 1`. All accept/reject
/// decisions derive from `head_id()` alone.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event<Value>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Id of the newest event, or `EventId::ZERO` when the log is empty.
    pub fn head_id(&self) -> EventId {
        EventId(self.events.len() as u64)
    }

    /// Appends `msg` and returns the id it was assigned.
    pub fn append(&mut self, msg: Value) -> EventId {
        let id = self.head_id().next();
        self.events.push(Event { id, msg });
        id
    }

    /// Every event with an id greater than `after`, in order.
    ///
    /// `after` beyond the head yields an empty tail.
    pub fn tail_from(&self, after: EventId) -> Vec<Event<Value>> {
        let start = (after.get() as usize).min(self.events.len());
        self.events[start..].to_vec()
    }

    /// The full log, oldest first. Sent as the catch-up bundle on connect.
    pub fn snapshot(&self) -> Vec<Event<Value>> {
        self.events.clone()
    }
}

//! Server serializer: the canonical log, its single-writer state thread, and
//! the per-connection session machinery around it.

mod broadcast;
mod run;
mod serializer;
mod session;

use std::fmt;

pub use broadcast::{BroadcastError, BroadcastEvent, EventBroadcaster, EventSubscription};
pub use run::{ServerCore, ServerError, ServerHandle, serve, start_core};
pub use serializer::{Serializer, StateRequest, run_state_loop};
pub use session::{SessionContext, SessionError, run_session};

/// Server-local identity of one connected session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

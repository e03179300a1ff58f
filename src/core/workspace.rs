//! The application adapter: reducers, codecs, and the rejection strategy.

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::replica::PendingProposal;

/// A shared message failed to decode from its wire JSON.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("shared message decode failed: {reason}")]
pub struct SharedDecodeError {
    pub reason: String,
}

impl SharedDecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Everything the engine needs from the embedding application.
///
/// `reduce_shared` must be pure and deterministic: every client that folds
/// the same event sequence must converge to the same shared state.
pub trait Workspace {
    type SharedMsg;
    type SharedState: Clone;
    type LocalMsg;
    type LocalState;
    type View;

    fn init_shared(&self) -> Self::SharedState;

    fn init_local(&self) -> Self::LocalState;

    fn reduce_shared(&self, msg: &Self::SharedMsg, state: &Self::SharedState)
    -> Self::SharedState;

    /// Local reduction may emit follow-up local messages; the engine runs
    /// them to completion before handling anything else.
    fn reduce_local(
        &self,
        msg: Self::LocalMsg,
        state: &Self::LocalState,
    ) -> (Self::LocalState, Vec<Self::LocalMsg>);

    fn encode_shared(&self, msg: &Self::SharedMsg) -> Value;

    fn decode_shared(&self, value: &Value) -> Result<Self::SharedMsg, SharedDecodeError>;

    /// Coerces a transport decode failure into an application-visible local
    /// message. Malformed input never crashes the engine and never touches
    /// the shared state.
    fn on_decode_error(&self, reason: String) -> Self::LocalMsg;

    fn view(&self, shared: &Self::SharedState, local: &Self::LocalState) -> Self::View;

    /// Policy applied to the pending queue after a rejection.
    fn rejection_strategy(&self) -> RejectionStrategy<Self::SharedMsg, Self::SharedState> {
        RejectionStrategy::ReapplyAllPending
    }
}

/// What happens to the client's pending queue after a reject.
///
/// `Custom` receives the old queue and the caught-up canonical state and
/// returns the queue to continue with.
pub enum RejectionStrategy<M, S> {
    /// Discard every queued proposal; upper layers may re-request them.
    DropAllPending,
    /// Keep the queue unchanged and re-propose against the new canonical.
    ReapplyAllPending,
    Custom(RebuildFn<M, S>),
}

pub type RebuildFn<M, S> =
    Box<dyn Fn(VecDeque<PendingProposal<M>>, &S) -> VecDeque<PendingProposal<M>> + Send>;

impl<M, S> RejectionStrategy<M, S> {
    pub(crate) fn rebuild(
        &self,
        pending: VecDeque<PendingProposal<M>>,
        caught_up: &S,
    ) -> VecDeque<PendingProposal<M>> {
        match self {
            RejectionStrategy::DropAllPending => VecDeque::new(),
            RejectionStrategy::ReapplyAllPending => pending,
            RejectionStrategy::Custom(rebuild) => rebuild(pending, caught_up),
        }
    }
}

impl<M, S> fmt::Debug for RejectionStrategy<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionStrategy::DropAllPending => f.write_str("DropAllPending"),
            RejectionStrategy::ReapplyAllPending => f.write_str("ReapplyAllPending"),
            RejectionStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

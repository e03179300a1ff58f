//! Fan-out of accepted events to connected sessions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use serde_json::Value;
use thiserror::Error;

use crate::core::Event;

use super::SessionId;

/// One accepted event, tagged with the session that proposed it so the
/// accepter is informed only through its reply.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastEvent {
    pub origin: SessionId,
    pub event: Event<Value>,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("subscriber limit reached ({max_subscribers})")]
    SubscriberLimitReached { max_subscribers: usize },
    #[error("broadcaster lock poisoned")]
    LockPoisoned,
}

#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    receiver: Receiver<BroadcastEvent>,
}

impl EventSubscription {
    /// For `crossbeam::select!` in the session loop.
    pub fn receiver(&self) -> &Receiver<BroadcastEvent> {
        &self.receiver
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Registry of session subscriptions with bounded queues.
///
/// A subscriber whose queue fills up is dropped rather than allowed to
/// stall the state thread; its session ends and the client reconnects
/// through a fresh catch-up.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Mutex<BroadcasterState>>,
}

impl EventBroadcaster {
    pub fn new(max_subscribers: usize, queue_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BroadcasterState {
                max_subscribers,
                queue_events: queue_events.max(1),
                next_subscriber_id: 1,
                subscribers: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Result<EventSubscription, BroadcastError> {
        let mut state = self.lock_state()?;
        if state.subscribers.len() >= state.max_subscribers {
            return Err(BroadcastError::SubscriberLimitReached {
                max_subscribers: state.max_subscribers,
            });
        }

        let (sender, receiver) = crossbeam::channel::bounded(state.queue_events);
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(id, sender);

        Ok(EventSubscription { id, receiver })
    }

    pub fn publish(&self, event: BroadcastEvent) -> Result<(), BroadcastError> {
        let mut state = self.lock_state()?;
        let mut dropped = Vec::new();

        for (id, sender) in &state.subscribers {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "subscriber lagged; dropping");
                    dropped.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            state.subscribers.remove(&id);
        }

        Ok(())
    }

    pub fn subscriber_count(&self) -> Result<usize, BroadcastError> {
        Ok(self.lock_state()?.subscribers.len())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, BroadcasterState>, BroadcastError> {
        self.inner.lock().map_err(|_| BroadcastError::LockPoisoned)
    }
}

struct BroadcasterState {
    max_subscribers: usize,
    queue_events: usize,
    next_subscriber_id: u64,
    subscribers: BTreeMap<u64, Sender<BroadcastEvent>>,
}

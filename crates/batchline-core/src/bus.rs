//! Event bus
//!
//! [`EventBus`] is the capability the queue and uploader fire events through.
//! [`LifeEvents`] is the in-process implementation: a fixed set of registered
//! event names and a listener list per event. Tests inject their own bus.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::UploaderError;
use crate::events::{EventListener, EventPayload, UploaderEvent};
use crate::gate::{collect_votes, VoteOutcome};

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget notification. Completes once every listener has seen it.
    async fn notify(&self, event: UploaderEvent, payload: EventPayload);

    /// Fire an event and gather the listeners' votes. Only cancellable events
    /// can come back cancelled.
    async fn request_vote(&self, event: UploaderEvent, payload: EventPayload) -> VoteOutcome;
}

/// Handle given to enhancers and collaborators so they can fire uploader events.
pub type Trigger = Arc<dyn EventBus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    event: UploaderEvent,
    listener: Arc<dyn EventListener>,
}

pub struct LifeEvents {
    registered: HashSet<UploaderEvent>,
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl LifeEvents {
    /// Create a bus that accepts listeners for `events` only.
    pub fn new(events: &[UploaderEvent]) -> Self {
        Self {
            registered: events.iter().copied().collect(),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_registered(&self, event: UploaderEvent) -> bool {
        self.registered.contains(&event)
    }

    /// Subscribe `listener` to `event`.
    pub fn on(
        &self,
        event: UploaderEvent,
        listener: Arc<dyn EventListener>,
    ) -> Result<ListenerId, UploaderError> {
        if !self.is_registered(event) {
            return Err(UploaderError::UnknownEvent(event.to_string()));
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                event,
                listener,
            });

        tracing::debug!(event = %event, listener_id = id.0, "Listener registered");
        Ok(id)
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        before != listeners.len()
    }

    pub fn listener_count(&self, event: UploaderEvent) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|registration| registration.event == event)
            .count()
    }

    // Snapshot taken under the lock so listeners run without holding it and
    // may subscribe or unsubscribe while handling an event.
    fn listeners_for(&self, event: UploaderEvent) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|registration| registration.event == event)
            .map(|registration| registration.listener.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for LifeEvents {
    async fn notify(&self, event: UploaderEvent, payload: EventPayload) {
        let listeners = self.listeners_for(event);
        tracing::trace!(
            event = %event,
            subject = payload.subject_id().unwrap_or("-"),
            listeners = listeners.len(),
            "Triggering event"
        );
        // Votes on notifications carry no meaning; faults are already logged by the gate.
        let _ = collect_votes(&listeners, event, &payload).await;
    }

    async fn request_vote(&self, event: UploaderEvent, payload: EventPayload) -> VoteOutcome {
        let listeners = self.listeners_for(event);
        let mut outcome = collect_votes(&listeners, event, &payload).await;
        if outcome.cancelled && !event.is_cancellable() {
            tracing::warn!(event = %event, "Ignoring cancel vote on a non-cancellable event");
            outcome.cancelled = false;
        }
        tracing::debug!(
            event = %event,
            subject = payload.subject_id().unwrap_or("-"),
            listeners = listeners.len(),
            cancelled = outcome.cancelled,
            faults = outcome.faults.len(),
            "Cancellable event resolved"
        );
        outcome
    }
}

//! Cancellable event gate
//!
//! Dispatches one event to every listener in parallel, waits for all of them and
//! reduces their votes with a logical OR. A listener that fails does not stop the
//! others and counts as "not cancelled"; its error is logged and handed back to
//! the caller in [`VoteOutcome::faults`]. A panicking listener is treated the
//! same way.

use futures::future::{join_all, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::events::{EventListener, EventPayload, UploaderEvent};

/// A listener error caught at the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFault {
    pub event: UploaderEvent,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteOutcome {
    pub cancelled: bool,
    pub faults: Vec<ListenerFault>,
}

impl VoteOutcome {
    /// Outcome when nobody objected and nothing failed.
    pub fn allowed() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Fire `event` at `listeners` and gather their votes.
pub async fn collect_votes(
    listeners: &[Arc<dyn EventListener>],
    event: UploaderEvent,
    payload: &EventPayload,
) -> VoteOutcome {
    if listeners.is_empty() {
        return VoteOutcome::allowed();
    }

    let votes = join_all(listeners.iter().map(|listener| {
        AssertUnwindSafe(listener.handle(event, payload))
            .catch_unwind()
            .map(panic_as_fault)
    }))
    .await;

    let mut outcome = VoteOutcome::allowed();
    for vote in votes {
        match vote {
            Ok(cancel) => outcome.cancelled |= cancel,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event = %event,
                    subject = payload.subject_id().unwrap_or("-"),
                    "Event listener failed, counting as non-cancelling vote"
                );
                outcome.faults.push(ListenerFault {
                    event,
                    message: e.to_string(),
                });
            }
        }
    }

    outcome
}

// A named fn rather than a closure: the closure form trips the compiler's
// higher-ranked lifetime inference when the future must be `Send`.
fn panic_as_fault(result: std::thread::Result<anyhow::Result<bool>>) -> anyhow::Result<bool> {
    result.unwrap_or_else(|panic| {
        Err(anyhow::anyhow!("listener panicked: {}", panic_message(&*panic)))
    })
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Lifecycle events
//!
//! Listeners receive every event they subscribed to together with its payload.
//! For cancellable events the listener's answer is a vote: `Ok(true)` asks to
//! cancel the announced operation. For notifications the answer is ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::models::{Batch, BatchItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploaderEvent {
    BatchAdd,
    BatchStart,
    BatchProgress,
    BatchFinish,
    BatchCancel,
    BatchAbort,
    ItemStart,
    ItemProgress,
    ItemFinish,
    ItemError,
    ItemCancel,
    ItemAbort,
    AllAbort,
}

impl UploaderEvent {
    /// Every event an uploader registers on creation.
    pub const ALL: [UploaderEvent; 13] = [
        UploaderEvent::BatchAdd,
        UploaderEvent::BatchStart,
        UploaderEvent::BatchProgress,
        UploaderEvent::BatchFinish,
        UploaderEvent::BatchCancel,
        UploaderEvent::BatchAbort,
        UploaderEvent::ItemStart,
        UploaderEvent::ItemProgress,
        UploaderEvent::ItemFinish,
        UploaderEvent::ItemError,
        UploaderEvent::ItemCancel,
        UploaderEvent::ItemAbort,
        UploaderEvent::AllAbort,
    ];

    /// Whether listeners may veto the operation this event announces.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            UploaderEvent::BatchAdd | UploaderEvent::BatchStart | UploaderEvent::ItemStart
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploaderEvent::BatchAdd => "BATCH_ADD",
            UploaderEvent::BatchStart => "BATCH_START",
            UploaderEvent::BatchProgress => "BATCH_PROGRESS",
            UploaderEvent::BatchFinish => "BATCH_FINISH",
            UploaderEvent::BatchCancel => "BATCH_CANCEL",
            UploaderEvent::BatchAbort => "BATCH_ABORT",
            UploaderEvent::ItemStart => "ITEM_START",
            UploaderEvent::ItemProgress => "ITEM_PROGRESS",
            UploaderEvent::ItemFinish => "ITEM_FINISH",
            UploaderEvent::ItemError => "ITEM_ERROR",
            UploaderEvent::ItemCancel => "ITEM_CANCEL",
            UploaderEvent::ItemAbort => "ITEM_ABORT",
            UploaderEvent::AllAbort => "ALL_ABORT",
        }
    }
}

impl Display for UploaderEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum EventPayload {
    Batch(Batch),
    Item(BatchItem),
    None,
}

impl EventPayload {
    pub fn batch(&self) -> Option<&Batch> {
        match self {
            EventPayload::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&BatchItem> {
        match self {
            EventPayload::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Id of the batch or item carried, for log fields.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            EventPayload::Batch(batch) => Some(&batch.id),
            EventPayload::Item(item) => Some(&item.id),
            EventPayload::None => None,
        }
    }
}

#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handle an event. Return `Ok(true)` to vote for cancellation.
    async fn handle(&self, event: UploaderEvent, payload: &EventPayload) -> anyhow::Result<bool>;
}

/// Listener backed by a synchronous closure.
pub struct FnListener<F> {
    handler: F,
}

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(UploaderEvent, &EventPayload) -> anyhow::Result<bool> + Send + Sync,
{
    async fn handle(&self, event: UploaderEvent, payload: &EventPayload) -> anyhow::Result<bool> {
        (self.handler)(event, payload)
    }
}

/// Wrap a closure as a listener.
pub fn listener_fn<F>(handler: F) -> FnListener<F>
where
    F: Fn(UploaderEvent, &EventPayload) -> anyhow::Result<bool> + Send + Sync,
{
    FnListener { handler }
}

//! Transport seam
//!
//! The processor never moves bytes itself. It hands claimed items to an
//! [`ItemSender`] and turns the reported outcome into item events.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use batchline_core::{BatchItem, EventPayload, UploadOptions, UploaderEvent};

use crate::state::SharedQueue;

/// One transport call: the items to send and the options to send them with.
pub struct SendRequest {
    pub items: Vec<BatchItem>,
    pub options: UploadOptions,
    /// Cancelled when the items are aborted; the transport should stop and
    /// report [`SendOutcome::Aborted`].
    pub abort: CancellationToken,
    pub progress: ProgressReporter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Finished(Option<serde_json::Value>),
    Cancelled,
    Aborted,
}

#[async_trait]
pub trait ItemSender: Send + Sync {
    /// Send the items. An `Err` marks every item of the request as failed.
    async fn send(&self, request: SendRequest) -> anyhow::Result<SendOutcome>;
}

/// Lets the transport report progress for the items of one request.
#[derive(Clone)]
pub struct ProgressReporter {
    queue: SharedQueue,
    batch_id: String,
    item_ids: Vec<String>,
}

impl ProgressReporter {
    pub(crate) fn new(queue: SharedQueue, batch_id: String, item_ids: Vec<String>) -> Self {
        Self {
            queue,
            batch_id,
            item_ids,
        }
    }

    /// Record progress for every item of the request and fire
    /// `ITEM_PROGRESS` per item followed by one `BATCH_PROGRESS`.
    pub async fn report(&self, completed: f64, loaded: u64) {
        let completed = completed.clamp(0.0, 100.0);
        let (items, batch) = self.queue.update_state(|state| {
            let mut items = Vec::with_capacity(self.item_ids.len());
            for id in &self.item_ids {
                if let Some(item) = state.items.get_mut(id) {
                    if item.state.is_terminal() {
                        continue;
                    }
                    item.completed = completed;
                    item.loaded = loaded;
                    items.push(item.clone());
                }
            }
            let batch = if items.is_empty() {
                None
            } else {
                state.refresh_batch_progress(&self.batch_id)
            };
            (items, batch)
        });

        for item in items {
            self.queue
                .trigger(UploaderEvent::ItemProgress, EventPayload::Item(item))
                .await;
        }
        if let Some(batch) = batch {
            self.queue
                .trigger(UploaderEvent::BatchProgress, EventPayload::Batch(batch))
                .await;
        }
    }
}

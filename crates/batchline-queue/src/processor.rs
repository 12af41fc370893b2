//! Processor: drives the queue forward.
//!
//! Dispatch runs in passes, one at a time. A pass walks the queue head, starts
//! new batches through the cancellable `BATCH_START` vote and claims items up to
//! the concurrency ceiling. A request arriving while a pass is running only
//! marks another pass as needed; it never waits on the running one, so a
//! listener may call back into the uploader while it is voting.
//!
//! A new batch does not start while items of the current batch are still at
//! the transport.

use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use batchline_core::{
    panic_message, Batch, BatchItem, EventPayload, ItemState, UploadOptions, UploaderEvent,
};

use crate::abort;
use crate::batch_helpers;
use crate::sender::{ItemSender, ProgressReporter, SendOutcome, SendRequest};
use crate::state::{Claim, SharedQueue};

#[derive(Clone)]
pub struct Processor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    uploader_id: String,
    queue: SharedQueue,
    sender: Arc<dyn ItemSender>,
    concurrency: AtomicUsize,
    dispatch_lock: Mutex<()>,
    pass_requested: AtomicBool,
}

impl Processor {
    pub fn new(
        uploader_id: impl Into<String>,
        queue: SharedQueue,
        sender: Arc<dyn ItemSender>,
        options: &UploadOptions,
    ) -> Self {
        let uploader_id = uploader_id.into();
        let concurrency = options.concurrency_limit();
        tracing::info!(uploader_id = %uploader_id, concurrency, "Processor created");

        Self {
            inner: Arc::new(ProcessorInner {
                uploader_id,
                queue,
                sender,
                concurrency: AtomicUsize::new(concurrency),
                dispatch_lock: Mutex::new(()),
                pass_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn uploader_id(&self) -> &str {
        &self.inner.uploader_id
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.inner.queue
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency.load(Ordering::SeqCst)
    }

    /// Change the concurrency ceiling. Items already in flight are not
    /// affected; a raised ceiling lets more start on the next pass.
    /// Returns true if the ceiling changed.
    pub fn set_concurrency(&self, limit: usize) -> bool {
        let limit = limit.max(1);
        let previous = self.inner.concurrency.swap(limit, Ordering::SeqCst);
        if previous == limit {
            return false;
        }
        tracing::info!(
            uploader_id = %self.inner.uploader_id,
            previous,
            concurrency = limit,
            "Processor concurrency updated"
        );
        true
    }

    /// Enqueue a batch under `options` and advance the queue.
    #[tracing::instrument(
        skip(self, batch, options),
        fields(uploader.id = %self.inner.uploader_id, batch.id = %batch.id, items = batch.items.len())
    )]
    pub async fn process(&self, batch: Batch, options: UploadOptions) {
        self.inner
            .queue
            .update_state(|state| state.enqueue_batch(batch, options));
        tracing::debug!("Batch enqueued");
        self.process_next().await;
    }

    /// Advance the queue as far as the concurrency ceiling allows.
    pub fn process_next(&self) -> BoxFuture<'_, ()> {
        async move {
            self.inner.pass_requested.store(true, Ordering::SeqCst);
            loop {
                let Ok(guard) = self.inner.dispatch_lock.try_lock() else {
                    // The running pass picks the request up.
                    return;
                };
                while self.inner.pass_requested.swap(false, Ordering::SeqCst) {
                    self.dispatch_pass().await;
                }
                drop(guard);
                if !self.inner.pass_requested.load(Ordering::SeqCst) {
                    return;
                }
            }
        }
        .boxed()
    }

    /// Abort one item, one batch or (with `None`) everything.
    /// Returns false when nothing matched.
    pub async fn abort(&self, id: Option<&str>) -> bool {
        let queue = &self.inner.queue;
        let aborted = match id {
            None => abort::abort_all(queue).await > 0,
            Some(id) if queue.read(|state| state.batches.contains_key(id)) => {
                abort::abort_batch(queue, id).await
            }
            Some(id) => abort::abort_item(queue, id).await,
        };

        if aborted {
            batch_helpers::clean_up_finished_batch(queue).await;
            self.process_next().await;
        }
        aborted
    }

    async fn dispatch_pass(&self) {
        let queue = &self.inner.queue;
        loop {
            let limit = self.concurrency();
            let next = queue.read(|state| {
                if state.active_ids.len() >= limit {
                    None
                } else {
                    state.item_queue.front().cloned()
                }
            });
            let Some(item_id) = next else {
                break;
            };

            if batch_helpers::is_new_batch_starting(queue, &item_id) {
                if queue.read(|state| !state.active_ids.is_empty()) {
                    // Current batch still has items at the transport.
                    break;
                }
                batch_helpers::clean_up_finished_batch(queue).await;

                if !batch_helpers::load_new_batch_for_item(queue, &item_id).await {
                    if batch_helpers::cancel_batch_for_item(queue, &item_id)
                        .await
                        .is_none()
                    {
                        queue.update_state(|state| state.item_queue.retain(|id| id != &item_id));
                    }
                    continue;
                }
            }

            match queue.update_state(|state| state.claim_next_group(&item_id, limit)) {
                Some(claim) => self.start_claim(claim).await,
                None => {
                    queue.update_state(|state| {
                        let orphan = state
                            .items
                            .get(&item_id)
                            .map_or(true, |item| !state.batches.contains_key(&item.batch_id));
                        if orphan {
                            tracing::warn!(item_id = %item_id, "Dropping queued id with no item or batch");
                            state.item_queue.retain(|id| id != &item_id);
                        }
                    });
                }
            }
        }
    }

    async fn start_claim(&self, claim: Claim) {
        let queue = &self.inner.queue;

        let mut vetoed = Vec::new();
        for item in &claim.items {
            if queue
                .cancellable(UploaderEvent::ItemStart, EventPayload::Item(item.clone()))
                .await
            {
                vetoed.push(item.id.clone());
            }
        }
        if !vetoed.is_empty() {
            let cancelled = queue.update_state(|state| {
                state.finalize_items(&vetoed, ItemState::Cancelled, None)
            });
            self.fire_item_events(cancelled).await;
        }

        // Items may have been aborted, or their batch cancelled, during the votes.
        let items: Vec<BatchItem> = queue.read(|state| {
            claim
                .items
                .iter()
                .filter(|item| state.active_ids.contains(&item.id))
                .filter_map(|item| state.items.get(&item.id).cloned())
                .collect()
        });
        let item_ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();

        if claim.abort.is_cancelled() && !item_ids.is_empty() {
            let aborted = queue.update_state(|state| {
                state.finalize_items(&item_ids, ItemState::Aborted, None)
            });
            self.fire_item_events(aborted).await;
        }
        if items.is_empty() || claim.abort.is_cancelled() {
            batch_helpers::clean_up_finished_batch(queue).await;
            return;
        }

        let request = SendRequest {
            items,
            options: claim.options,
            abort: claim.abort.clone(),
            progress: ProgressReporter::new(queue.clone(), claim.batch_id.clone(), item_ids.clone()),
        };

        tracing::debug!(
            batch_id = %claim.batch_id,
            items = item_ids.len(),
            "Dispatching items to transport"
        );

        let span = tracing::info_span!(
            "send",
            uploader.id = %self.inner.uploader_id,
            batch.id = %claim.batch_id,
            items = item_ids.len()
        );
        let processor = self.clone();
        let abort = claim.abort;
        tokio::spawn(
            async move {
                let result = AssertUnwindSafe(processor.inner.sender.send(request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(anyhow::anyhow!("transport panicked: {}", panic_message(&*panic)))
                    });
                processor.complete(item_ids, abort, result).await;
            }
            .instrument(span),
        );
    }

    async fn complete(
        &self,
        item_ids: Vec<String>,
        abort: CancellationToken,
        result: anyhow::Result<SendOutcome>,
    ) {
        let queue = &self.inner.queue;
        let (state, response) = match result {
            Ok(SendOutcome::Finished(response)) => (ItemState::Finished, response),
            Ok(SendOutcome::Cancelled) => (ItemState::Cancelled, None),
            Ok(SendOutcome::Aborted) => (ItemState::Aborted, None),
            Err(e) if abort.is_cancelled() => {
                tracing::debug!(error = %e, "Transport stopped after abort");
                (ItemState::Aborted, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, items = item_ids.len(), "Transport failed to send items");
                (ItemState::Error, Some(json!({ "error": e.to_string() })))
            }
        };

        let items = queue.update_state(|queue_state| {
            queue_state.finalize_items(&item_ids, state, response.as_ref())
        });
        if items.len() < item_ids.len() {
            tracing::debug!(
                reported = item_ids.len(),
                known = items.len(),
                "Transport reported items whose batch is gone"
            );
        }
        self.fire_item_events(items).await;

        batch_helpers::clean_up_finished_batch(queue).await;
        self.process_next().await;
    }

    async fn fire_item_events(&self, items: Vec<BatchItem>) {
        for item in items {
            let Some(event) = item_event_for(item.state) else {
                continue;
            };
            tracing::debug!(item_id = %item.id, state = %item.state, "Item finalized");
            self.inner
                .queue
                .trigger(event, EventPayload::Item(item))
                .await;
        }
    }
}

fn item_event_for(state: ItemState) -> Option<UploaderEvent> {
    match state {
        ItemState::Finished => Some(UploaderEvent::ItemFinish),
        ItemState::Error => Some(UploaderEvent::ItemError),
        ItemState::Cancelled => Some(UploaderEvent::ItemCancel),
        ItemState::Aborted => Some(UploaderEvent::ItemAbort),
        ItemState::Added | ItemState::Uploading => None,
    }
}

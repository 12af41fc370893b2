//! Uploader instance
//!
//! An [`Uploader`] accepts batches, holds them back while auto-upload is off
//! and hands them to its [`Processor`]. Clones share the same instance.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use batchline_core::{
    Batch, BatchItem, BatchState, EventBus, EventListener, EventPayload, ItemState, LifeEvents, ListenerId,
    Merge, Trigger, UploadInfo, UploadOptions, UploaderError, UploaderEvent, UploaderResult,
};
use batchline_queue::{ItemSender, Processor, QueueState, SharedQueue};

use crate::registry::UploaderRegistry;

/// What happened to the files passed to [`Uploader::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Handed to the processor.
    Dispatched(String),
    /// Held until [`Uploader::upload`].
    Pending(String),
    /// A `BATCH_ADD` listener vetoed the batch.
    Cancelled(String),
    /// No files were given; nothing was created.
    Empty,
}

impl AddOutcome {
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            AddOutcome::Dispatched(id) | AddOutcome::Pending(id) | AddOutcome::Cancelled(id) => {
                Some(id)
            }
            AddOutcome::Empty => None,
        }
    }
}

struct PendingBatch {
    batch: Batch,
    options: UploadOptions,
}

#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    id: String,
    registry: UploaderRegistry,
    options: RwLock<UploadOptions>,
    pending: Mutex<Vec<PendingBatch>>,
    bus: Arc<LifeEvents>,
    processor: OnceLock<Processor>,
}

impl Uploader {
    pub(crate) fn new(id: String, registry: UploaderRegistry, options: UploadOptions) -> Self {
        Self {
            inner: Arc::new(UploaderInner {
                id,
                registry,
                options: RwLock::new(options),
                pending: Mutex::new(Vec::new()),
                bus: Arc::new(LifeEvents::new(&UploaderEvent::ALL)),
                processor: OnceLock::new(),
            }),
        }
    }

    /// Bind a processor to this instance. A second call is ignored.
    pub(crate) fn attach_processor(&self, sender: Arc<dyn ItemSender>) {
        let options = self.get_options();
        let queue = SharedQueue::new(self.trigger());
        let processor = Processor::new(self.id(), queue, sender, &options);
        if self.inner.processor.set(processor).is_err() {
            tracing::debug!(uploader_id = %self.id(), "Processor already attached");
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Deep-merge `partial` into the current options. A changed concurrency
    /// ceiling applies to the processor right away.
    pub fn update(&self, partial: &UploadOptions) -> &Self {
        let limit = {
            let mut options = self
                .inner
                .options
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            options.merge_from(partial);
            options.concurrency_limit()
        };
        tracing::debug!(uploader_id = %self.id(), concurrency = limit, "Uploader options updated");

        if let Some(processor) = self.inner.processor.get() {
            if processor.set_concurrency(limit) {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let processor = processor.clone();
                    handle.spawn(async move { processor.process_next().await });
                }
            }
        }
        self
    }

    /// Submit files as one batch.
    ///
    /// The batch is announced with the cancellable `BATCH_ADD`. If allowed,
    /// it is processed under the uploader options overlaid with `options`,
    /// right away or on the next [`Uploader::upload`] depending on
    /// `auto_upload`.
    pub async fn add(
        &self,
        files: Vec<UploadInfo>,
        options: Option<UploadOptions>,
    ) -> UploaderResult<AddOutcome> {
        if files.is_empty() {
            tracing::debug!(uploader_id = %self.id(), "Add called without files");
            return Ok(AddOutcome::Empty);
        }
        let processor = self.processor()?;

        let mut batch = Batch::new(self.inner.registry.next_batch_id(), self.id(), files);
        let batch_id = batch.id.clone();

        let vote = self
            .inner
            .bus
            .request_vote(UploaderEvent::BatchAdd, EventPayload::Batch(batch.clone()))
            .await;
        if vote.cancelled {
            batch.state = BatchState::Cancelled;
            for item in batch.items.iter_mut() {
                item.state = ItemState::Cancelled;
            }
            tracing::info!(uploader_id = %self.id(), batch_id = %batch_id, "Batch add cancelled");
            self.inner
                .bus
                .notify(UploaderEvent::BatchCancel, EventPayload::Batch(batch))
                .await;
            return Ok(AddOutcome::Cancelled(batch_id));
        }

        let process_options = match &options {
            Some(overrides) => self.get_options().merged_with(overrides),
            None => self.get_options(),
        };

        if process_options.is_auto_upload() {
            tracing::info!(
                uploader_id = %self.id(),
                batch_id = %batch_id,
                items = batch.items.len(),
                "Batch added"
            );
            processor.process(batch, process_options).await;
            Ok(AddOutcome::Dispatched(batch_id))
        } else {
            tracing::info!(
                uploader_id = %self.id(),
                batch_id = %batch_id,
                items = batch.items.len(),
                "Batch added, waiting for upload"
            );
            self.pending().push(PendingBatch {
                batch,
                options: process_options,
            });
            Ok(AddOutcome::Pending(batch_id))
        }
    }

    /// Hand every pending batch to the processor, in add order.
    /// Returns the number of batches flushed.
    pub async fn upload(&self) -> UploaderResult<usize> {
        let processor = self.processor()?;
        let pending = std::mem::take(&mut *self.pending());
        let count = pending.len();

        for PendingBatch { batch, options } in pending {
            processor.process(batch, options).await;
        }

        if count > 0 {
            tracing::info!(uploader_id = %self.id(), batches = count, "Pending batches uploaded");
        }
        Ok(count)
    }

    /// Abort an item or batch by id, or everything with `None`. Pending
    /// batches and their items count too. Returns false when nothing matched.
    pub async fn abort(&self, id: Option<&str>) -> bool {
        let pending_aborted = self.abort_pending(id).await;
        if id.is_some() && pending_aborted {
            return true;
        }

        match self.inner.processor.get() {
            Some(processor) => processor.abort(id).await || pending_aborted,
            None => pending_aborted,
        }
    }

    /// Deep copy of the current options.
    pub fn get_options(&self) -> UploadOptions {
        self.inner
            .options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop every pending batch, firing `BATCH_CANCEL` for each.
    pub async fn clear_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending());
        let count = pending.len();

        for PendingBatch { mut batch, .. } in pending {
            batch.state = BatchState::Cancelled;
            for item in batch.items.iter_mut() {
                item.state = ItemState::Cancelled;
            }
            tracing::info!(uploader_id = %self.id(), batch_id = %batch.id, "Pending batch cleared");
            self.inner
                .bus
                .notify(UploaderEvent::BatchCancel, EventPayload::Batch(batch))
                .await;
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn on(
        &self,
        event: UploaderEvent,
        listener: Arc<dyn EventListener>,
    ) -> UploaderResult<ListenerId> {
        self.inner.bus.on(event, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.bus.off(id)
    }

    /// Handle for firing this uploader's events.
    pub fn trigger(&self) -> Trigger {
        self.inner.bus.clone()
    }

    /// Copy of the processor's queue state, if a processor is attached.
    pub fn queue_snapshot(&self) -> Option<QueueState> {
        self.inner
            .processor
            .get()
            .map(|processor| processor.queue().snapshot())
    }

    pub fn processor(&self) -> UploaderResult<&Processor> {
        self.inner
            .processor
            .get()
            .ok_or_else(|| UploaderError::ProcessorUnavailable(self.inner.id.clone()))
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<PendingBatch>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn abort_pending(&self, id: Option<&str>) -> bool {
        let (aborted, item): (Vec<Batch>, Option<(BatchItem, Option<Batch>)>) = {
            let mut pending = self.pending();
            let (matched, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|entry| id.map_or(true, |id| entry.batch.id == id));
            *pending = kept;
            let item = match id {
                Some(item_id) if matched.is_empty() => take_pending_item(&mut pending, item_id),
                _ => None,
            };
            (matched.into_iter().map(|entry| entry.batch).collect(), item)
        };

        if let Some((mut item, emptied)) = item {
            item.state = ItemState::Aborted;
            tracing::info!(uploader_id = %self.id(), item_id = %item.id, "Pending item aborted");
            self.inner
                .bus
                .notify(UploaderEvent::ItemAbort, EventPayload::Item(item))
                .await;
            if let Some(batch) = emptied {
                self.notify_batch_abort(batch).await;
            }
            return true;
        }

        let any = !aborted.is_empty();
        for mut batch in aborted {
            for item in batch.items.iter_mut() {
                item.state = ItemState::Aborted;
            }
            for item in batch.items.clone() {
                self.inner
                    .bus
                    .notify(UploaderEvent::ItemAbort, EventPayload::Item(item))
                    .await;
            }
            self.notify_batch_abort(batch).await;
        }
        any
    }

    async fn notify_batch_abort(&self, mut batch: Batch) {
        batch.state = BatchState::Aborted;
        tracing::info!(uploader_id = %self.id(), batch_id = %batch.id, "Pending batch aborted");
        self.inner
            .bus
            .notify(UploaderEvent::BatchAbort, EventPayload::Batch(batch))
            .await;
    }
}

/// Remove `item_id` from whichever held batch owns it. A batch left without
/// items is dropped and returned alongside the item.
fn take_pending_item(
    pending: &mut Vec<PendingBatch>,
    item_id: &str,
) -> Option<(BatchItem, Option<Batch>)> {
    let index = pending
        .iter()
        .position(|entry| entry.batch.contains_item(item_id))?;
    let batch = &mut pending[index].batch;
    let position = batch.items.iter().position(|item| item.id == item_id)?;
    let item = batch.items.remove(position);

    if batch.items.is_empty() {
        let entry = pending.remove(index);
        Some((item, Some(entry.batch)))
    } else {
        Some((item, None))
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("id", &self.inner.id)
            .field("pending", &self.pending_count())
            .field("processor_attached", &self.inner.processor.get().is_some())
            .finish()
    }
}

//! Batch lifecycle helpers
//!
//! Every mutation goes through [`SharedQueue::update_state`]; events are fired
//! only after the mutation is committed. Helpers that suspend on a vote
//! re-validate state when they resume, since item completions may have changed
//! it meanwhile.

use batchline_core::{Batch, BatchState, EventPayload, UploaderEvent};

use crate::state::{BatchData, SharedQueue};

pub fn is_batch_finished(queue: &SharedQueue) -> bool {
    queue.read(|state| state.is_batch_finished())
}

/// Evict the current batch once it is finished and fire `BATCH_FINISH`.
///
/// Does nothing (and leaves state untouched) while the current batch still has
/// queued or in-flight items, or when there is no current batch, which makes
/// repeated calls after a single transition harmless.
pub async fn clean_up_finished_batch(queue: &SharedQueue) -> Option<Batch> {
    if !queue.read(|state| state.is_current_batch_drained()) {
        return None;
    }

    let data = queue.update_state(|state| {
        if !state.is_current_batch_drained() {
            return None;
        }
        let batch_id = state.current_batch.clone()?;
        state.detach_batch(&batch_id)
    })?;

    let mut batch = data.batch;
    batch.state = BatchState::Finished;
    tracing::debug!(batch_id = %batch.id, items = batch.items.len(), "Batch finished");

    queue
        .trigger(UploaderEvent::BatchFinish, EventPayload::Batch(batch.clone()))
        .await;
    Some(batch)
}

pub fn is_new_batch_starting(queue: &SharedQueue, item_id: &str) -> bool {
    queue.read(|state| state.is_new_batch_starting(item_id))
}

/// Decide whether the batch owning `item_id` may start.
///
/// Resolves true at once if it already is the current batch. Otherwise fires
/// the cancellable `BATCH_START`; when allowed, the batch becomes current.
pub async fn load_new_batch_for_item(queue: &SharedQueue, item_id: &str) -> bool {
    let Some(batch) = get_batch_from_item_id(queue, item_id) else {
        tracing::debug!(item_id = %item_id, "No batch found for item");
        return false;
    };

    if queue.read(|state| state.current_batch.as_deref() == Some(batch.id.as_str())) {
        return true;
    }

    let batch_id = batch.id.clone();
    if queue
        .cancellable(UploaderEvent::BatchStart, EventPayload::Batch(batch))
        .await
    {
        tracing::info!(batch_id = %batch_id, "Batch start cancelled by listener");
        return false;
    }

    // The batch may have been cancelled or aborted while the vote was pending.
    let loaded = queue.update_state(|state| match state.batches.get_mut(&batch_id) {
        Some(data) => {
            data.batch.state = BatchState::Processing;
            state.current_batch = Some(batch_id.clone());
            true
        }
        None => false,
    });

    if loaded {
        tracing::debug!(batch_id = %batch_id, "Batch started");
    } else {
        tracing::debug!(batch_id = %batch_id, "Batch vanished while awaiting start vote");
    }
    loaded
}

/// Cancel the whole batch owning `item_id` and fire `BATCH_CANCEL`.
///
/// Every item bearing the batch id leaves `items` and the queue; the relative
/// order of the remaining queued items is preserved. The payload keeps the
/// batch's full item list.
pub async fn cancel_batch_for_item(queue: &SharedQueue, item_id: &str) -> Option<Batch> {
    let data = queue.update_state(|state| {
        let batch_id = state.items.get(item_id)?.batch_id.clone();
        state.detach_batch(&batch_id)
    })?;

    let mut batch = data.batch;
    batch.state = BatchState::Cancelled;
    tracing::info!(batch_id = %batch.id, items = batch.items.len(), "Batch cancelled");

    queue
        .trigger(UploaderEvent::BatchCancel, EventPayload::Batch(batch.clone()))
        .await;
    Some(batch)
}

pub fn get_batch_from_item_id(queue: &SharedQueue, item_id: &str) -> Option<Batch> {
    queue.read(|state| state.get_batch_from_item_id(item_id).cloned())
}

pub fn get_batch_data_from_item_id(queue: &SharedQueue, item_id: &str) -> Option<BatchData> {
    queue.read(|state| state.get_batch_data_from_item_id(item_id).cloned())
}

pub fn is_item_belongs_to_batch(queue: &SharedQueue, item_id: &str, batch_id: &str) -> bool {
    queue.read(|state| state.is_item_belongs_to_batch(item_id, batch_id))
}

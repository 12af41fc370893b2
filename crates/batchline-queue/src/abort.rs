//! Abort
//!
//! Queued items are removed from state right away. In-flight items are
//! signalled through their abort handle; the core state is consistent
//! immediately, whatever the transport eventually reports.

use std::collections::HashSet;

use batchline_core::{Batch, BatchItem, BatchState, EventPayload, ItemState, UploaderEvent};

use crate::state::{QueueState, SharedQueue};

enum ItemAbort {
    /// The item was queued and has been removed from the queue.
    Dequeued {
        item: BatchItem,
        evicted_batch: Option<Batch>,
    },
    /// The item is at the transport; its abort handle was cancelled.
    Signalled,
}

/// Abort a single item. Returns false if the item is unknown or already done.
pub async fn abort_item(queue: &SharedQueue, item_id: &str) -> bool {
    let result = queue.update_state(|state| {
        let item = state.items.get(item_id)?;
        if item.state.is_terminal() {
            return None;
        }
        let batch_id = item.batch_id.clone();

        if let Some(token) = state.abort_handles.get(item_id) {
            token.cancel();
            return Some(ItemAbort::Signalled);
        }

        state.item_queue.retain(|id| id != item_id);
        let item = state.items.get_mut(item_id)?;
        item.state = ItemState::Aborted;
        let item = item.clone();

        // A batch that never started and has nothing left to send is evicted
        // here, since it will never become current.
        let evicted_batch = if state.current_batch.as_deref() != Some(batch_id.as_str())
            && !has_pending_items(state, &batch_id)
        {
            state.detach_batch(&batch_id).map(|data| {
                let mut batch = data.batch;
                batch.state = BatchState::Aborted;
                batch
            })
        } else {
            None
        };

        Some(ItemAbort::Dequeued {
            item,
            evicted_batch,
        })
    });

    match result {
        Some(ItemAbort::Dequeued {
            item,
            evicted_batch,
        }) => {
            tracing::info!(item_id = %item.id, "Queued item aborted");
            queue
                .trigger(UploaderEvent::ItemAbort, EventPayload::Item(item))
                .await;
            if let Some(batch) = evicted_batch {
                tracing::info!(batch_id = %batch.id, "Batch aborted, no items left");
                queue
                    .trigger(UploaderEvent::BatchAbort, EventPayload::Batch(batch))
                    .await;
            }
            true
        }
        Some(ItemAbort::Signalled) => {
            tracing::info!(item_id = %item_id, "Abort signalled to in-flight item");
            true
        }
        None => {
            tracing::debug!(item_id = %item_id, "Nothing to abort for item");
            false
        }
    }
}

/// Abort a whole batch, queued and in-flight items alike.
pub async fn abort_batch(queue: &SharedQueue, batch_id: &str) -> bool {
    let Some((batch, aborted_items)) = queue.update_state(|state| {
        if !state.batches.contains_key(batch_id) {
            return None;
        }
        let aborted = mark_items_aborted(state, |item| item.batch_id == batch_id);
        let data = state.detach_batch(batch_id)?;
        let items = aborted_in_order(&data.batch, &aborted);
        Some((data.batch, items))
    }) else {
        tracing::debug!(batch_id = %batch_id, "Nothing to abort for batch");
        return false;
    };

    fire_batch_abort(queue, batch, aborted_items).await;
    true
}

/// Abort everything this queue knows about, then fire `ALL_ABORT`.
/// Returns the number of batches aborted.
pub async fn abort_all(queue: &SharedQueue) -> usize {
    let detached = queue.update_state(|state| {
        let aborted = mark_items_aborted(state, |_| true);

        let mut batch_keys: Vec<_> = state
            .batches
            .values()
            .map(|data| (data.batch.created_at, data.batch.id.clone()))
            .collect();
        batch_keys.sort();

        let detached: Vec<(Batch, Vec<BatchItem>)> = batch_keys
            .into_iter()
            .filter_map(|(_, batch_id)| {
                let data = state.detach_batch(&batch_id)?;
                let items = aborted_in_order(&data.batch, &aborted);
                Some((data.batch, items))
            })
            .collect();

        // Whatever is left references a missing batch; drop it too.
        state.items.clear();
        state.item_queue.clear();
        state.active_ids.clear();
        for (_, token) in state.abort_handles.drain() {
            token.cancel();
        }
        state.current_batch = None;
        detached
    });

    let count = detached.len();
    for (batch, items) in detached {
        fire_batch_abort(queue, batch, items).await;
    }

    tracing::info!(batches = count, "All uploads aborted");
    queue
        .trigger(UploaderEvent::AllAbort, EventPayload::None)
        .await;
    count
}

fn has_pending_items(state: &QueueState, batch_id: &str) -> bool {
    state
        .items
        .values()
        .any(|item| item.batch_id == batch_id && !item.state.is_terminal())
}

/// Mark matching unfinished items as aborted and return their ids.
fn mark_items_aborted<F>(state: &mut QueueState, filter: F) -> HashSet<String>
where
    F: Fn(&BatchItem) -> bool,
{
    state
        .items
        .values_mut()
        .filter(|item| filter(&**item) && !item.state.is_terminal())
        .map(|item| {
            item.state = ItemState::Aborted;
            item.id.clone()
        })
        .collect()
}

fn aborted_in_order(batch: &Batch, aborted: &HashSet<String>) -> Vec<BatchItem> {
    batch
        .items
        .iter()
        .filter(|item| aborted.contains(&item.id))
        .cloned()
        .collect()
}

async fn fire_batch_abort(queue: &SharedQueue, mut batch: Batch, items: Vec<BatchItem>) {
    batch.state = BatchState::Aborted;
    tracing::info!(batch_id = %batch.id, items = items.len(), "Batch aborted");

    for item in items {
        queue
            .trigger(UploaderEvent::ItemAbort, EventPayload::Item(item))
            .await;
    }
    queue
        .trigger(UploaderEvent::BatchAbort, EventPayload::Batch(batch))
        .await;
}

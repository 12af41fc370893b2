//! Shared queue state
//!
//! [`QueueState`] is the single source of truth for one uploader: known items,
//! known batches, the ordered pending-item queue and the active batch.
//! [`SharedQueue`] owns it and only hands out `&QueueState` for reads and
//! `&mut QueueState` inside [`SharedQueue::update_state`], so event listeners
//! never observe a half-applied mutation. Events are fired separately, after
//! the mutation has been committed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use batchline_core::{
    Batch, BatchItem, BatchState, EventBus, EventPayload, ItemState, UploadOptions, UploaderEvent,
};
use tokio_util::sync::CancellationToken;

/// A batch together with the options it is processed under.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchData {
    pub batch: Batch,
    pub batch_options: UploadOptions,
}

impl BatchData {
    pub fn new(batch: Batch, batch_options: UploadOptions) -> Self {
        Self {
            batch,
            batch_options,
        }
    }
}

/// Items claimed for one transport call.
#[derive(Debug, Clone)]
pub struct Claim {
    pub batch_id: String,
    pub items: Vec<BatchItem>,
    pub options: UploadOptions,
    pub abort: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct QueueState {
    pub items: HashMap<String, BatchItem>,
    pub batches: HashMap<String, BatchData>,
    /// Pending item ids in submission order. Dispatched items leave the queue.
    pub item_queue: VecDeque<String>,
    pub current_batch: Option<String>,
    /// Items handed to the transport and not yet finalized.
    pub active_ids: Vec<String>,
    pub(crate) abort_handles: HashMap<String, CancellationToken>,
    revision: u64,
}

impl QueueState {
    /// Number of committed `update_state` calls.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get_batch_from_item_id(&self, item_id: &str) -> Option<&Batch> {
        self.get_batch_data_from_item_id(item_id)
            .map(|data| &data.batch)
    }

    pub fn get_batch_data_from_item_id(&self, item_id: &str) -> Option<&BatchData> {
        let item = self.items.get(item_id)?;
        self.batches.get(&item.batch_id)
    }

    pub fn is_item_belongs_to_batch(&self, item_id: &str, batch_id: &str) -> bool {
        self.items
            .get(item_id)
            .is_some_and(|item| item.batch_id == batch_id)
    }

    /// True if the queue is empty or its head belongs to another batch than
    /// the current one. Items are enqueued batch-contiguously, so the head is
    /// enough to tell.
    pub fn is_batch_finished(&self) -> bool {
        match self.item_queue.front() {
            None => true,
            Some(head) => {
                self.items.get(head).map(|item| item.batch_id.as_str())
                    != self.current_batch.as_deref()
            }
        }
    }

    pub fn is_new_batch_starting(&self, item_id: &str) -> bool {
        self.items.get(item_id).map(|item| item.batch_id.as_str())
            != self.current_batch.as_deref()
    }

    pub fn has_active_items_for(&self, batch_id: &str) -> bool {
        self.active_ids
            .iter()
            .any(|id| self.is_item_belongs_to_batch(id, batch_id))
    }

    /// The current batch can be evicted: nothing of it left in the queue and
    /// nothing of it still at the transport.
    pub fn is_current_batch_drained(&self) -> bool {
        match self.current_batch.as_deref() {
            Some(batch_id) => self.is_batch_finished() && !self.has_active_items_for(batch_id),
            None => false,
        }
    }

    /// Register a batch, its items and their queue entries.
    pub fn enqueue_batch(&mut self, batch: Batch, batch_options: UploadOptions) {
        for item in &batch.items {
            self.items.insert(item.id.clone(), item.clone());
            self.item_queue.push_back(item.id.clone());
        }
        self.batches
            .insert(batch.id.clone(), BatchData::new(batch, batch_options));
    }

    /// Remove a batch and every item bearing its id, from `items`, the queue
    /// and the active set. Abort handles of its in-flight items are signalled.
    /// The returned batch record keeps its full item list, refreshed with the
    /// latest item states.
    pub fn detach_batch(&mut self, batch_id: &str) -> Option<BatchData> {
        let mut removed: HashMap<String, BatchItem> = HashMap::new();
        self.items.retain(|id, item| {
            if item.batch_id == batch_id {
                removed.insert(id.clone(), item.clone());
                false
            } else {
                true
            }
        });

        self.item_queue.retain(|id| !removed.contains_key(id));
        self.active_ids.retain(|id| !removed.contains_key(id));
        for id in removed.keys() {
            if let Some(token) = self.abort_handles.remove(id) {
                token.cancel();
            }
        }
        if self.current_batch.as_deref() == Some(batch_id) {
            self.current_batch = None;
        }

        let mut data = self.batches.remove(batch_id)?;
        for item in data.batch.items.iter_mut() {
            if let Some(latest) = removed.remove(&item.id) {
                *item = latest;
            }
        }
        Some(data)
    }

    /// Move the next group of queued items, starting at `item_id`, to the
    /// active set. Fails if the concurrency ceiling is reached, `item_id` is no
    /// longer the queue head or its batch is not the current one.
    pub fn claim_next_group(&mut self, item_id: &str, limit: usize) -> Option<Claim> {
        if self.active_ids.len() >= limit {
            return None;
        }
        if self.item_queue.front().map(String::as_str) != Some(item_id) {
            return None;
        }
        let batch_id = self.items.get(item_id)?.batch_id.clone();
        if self.current_batch.as_deref() != Some(batch_id.as_str()) {
            return None;
        }
        let options = self.batches.get(&batch_id)?.batch_options.clone();
        let group_size = options.group_size();

        let abort = CancellationToken::new();
        let mut items = Vec::with_capacity(group_size);
        while items.len() < group_size {
            let Some(next_id) = self.item_queue.front().cloned() else {
                break;
            };
            let Some(item) = self.items.get_mut(&next_id) else {
                break;
            };
            if item.batch_id != batch_id {
                break;
            }
            self.item_queue.pop_front();
            item.state = ItemState::Uploading;
            items.push(item.clone());
            self.active_ids.push(next_id.clone());
            self.abort_handles.insert(next_id, abort.clone());
        }

        if let Some(data) = self.batches.get_mut(&batch_id) {
            data.batch.state = BatchState::Processing;
        }

        Some(Claim {
            batch_id,
            items,
            options,
            abort,
        })
    }

    /// Take items out of the active set and record their final state.
    /// Items that are no longer known (their batch was cancelled or aborted
    /// meanwhile) are skipped.
    pub fn finalize_items(
        &mut self,
        item_ids: &[String],
        state: ItemState,
        response: Option<&serde_json::Value>,
    ) -> Vec<BatchItem> {
        let mut finalized = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            self.active_ids.retain(|active| active != id);
            self.abort_handles.remove(id);
            if let Some(item) = self.items.get_mut(id) {
                item.state = state;
                if state == ItemState::Finished {
                    item.completed = 100.0;
                }
                if response.is_some() {
                    item.upload_response = response.cloned();
                }
                finalized.push(item.clone());
            }
        }
        finalized
    }

    /// Aggregate progress of a batch from its items' latest state.
    pub fn refresh_batch_progress(&mut self, batch_id: &str) -> Option<Batch> {
        let data = self.batches.get_mut(batch_id)?;
        let count = data.batch.items.len().max(1) as f64;
        let mut completed = 0.0;
        let mut loaded = 0;
        for item in data.batch.items.iter_mut() {
            if let Some(latest) = self.items.get(&item.id) {
                *item = latest.clone();
            }
            completed += item.completed;
            loaded += item.loaded;
        }
        data.batch.completed = completed / count;
        data.batch.loaded = loaded;
        Some(data.batch.clone())
    }

    /// Check the structural invariants: the current batch exists and every
    /// queued or active id refers to a known item of a known batch.
    pub fn is_consistent(&self) -> bool {
        let current_ok = self
            .current_batch
            .as_ref()
            .map_or(true, |id| self.batches.contains_key(id));
        let refs_ok = self
            .item_queue
            .iter()
            .chain(self.active_ids.iter())
            .all(|id| {
                self.items
                    .get(id)
                    .is_some_and(|item| self.batches.contains_key(&item.batch_id))
            });
        current_ok && refs_ok
    }
}

/// Owned container for [`QueueState`] plus the bus its events go out on.
#[derive(Clone)]
pub struct SharedQueue {
    state: Arc<Mutex<QueueState>>,
    bus: Arc<dyn EventBus>,
}

impl SharedQueue {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_state(QueueState::default(), bus)
    }

    pub fn with_state(state: QueueState, bus: Arc<dyn EventBus>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            bus,
        }
    }

    /// Read the state. The closure must not block or await.
    pub fn read<R>(&self, f: impl FnOnce(&QueueState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply a batch of mutations atomically.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut state);
        state.revision += 1;
        tracing::trace!(
            revision = state.revision,
            queued = state.item_queue.len(),
            active = state.active_ids.len(),
            batches = state.batches.len(),
            "Queue state updated"
        );
        result
    }

    pub fn snapshot(&self) -> QueueState {
        self.read(QueueState::clone)
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Fire a notification.
    pub async fn trigger(&self, event: UploaderEvent, payload: EventPayload) {
        self.bus.notify(event, payload).await;
    }

    /// Fire a cancellable event. Returns true if any listener cancelled.
    pub async fn cancellable(&self, event: UploaderEvent, payload: EventPayload) -> bool {
        self.bus.request_vote(event, payload).await.cancelled
    }
}

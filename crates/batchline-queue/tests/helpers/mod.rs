//! Shared fixtures for queue tests: a recording event bus, a controllable
//! transport and small builders for batches and queue state.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use batchline_core::{
    Batch, EventBus, EventPayload, UploadInfo, UploadOptions, UploaderEvent, VoteOutcome,
};
use batchline_queue::{ItemSender, Processor, SendOutcome, SendRequest, SharedQueue};

/// Event bus that records every event and vetoes on demand.
#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<(UploaderEvent, EventPayload)>>,
    vetoes: Mutex<Vec<(UploaderEvent, Option<String>)>>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancel every vote on `event`.
    pub fn veto(&self, event: UploaderEvent) {
        self.vetoes.lock().unwrap().push((event, None));
    }

    /// Cancel votes on `event` whose payload carries `subject_id`.
    pub fn veto_subject(&self, event: UploaderEvent, subject_id: &str) {
        self.vetoes
            .lock()
            .unwrap()
            .push((event, Some(subject_id.to_string())));
    }

    pub fn events(&self) -> Vec<(UploaderEvent, EventPayload)> {
        self.events.lock().unwrap().clone()
    }

    /// Event names with their subject id, in firing order.
    pub fn timeline(&self) -> Vec<(UploaderEvent, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, payload)| (*event, payload.subject_id().unwrap_or("").to_string()))
            .collect()
    }

    pub fn payloads(&self, event: UploaderEvent) -> Vec<EventPayload> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, event: UploaderEvent) -> usize {
        self.payloads(event).len()
    }

    /// Subject ids of `event`, in firing order.
    pub fn subjects(&self, event: UploaderEvent) -> Vec<String> {
        self.payloads(event)
            .iter()
            .filter_map(|payload| payload.subject_id().map(str::to_string))
            .collect()
    }

    fn record(&self, event: UploaderEvent, payload: &EventPayload) {
        self.events.lock().unwrap().push((event, payload.clone()));
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn notify(&self, event: UploaderEvent, payload: EventPayload) {
        self.record(event, &payload);
    }

    async fn request_vote(&self, event: UploaderEvent, payload: EventPayload) -> VoteOutcome {
        self.record(event, &payload);
        let subject = payload.subject_id().map(str::to_string);
        let cancelled = self
            .vetoes
            .lock()
            .unwrap()
            .iter()
            .any(|(e, id)| *e == event && (id.is_none() || *id == subject));
        VoteOutcome {
            cancelled,
            faults: Vec::new(),
        }
    }
}

/// How the mock transport ends a send.
#[derive(Debug, Clone)]
pub enum MockResult {
    Finish(Option<serde_json::Value>),
    Fail(String),
}

/// Transport that records sends. In held mode every send waits for a
/// [`MockSender::release`] permit or for its abort handle.
pub struct MockSender {
    sends: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    result: Mutex<MockResult>,
    progress: Mutex<Option<(f64, u64)>>,
    gate: Option<Semaphore>,
}

impl MockSender {
    /// Sends complete immediately.
    pub fn instant() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Sends wait until released.
    pub fn held() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            result: Mutex::new(MockResult::Finish(Some(serde_json::json!({ "ok": true })))),
            progress: Mutex::new(None),
            gate,
        }
    }

    pub fn set_result(&self, result: MockResult) {
        *self.result.lock().unwrap() = result;
    }

    /// Report this progress once before the send resolves.
    pub fn set_progress(&self, completed: f64, loaded: u64) {
        *self.progress.lock().unwrap() = Some((completed, loaded));
    }

    /// Let `count` held sends complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Item ids of every send, in call order.
    pub fn sends(&self) -> Vec<Vec<String>> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sends().into_iter().flatten().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemSender for MockSender {
    async fn send(&self, request: SendRequest) -> anyhow::Result<SendOutcome> {
        let ids: Vec<String> = request.items.iter().map(|item| item.id.clone()).collect();
        self.sends.lock().unwrap().push(ids.clone());
        let now = self.in_flight.fetch_add(ids.len(), Ordering::SeqCst) + ids.len();
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let progress = *self.progress.lock().unwrap();
        if let Some((completed, loaded)) = progress {
            request.progress.report(completed, loaded).await;
        }

        let aborted = match &self.gate {
            Some(gate) => {
                tokio::select! {
                    _ = request.abort.cancelled() => true,
                    permit = gate.acquire() => {
                        permit?.forget();
                        false
                    }
                }
            }
            None => false,
        };

        self.in_flight.fetch_sub(ids.len(), Ordering::SeqCst);
        if aborted {
            return Ok(SendOutcome::Aborted);
        }

        let result = self.result.lock().unwrap().clone();
        match result {
            MockResult::Finish(response) => Ok(SendOutcome::Finished(response)),
            MockResult::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

pub fn batch(id: &str, files: usize) -> Batch {
    Batch::new(
        id,
        "uploader-1",
        (0..files)
            .map(|i| UploadInfo::Url(format!("https://example.com/{}/{}", id, i)))
            .collect(),
    )
}

pub fn shared_queue(bus: &Arc<RecordingBus>) -> SharedQueue {
    SharedQueue::new(bus.clone())
}

/// A queue with `batches` enqueued in order and nothing current.
pub fn queue_with(bus: &Arc<RecordingBus>, batches: Vec<Batch>) -> SharedQueue {
    let queue = shared_queue(bus);
    queue.update_state(|state| {
        for batch in batches {
            state.enqueue_batch(batch, UploadOptions::default());
        }
    });
    queue
}

pub fn processor(
    bus: &Arc<RecordingBus>,
    sender: &Arc<MockSender>,
    options: &UploadOptions,
) -> Processor {
    Processor::new("uploader-1", shared_queue(bus), sender.clone(), options)
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(description: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", description);
}

/// Give spawned sends a chance to run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Ids as owned strings, for comparisons.
pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn id_set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

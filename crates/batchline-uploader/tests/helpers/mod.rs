//! Shared fixtures for uploader tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use batchline_core::{EventListener, EventPayload, UploadInfo, UploaderEvent};
use batchline_queue::{ItemSender, SendOutcome, SendRequest};
use batchline_uploader::Uploader;

/// Listener that records every event it sees and never votes to cancel.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(UploaderEvent, EventPayload)>>,
}

impl Recorder {
    /// Subscribe a new recorder to every event of `uploader`.
    pub fn attach(uploader: &Uploader) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        for event in UploaderEvent::ALL {
            uploader
                .on(event, recorder.clone())
                .expect("every uploader event is registered");
        }
        recorder
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

    pub fn subjects(&self, event: UploaderEvent) -> Vec<String> {
        self.payloads(event)
            .iter()
            .filter_map(|payload| payload.subject_id().map(str::to_string))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl EventListener for Recorder {
    async fn handle(&self, event: UploaderEvent, payload: &EventPayload) -> anyhow::Result<bool> {
        self.events.lock().unwrap().push((event, payload.clone()));
        Ok(false)
    }
}

/// In-memory transport. Held senders wait for [`MockSender::release`].
pub struct MockSender {
    sends: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    gate: Option<Semaphore>,
}

impl MockSender {
    pub fn instant() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn held() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn sends(&self) -> Vec<Vec<String>> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sends().into_iter().flatten().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemSender for MockSender {
    async fn send(&self, request: SendRequest) -> anyhow::Result<SendOutcome> {
        let ids: Vec<String> = request.items.iter().map(|item| item.id.clone()).collect();
        self.sends.lock().unwrap().push(ids.clone());
        self.in_flight.fetch_add(ids.len(), Ordering::SeqCst);

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
            Ok(SendOutcome::Aborted)
        } else {
            Ok(SendOutcome::Finished(Some(serde_json::json!({ "sent": ids }))))
        }
    }
}

pub fn files(names: &[&str]) -> Vec<UploadInfo> {
    names
        .iter()
        .map(|name| UploadInfo::from(format!("https://example.com/{}", name).as_str()))
        .collect()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

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

pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

//! Uploader registry
//!
//! Owns the counters behind `uploader-<n>` and `batch-<n>` ids and creates
//! uploaders. Registries are independent; [`UploaderRegistry::global`] is the
//! process-wide one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use batchline_core::{Trigger, UploadOptions};
use batchline_queue::ItemSender;

use crate::uploader::Uploader;

#[derive(Default)]
struct Counters {
    uploaders: AtomicU64,
    batches: AtomicU64,
}

#[derive(Clone, Default)]
pub struct UploaderRegistry {
    counters: Arc<Counters>,
}

static GLOBAL: OnceLock<UploaderRegistry> = OnceLock::new();

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static UploaderRegistry {
        GLOBAL.get_or_init(UploaderRegistry::new)
    }

    /// Create an uploader sending through `sender`.
    pub fn create(&self, options: UploadOptions, sender: Arc<dyn ItemSender>) -> Uploader {
        self.create_with_enhancer(options, sender, |uploader, _| Some(uploader))
    }

    /// Create an uploader and hand it to `enhancer` before its processor is
    /// attached. The enhancer may register listeners, update options or
    /// return a replacement instance; `None` keeps the original.
    pub fn create_with_enhancer<E>(
        &self,
        options: UploadOptions,
        sender: Arc<dyn ItemSender>,
        enhancer: E,
    ) -> Uploader
    where
        E: FnOnce(Uploader, Trigger) -> Option<Uploader>,
    {
        let id = format!(
            "uploader-{}",
            self.counters.uploaders.fetch_add(1, Ordering::SeqCst) + 1
        );
        tracing::debug!(uploader_id = %id, "Creating uploader");

        let uploader = Uploader::new(id, self.clone(), options.with_mandatory_defaults());
        let trigger = uploader.trigger();

        let enhanced = enhancer(uploader.clone(), trigger).unwrap_or(uploader);
        enhanced.attach_processor(sender);

        tracing::info!(uploader_id = %enhanced.id(), "Uploader created");
        enhanced
    }

    pub(crate) fn next_batch_id(&self) -> String {
        format!(
            "batch-{}",
            self.counters.batches.fetch_add(1, Ordering::SeqCst) + 1
        )
    }

    /// Number of uploaders created so far.
    pub fn uploader_count(&self) -> u64 {
        self.counters.uploaders.load(Ordering::SeqCst)
    }
}

//! Batchline Core Library
//!
//! This crate provides the domain models, upload options, lifecycle events and
//! error types shared by the queue and uploader crates.

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod merge;
pub mod models;
pub mod options;

// Re-export commonly used types
pub use bus::{EventBus, LifeEvents, ListenerId, Trigger};
pub use config::UploaderConfig;
pub use error::{UploaderError, UploaderResult};
pub use events::{listener_fn, EventListener, EventPayload, UploaderEvent};
pub use gate::{collect_votes, panic_message, ListenerFault, VoteOutcome};
pub use merge::{deep_merge_value, Merge};
pub use models::{Batch, BatchItem, BatchState, FileInfo, ItemState, UploadInfo};
pub use options::{Destination, UploadOptions};

//! Batchline Queue
//!
//! Owns the per-uploader queue state, the batch lifecycle helpers and the
//! processor that hands queued items to an [`ItemSender`].

pub mod abort;
pub mod batch_helpers;
pub mod processor;
pub mod sender;
pub mod state;

pub use processor::Processor;
pub use sender::{ItemSender, ProgressReporter, SendOutcome, SendRequest};
pub use state::{BatchData, Claim, QueueState, SharedQueue};

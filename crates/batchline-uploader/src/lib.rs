//! Batchline Uploader
//!
//! Entry point of the workspace: the [`UploaderRegistry`] creates
//! [`Uploader`] instances, each with its own event bus, queue and processor.
//!
//! ```no_run
//! use std::sync::Arc;
//! use batchline_core::{UploadInfo, UploaderConfig};
//! use batchline_queue::ItemSender;
//! use batchline_uploader::{init_tracing, UploaderRegistry};
//!
//! # async fn run(sender: Arc<dyn ItemSender>) -> anyhow::Result<()> {
//! let config = UploaderConfig::from_env()?;
//! init_tracing(&config.log_filter)?;
//!
//! let uploader = UploaderRegistry::global().create(config.upload_options(), sender);
//! uploader
//!     .add(vec![UploadInfo::from("https://example.com/a.png")], None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod telemetry;
pub mod uploader;

pub use registry::UploaderRegistry;
pub use telemetry::init_tracing;
pub use uploader::{AddOutcome, Uploader};

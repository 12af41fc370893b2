//! Error types module
//!
//! Vetoed operations and unknown ids are not errors in Batchline: they surface as
//! booleans or `None`. `UploaderError` covers the few conditions a caller must
//! actually handle.

#[derive(Debug, thiserror::Error)]
pub enum UploaderError {
    #[error("Processor not attached to uploader {0}")]
    ProcessorUnavailable(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type UploaderResult<T> = Result<T, UploaderError>;

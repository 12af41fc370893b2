use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

/// A local file handed to the uploader by a UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub path: Option<PathBuf>,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: None,
            path: None,
        }
    }
}

/// What an item uploads: a file, or a URL the destination fetches itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum UploadInfo {
    File(FileInfo),
    Url(String),
}

impl UploadInfo {
    pub fn name(&self) -> &str {
        match self {
            UploadInfo::File(file) => &file.name,
            UploadInfo::Url(url) => url,
        }
    }

    /// Size in bytes when known (URLs are sized by the destination).
    pub fn size(&self) -> Option<u64> {
        match self {
            UploadInfo::File(file) => Some(file.size),
            UploadInfo::Url(_) => None,
        }
    }
}

impl From<FileInfo> for UploadInfo {
    fn from(file: FileInfo) -> Self {
        UploadInfo::File(file)
    }
}

impl From<&str> for UploadInfo {
    fn from(url: &str) -> Self {
        UploadInfo::Url(url.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Queued, waiting for dispatch.
    Added,
    Uploading,
    Finished,
    Cancelled,
    Error,
    Aborted,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Finished | ItemState::Cancelled | ItemState::Error | ItemState::Aborted
        )
    }
}

impl Display for ItemState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ItemState::Added => write!(f, "added"),
            ItemState::Uploading => write!(f, "uploading"),
            ItemState::Finished => write!(f, "finished"),
            ItemState::Cancelled => write!(f, "cancelled"),
            ItemState::Error => write!(f, "error"),
            ItemState::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub batch_id: String,
    pub state: ItemState,
    pub file: UploadInfo,
    /// Percentage (0-100) reported by the transport.
    pub completed: f64,
    pub loaded: u64,
    pub upload_response: Option<serde_json::Value>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, batch_id: impl Into<String>, file: UploadInfo) -> Self {
        Self {
            id: id.into(),
            batch_id: batch_id.into(),
            state: ItemState::Added,
            file,
            completed: 0.0,
            loaded: 0,
            upload_response: None,
        }
    }
}

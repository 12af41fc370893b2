use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::item::{BatchItem, UploadInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Adding,
    Processing,
    Finished,
    Cancelled,
    Aborted,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Finished | BatchState::Cancelled | BatchState::Aborted
        )
    }
}

impl Display for BatchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            BatchState::Adding => write!(f, "adding"),
            BatchState::Processing => write!(f, "processing"),
            BatchState::Finished => write!(f, "finished"),
            BatchState::Cancelled => write!(f, "cancelled"),
            BatchState::Aborted => write!(f, "aborted"),
        }
    }
}

/// A group of items submitted together in one `add` call.
///
/// `items` is the batch's own record of its items. It is kept when the batch is
/// removed from queue state, so listeners of terminal batch events still see
/// every item the batch carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub uploader_id: String,
    pub state: BatchState,
    pub items: Vec<BatchItem>,
    pub completed: f64,
    pub loaded: u64,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Wrap files into a new batch. Item ids are `<batch id>.item-<n>`, starting at 1.
    pub fn new(
        id: impl Into<String>,
        uploader_id: impl Into<String>,
        files: Vec<UploadInfo>,
    ) -> Self {
        let id = id.into();
        let items = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| {
                BatchItem::new(format!("{}.item-{}", id, index + 1), id.clone(), file)
            })
            .collect();

        Self {
            id,
            uploader_id: uploader_id.into(),
            state: BatchState::Adding,
            items,
            completed: 0.0,
            loaded: 0,
            created_at: Utc::now(),
        }
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn contains_item(&self, item_id: &str) -> bool {
        self.items.iter().any(|item| item.id == item_id)
    }
}

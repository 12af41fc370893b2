//! Upload options
//!
//! Every field is optional so the same type serves as full options, partial
//! `update()` payloads and per-`add()` overrides. Mandatory fields are filled
//! with defaults at uploader creation (`with_mandatory_defaults`), never rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::merge::Merge;

pub const DEFAULT_AUTO_UPLOAD: bool = true;
pub const DEFAULT_CONCURRENT: bool = false;
pub const DEFAULT_MAX_CONCURRENT: usize = 2;
pub const DEFAULT_GROUPED: bool = false;
pub const DEFAULT_MAX_GROUP_SIZE: usize = 5;
pub const DEFAULT_INPUT_FIELD_NAME: &str = "file";
pub const DEFAULT_METHOD: &str = "POST";

/// Where and how the transport sends items. Opaque to the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Destination {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

impl Merge for Destination {
    fn merge_from(&mut self, other: &Self) {
        self.url.merge_from(&other.url);
        self.method.merge_from(&other.method);
        self.headers.merge_from(&other.headers);
        self.params.merge_from(&other.params);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Dispatch added batches immediately instead of waiting for `upload()`.
    pub auto_upload: Option<bool>,
    pub concurrent: Option<bool>,
    pub max_concurrent: Option<usize>,
    /// Send several items of one batch in a single transport call.
    pub grouped: Option<bool>,
    pub max_group_size: Option<usize>,
    pub input_field_name: Option<String>,
    pub destination: Option<Destination>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    pub with_credentials: Option<bool>,
    pub force_json_response: Option<bool>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_upload(mut self, auto_upload: bool) -> Self {
        self.auto_upload = Some(auto_upload);
        self
    }

    /// Allow up to `max_concurrent` items in flight.
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.concurrent = Some(true);
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_grouping(mut self, max_group_size: usize) -> Self {
        self.grouped = Some(true);
        self.max_group_size = Some(max_group_size);
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Fill every mandatory field that is still unset with its default.
    pub fn with_mandatory_defaults(mut self) -> Self {
        self.auto_upload.get_or_insert(DEFAULT_AUTO_UPLOAD);
        self.concurrent.get_or_insert(DEFAULT_CONCURRENT);
        self.max_concurrent.get_or_insert(DEFAULT_MAX_CONCURRENT);
        self.grouped.get_or_insert(DEFAULT_GROUPED);
        self.max_group_size.get_or_insert(DEFAULT_MAX_GROUP_SIZE);
        self.input_field_name
            .get_or_insert_with(|| DEFAULT_INPUT_FIELD_NAME.to_string());
        let destination = self.destination.get_or_insert_with(Destination::default);
        destination
            .method
            .get_or_insert_with(|| DEFAULT_METHOD.to_string());
        self
    }

    pub fn is_auto_upload(&self) -> bool {
        self.auto_upload.unwrap_or(DEFAULT_AUTO_UPLOAD)
    }

    /// Maximum number of items in flight: `max_concurrent` when `concurrent`
    /// is on, otherwise one. Never zero.
    pub fn concurrency_limit(&self) -> usize {
        if self.concurrent.unwrap_or(DEFAULT_CONCURRENT) {
            self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT).max(1)
        } else {
            1
        }
    }

    /// Number of items sent per transport call.
    pub fn group_size(&self) -> usize {
        if self.grouped.unwrap_or(DEFAULT_GROUPED) {
            self.max_group_size.unwrap_or(DEFAULT_MAX_GROUP_SIZE).max(1)
        } else {
            1
        }
    }
}

impl Merge for UploadOptions {
    fn merge_from(&mut self, other: &Self) {
        self.auto_upload.merge_from(&other.auto_upload);
        self.concurrent.merge_from(&other.concurrent);
        self.max_concurrent.merge_from(&other.max_concurrent);
        self.grouped.merge_from(&other.grouped);
        self.max_group_size.merge_from(&other.max_group_size);
        self.input_field_name.merge_from(&other.input_field_name);
        match (&mut self.destination, &other.destination) {
            (Some(base), Some(overrides)) => base.merge_from(overrides),
            (None, Some(overrides)) => self.destination = Some(overrides.clone()),
            (_, None) => {}
        }
        self.params.merge_from(&other.params);
        self.with_credentials.merge_from(&other.with_credentials);
        self.force_json_response.merge_from(&other.force_json_response);
    }
}

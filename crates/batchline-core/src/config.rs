//! Configuration module
//!
//! Process-level defaults for new uploaders, read from `BATCHLINE_*` environment
//! variables (a `.env` file is honoured). Unset or unparsable values fall back
//! to the built-in defaults, as do zero limits.

use std::env;

use crate::error::UploaderError;
use crate::options::{
    Destination, UploadOptions, DEFAULT_AUTO_UPLOAD, DEFAULT_CONCURRENT, DEFAULT_GROUPED,
    DEFAULT_INPUT_FIELD_NAME, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_GROUP_SIZE,
};

const DEFAULT_LOG_FILTER: &str = "batchline=info";

#[derive(Clone, Debug)]
pub struct UploaderConfig {
    pub auto_upload: bool,
    pub concurrent: bool,
    pub max_concurrent: usize,
    pub grouped: bool,
    pub max_group_size: usize,
    pub input_field_name: String,
    pub destination_url: Option<String>,
    pub destination_method: Option<String>,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            auto_upload: DEFAULT_AUTO_UPLOAD,
            concurrent: DEFAULT_CONCURRENT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            grouped: DEFAULT_GROUPED,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            input_field_name: DEFAULT_INPUT_FIELD_NAME.to_string(),
            destination_url: None,
            destination_method: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn from_env() -> Result<Self, UploaderError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, UploaderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse_bool = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v.trim().to_lowercase())
                .and_then(|v| match v.as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(default)
        };
        let parse_limit = |key: &str, default: usize| match lookup(key)
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            Some(0) => {
                tracing::warn!(key, default, "Limit must be at least 1, using default");
                default
            }
            Some(value) => value,
            None => default,
        };

        let config = Self {
            auto_upload: parse_bool("BATCHLINE_AUTO_UPLOAD", defaults.auto_upload),
            concurrent: parse_bool("BATCHLINE_CONCURRENT", defaults.concurrent),
            max_concurrent: parse_limit("BATCHLINE_MAX_CONCURRENT", defaults.max_concurrent),
            grouped: parse_bool("BATCHLINE_GROUPED", defaults.grouped),
            max_group_size: parse_limit("BATCHLINE_MAX_GROUP_SIZE", defaults.max_group_size),
            input_field_name: lookup("BATCHLINE_INPUT_FIELD_NAME")
                .unwrap_or(defaults.input_field_name),
            destination_url: lookup("BATCHLINE_DESTINATION_URL"),
            destination_method: lookup("BATCHLINE_DESTINATION_METHOD").map(|m| m.to_uppercase()),
            log_filter: lookup("BATCHLINE_LOG").unwrap_or(defaults.log_filter),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), UploaderError> {
        if let Some(method) = &self.destination_method {
            if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(UploaderError::InvalidConfig(format!(
                    "BATCHLINE_DESTINATION_METHOD is not an HTTP method: {:?}",
                    method
                )));
            }
        }
        Ok(())
    }

    /// Options a new uploader starts from.
    pub fn upload_options(&self) -> UploadOptions {
        let destination = if self.destination_url.is_some() || self.destination_method.is_some() {
            Some(Destination {
                url: self.destination_url.clone(),
                method: self.destination_method.clone(),
                ..Default::default()
            })
        } else {
            None
        };

        UploadOptions {
            auto_upload: Some(self.auto_upload),
            concurrent: Some(self.concurrent),
            max_concurrent: Some(self.max_concurrent),
            grouped: Some(self.grouped),
            max_group_size: Some(self.max_group_size),
            input_field_name: Some(self.input_field_name.clone()),
            destination,
            ..Default::default()
        }
    }
}

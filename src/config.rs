//! Configuration types for rl-live.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transport::NONE_TRANSPORT;

/// Default model implementation kind.
pub const TABLE_MODEL: &str = "TABLE";

/// What the decision path does when the decision logger reports it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFullPolicy {
    /// Append anyway and surface the logger's error, if any.
    #[default]
    Append,
    /// Skip the append and emit a warning; the decision succeeds.
    Drop,
}

/// Configuration for a live model.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment. It is read once, during `init`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveModelConfig {
    /// Thread name prefix for the refresh runtime (default: "rl-live")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Application identifier mixed into every exploration seed (default: "")
    #[serde(default)]
    pub app_id: String,

    /// Exploration rate used before a model is loaded (default: 0.2)
    #[serde(default = "default_initial_epsilon")]
    pub initial_epsilon: f32,

    /// Name of the transport implementation (default: "NONE")
    #[serde(default = "default_model_src")]
    pub model_src: String,

    /// Name of the model implementation (default: "TABLE")
    #[serde(default = "default_model_implementation")]
    pub model_implementation: String,

    /// Interval between model refreshes in milliseconds (default: 60000)
    #[serde(default = "default_refresh_interval_ms")]
    pub model_refresh_interval_ms: u64,

    /// Backpressure policy when the decision logger is full (default: append)
    #[serde(default)]
    pub log_full_policy: LogFullPolicy,

    /// Implementation-specific settings, e.g. `file.model_path`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_prefix() -> String {
    "rl-live".to_string()
}

fn default_initial_epsilon() -> f32 {
    0.2
}

fn default_model_src() -> String {
    NONE_TRANSPORT.to_string()
}

fn default_model_implementation() -> String {
    TABLE_MODEL.to_string()
}

fn default_refresh_interval_ms() -> u64 {
    60 * 1000
}

impl Default for LiveModelConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            app_id: String::new(),
            initial_epsilon: default_initial_epsilon(),
            model_src: default_model_src(),
            model_implementation: default_model_implementation(),
            model_refresh_interval_ms: default_refresh_interval_ms(),
            log_full_policy: LogFullPolicy::default(),
            properties: BTreeMap::new(),
        }
    }
}

impl LiveModelConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an implementation-specific property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// String property, or `default` when unset.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.properties.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Integer property, or `default` when unset or unparsable.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.properties
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Float property, or `default` when unset or unparsable.
    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.properties
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Boolean property (`true`/`false`/`1`/`0`), or `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.properties.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            _ => default,
        }
    }

    /// The refresh interval, never shorter than one millisecond.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.model_refresh_interval_ms.max(1))
    }
}

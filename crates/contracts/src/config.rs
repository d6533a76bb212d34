//! BridgeConfig - Config Loader output
//!
//! Describes the complete bridge: broker connection settings, the metrics
//! sink and the subscription rules.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::Tags;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct BridgeConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Broker settings
    #[serde(default)]
    #[validate(nested)]
    pub mqtt: MqttConfig,

    /// Metrics sink (records are only logged when absent)
    #[serde(default)]
    #[validate(nested)]
    pub influxdb: Option<InfluxDbConfig>,

    /// Subscription rules
    #[serde(default, rename = "subscription")]
    #[validate(nested)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Broker settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct MqttConfig {
    /// Broker URL, e.g. `ssl://broker:8883`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// Append every inbound message to this CSV file (`-` = stdout)
    #[serde(default)]
    pub csv_log: Option<PathBuf>,

    /// Kill the process after this many seconds without any message
    #[serde(default)]
    #[validate(range(min = 1))]
    pub keepalive_secs: Option<u64>,

    /// Trust material for the broker's TLS certificate: a PEM blob or a path
    #[serde(default)]
    pub tls_server_cert: Option<String>,

    #[serde(default)]
    pub tls_server_insecure: bool,
}

impl MqttConfig {
    /// Interpret `tls_server_cert`
    pub fn trust_material(&self) -> Option<TrustMaterial> {
        self.tls_server_cert.as_deref().map(TrustMaterial::parse)
    }
}

/// Externally supplied CA material for the broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMaterial {
    /// Inline PEM blob
    Pem(String),
    /// Path to a PEM file
    Path(PathBuf),
}

impl TrustMaterial {
    const PEM_MARKER: &'static str = "-----BEGIN";

    pub fn parse(value: &str) -> Self {
        if value.trim_start().starts_with(Self::PEM_MARKER) {
            Self::Pem(value.to_string())
        } else {
            Self::Path(PathBuf::from(value))
        }
    }

    /// Load the PEM text
    pub fn load(&self) -> std::io::Result<String> {
        match self {
            Self::Pem(pem) => Ok(pem.clone()),
            Self::Path(path) => std::fs::read_to_string(path),
        }
    }
}

/// InfluxDB sink settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InfluxDbConfig {
    /// Base URL, e.g. `http://localhost:8086`
    #[validate(length(min = 1))]
    pub url: String,

    #[validate(length(min = 1))]
    pub database: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub retention_policy: Option<String>,

    /// Writer queue capacity in batches
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

/// One topic rule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscriptionConfig {
    /// Topic, optionally containing a regular expression with named groups
    #[validate(length(min = 1))]
    pub topic: String,

    /// Default measurement
    #[serde(default)]
    pub measurement: String,

    /// Static tags
    #[serde(default)]
    pub tags: Tags,

    /// Inline transform script
    #[serde(default)]
    pub script: Option<String>,

    /// Transform script file
    #[serde(default)]
    pub script_file: Option<PathBuf>,

    /// Also process retained messages
    #[serde(default)]
    pub include_retained: bool,
}

impl SubscriptionConfig {
    /// Literal subscription with the default float parser
    pub fn new(topic: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            measurement: measurement.into(),
            tags: Tags::new(),
            script: None,
            script_file: None,
            include_retained: false,
        }
    }

    /// Whether the rule uses a transform script
    pub fn is_scripted(&self) -> bool {
        self.script.is_some() || self.script_file.is_some()
    }

    /// Resolve a relative `script_file` against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(path) = self.script_file.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

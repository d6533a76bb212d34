//! Message / Record - the two ends of the bridge
//!
//! A `Message` is one inbound bus event, a `Record` is one outbound
//! measurement for the metrics sink.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag set of a record. Sorted so that encoders emit a canonical order.
pub type Tags = BTreeMap<String, String>;

/// Inbound message from the bus
///
/// Immutable once produced. Handlers that keep data beyond one dispatch
/// call must copy it (cloning is cheap, the payload is reference counted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Receive time
    pub time: DateTime<Utc>,

    /// Slash separated topic path
    pub topic: String,

    /// Raw payload
    pub payload: Bytes,

    /// Delivered from the broker's retained store rather than live traffic
    #[serde(default)]
    pub retained: bool,
}

impl Message {
    /// Create a live (non-retained) message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            time: Utc::now(),
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    /// Mark the message as retained
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }

    /// Override the receive time
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Payload as text, invalid UTF-8 sequences replaced
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Value of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v}"),
            FieldValue::Null => f.write_str("null"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

/// Outbound measurement
///
/// An empty `measurement` or empty `tags` means "not set"; parsers fill
/// them from the subscription defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub measurement: String,

    #[serde(default)]
    pub tags: Tags,

    pub value: FieldValue,
}

impl Record {
    pub fn new(measurement: impl Into<String>, tags: Tags, value: impl Into<FieldValue>) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            value: value.into(),
        }
    }

    /// Record carrying only a value
    pub fn value(value: impl Into<FieldValue>) -> Self {
        Self {
            measurement: String::new(),
            tags: Tags::new(),
            value: value.into(),
        }
    }
}

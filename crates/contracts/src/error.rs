//! Layered error definitions
//!
//! Categorized by source: config / parse / sink / source

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Message Errors =====
    /// Payload could not be turned into records
    #[error("parse error for topic '{topic}' ({measurement}): {message}")]
    Parse {
        topic: String,
        measurement: String,
        message: String,
    },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink queue is full, the batch was dropped
    #[error("sink '{sink_name}' queue full, batch dropped")]
    QueueFull { sink_name: String },

    /// Sink worker is gone
    #[error("sink '{sink_name}' is closed")]
    SinkClosed { sink_name: String },

    // ===== Source Errors =====
    /// Message source failed
    #[error("source '{source_name}' error: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create payload parse error
    pub fn parse(
        topic: impl Into<String>,
        measurement: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            topic: topic.into(),
            measurement: measurement.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create source error
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

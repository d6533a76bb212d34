//! Ingestion error types

use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Record does not have the expected number of fields
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    /// Input ended inside a quoted field
    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: u64 },

    /// Input could not be read
    #[error("failed to read {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    /// Broker settings are unusable
    #[error("invalid broker configuration: {0}")]
    BrokerConfig(String),

    /// TLS trust material could not be turned into a client config
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Broker connection failed for good
    #[error("broker connection failed: {0}")]
    Connection(String),
}

impl IngestionError {
    pub fn read(source_name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            source_name: source_name.into(),
            source,
        }
    }

    pub fn broker_config(message: impl Into<String>) -> Self {
        Self::BrokerConfig(message.into())
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;

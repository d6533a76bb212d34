//! Transform error types

use thiserror::Error;

/// Script compile and evaluation errors
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("script compile error: {0}")]
    Compile(String),

    #[error("script does not define fn parse(topic, payload)")]
    MissingEntryPoint,

    #[error("script runtime error: {0}")]
    Runtime(String),

    /// Result (or one of its elements) carries nothing to record
    #[error("no value")]
    NoValue,

    #[error("tags must be an object, got {0}")]
    TagsNotObject(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

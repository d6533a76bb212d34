//! # Ingestion
//!
//! Message sources and the message CSV codec.
//!
//! Responsibilities:
//! - Encode and decode the `time,topic,payload` message log format
//! - Replay a recorded log into any `Receiver`
//! - Bridge messages pushed through a channel into a `Receiver`
//! - Subscribe to a live MQTT broker
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{CsvReplaySource, DEFAULT_CONCURRENCY};
//! use contracts::MessageSource;
//!
//! let mut source = CsvReplaySource::open("messages.csv", DEFAULT_CONCURRENCY).await?;
//! let delivered = source.run(dispatcher).await?;
//! ```

mod channel;
pub mod csv;
mod error;
mod mqtt;
mod replay;

// Re-exports
pub use channel::ChannelSource;
pub use error::{IngestionError, Result};
pub use mqtt::{
    message_from_publish, tls_config, BrokerAddress, MqttSource, MQTT_CHANNEL_CAPACITY,
};
pub use replay::{CsvReplaySource, DEFAULT_CONCURRENCY};

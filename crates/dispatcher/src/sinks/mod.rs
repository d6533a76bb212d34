//! Sink implementations
//!
//! Contains LogWriter, InfluxSink and CsvLogger.

mod csv;
mod influx;
mod log;

pub use self::csv::{CsvLogger, LOG_QUEUE_CAPACITY};
pub use self::influx::{encode_batch, InfluxSink};
pub use self::log::LogWriter;

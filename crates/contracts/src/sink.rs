//! RecordSink trait - asynchronous writer backend
//!
//! Sinks run on a dedicated worker task behind a bounded queue, so a slow
//! backend never stalls message dispatch.

use chrono::{DateTime, Utc};

use crate::{ContractError, Record};

/// Records queued together by one `Writer::write` call
#[derive(Debug, Clone)]
pub struct RecordBatch {
    /// Time the batch was enqueued, used as the point timestamp
    pub time: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            time: Utc::now(),
            records,
        }
    }
}

/// Record output trait
///
/// All asynchronous sink implementations must implement this trait.
#[trait_variant::make(RecordSink: Send)]
pub trait LocalRecordSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one batch
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

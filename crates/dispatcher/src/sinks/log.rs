//! LogWriter - logs records via tracing instead of storing them
//!
//! Used for dry runs, replays and when no InfluxDB is configured.

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{ContractError, Record, Tags, Writer};
use tracing::info;

/// Writer that logs every record
#[derive(Debug)]
pub struct LogWriter {
    name: String,
    records: AtomicU64,
}

impl LogWriter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records logged so far
    pub fn record_count(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

/// `k='v' k2='v2'`
fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}='{v}'"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Writer for LogWriter {
    fn write(&self, records: Vec<Record>) -> Result<(), ContractError> {
        for record in &records {
            info!(
                sink = %self.name,
                measurement = %record.measurement,
                value = %record.value,
                tags = %format_tags(&record.tags),
                "record"
            );
        }
        self.records
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

//! Bridge metrics
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! every call is a no-op.

use metrics::{counter, gauge};

/// Why a subscription dropped a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Retained message on a subscription that excludes them
    Retained,
    /// Topic failed the subscription's regex
    Unmatched,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Retained => "retained",
            DropReason::Unmatched => "unmatched",
        }
    }
}

/// Message entered the dispatcher
pub fn record_message_received() {
    counter!("mqlux_messages_received_total").increment(1);
}

/// Message reached no handler at all
pub fn record_message_unrouted() {
    counter!("mqlux_messages_unrouted_total").increment(1);
}

/// Subscription discarded a message before parsing
pub fn record_message_dropped(subscription: &str, reason: DropReason) {
    counter!(
        "mqlux_messages_dropped_total",
        "subscription" => subscription.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_parse_failure(measurement: &str) {
    counter!(
        "mqlux_parse_failures_total",
        "measurement" => measurement.to_string()
    )
    .increment(1);
}

pub fn record_write_failure(measurement: &str) {
    counter!(
        "mqlux_write_failures_total",
        "measurement" => measurement.to_string()
    )
    .increment(1);
}

/// Records handed to the writer
pub fn record_records_written(measurement: &str, count: usize) {
    counter!(
        "mqlux_records_written_total",
        "measurement" => measurement.to_string()
    )
    .increment(count as u64);
}

/// Batch outcome inside a sink worker
pub fn record_batch_flushed(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mqlux_sink_batches_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Batch rejected because the sink queue was full
pub fn record_batch_dropped(sink_name: &str) {
    counter!(
        "mqlux_sink_batches_dropped_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
}

pub fn record_sink_queue_len(sink_name: &str, len: usize) {
    gauge!(
        "mqlux_sink_queue_len",
        "sink" => sink_name.to_string()
    )
    .set(len as f64);
}

/// Message line dropped by the CSV logger
pub fn record_csv_log_dropped() {
    counter!("mqlux_csv_log_dropped_total").increment(1);
}

/// Seconds since the last message, as seen by the watchdog
pub fn record_watchdog_silence(secs: f64) {
    gauge!("mqlux_watchdog_silence_seconds").set(secs);
}

//! WriterHandle - runs a sink behind a bounded queue on its own task
//!
//! Dispatch calls `Writer::write` synchronously; the handle turns that into
//! a non-blocking enqueue so a slow sink never stalls message handling.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{ContractError, Record, RecordBatch, RecordSink, Writer};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct WriterHandle {
    /// Sink name
    name: String,
    /// Channel to send batches to worker
    tx: mpsc::Sender<RecordBatch>,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl WriterHandle {
    /// Create a new WriterHandle and spawn the worker task
    pub fn spawn<S: RecordSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();

        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Enqueue a batch without waiting
    pub fn try_send(&self, batch: RecordBatch) -> Result<(), ContractError> {
        match self.tx.try_send(batch) {
            Ok(()) => {
                let queued = self.tx.max_capacity() - self.tx.capacity();
                self.metrics.set_queue_len(queued);
                observability::record_sink_queue_len(&self.name, queued);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(b)) => {
                self.metrics.inc_dropped_count();
                observability::record_batch_dropped(&self.name);
                warn!(
                    sink = %self.name,
                    records = b.records.len(),
                    "Queue full, batch dropped"
                );
                Err(ContractError::QueueFull {
                    sink_name: self.name.clone(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                Err(ContractError::SinkClosed {
                    sink_name: self.name.clone(),
                })
            }
        }
    }

    /// Shutdown the sink worker gracefully
    ///
    /// Queued batches are written before the sink is flushed and closed.
    #[instrument(name = "writer_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        // Drop sender to signal worker to stop
        drop(self.tx);
        // Wait for worker to finish
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "WriterHandle shutdown complete");
    }
}

impl Writer for WriterHandle {
    fn write(&self, records: Vec<Record>) -> Result<(), ContractError> {
        if records.is_empty() {
            return Ok(());
        }
        self.try_send(RecordBatch::new(records))
    }
}

/// Worker task that consumes batches and writes to sink
#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn sink_worker<S: RecordSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<RecordBatch>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "Sink worker started");

    while let Some(batch) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match sink.write(&batch).await {
            Ok(()) => {
                metrics.inc_write_count();
                observability::record_batch_flushed(&name, true);
            }
            Err(e) => {
                metrics.inc_failure_count();
                observability::record_batch_flushed(&name, false);
                error!(
                    sink = %name,
                    records = batch.records.len(),
                    error = %e,
                    "Write failed"
                );
                // Continue processing - don't crash on single failure
            }
        }
    }

    // Cleanup
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    debug!(sink = %name, "Sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::{sleep, Duration};

    /// Mock sink for testing
    struct MockSink {
        name: String,
        record_count: Arc<AtomicU64>,
        closed: Arc<AtomicU64>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                record_count: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicU64::new(0)),
                should_fail: false,
                delay_ms: 0,
            }
        }
    }

    impl RecordSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.record_count
                .fetch_add(batch.records.len() as u64, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_handle_basic() {
        let sink = MockSink::new("test");
        let record_count = Arc::clone(&sink.record_count);
        let closed = Arc::clone(&sink.closed);

        let handle = WriterHandle::spawn(sink, 10);

        for i in 0..5 {
            handle
                .write(vec![Record::value(i as f64), Record::value(true)])
                .unwrap();
        }

        handle.shutdown().await;
        assert_eq!(record_count.load(Ordering::Relaxed), 10);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_empty_write_is_noop() {
        let handle = WriterHandle::spawn(MockSink::new("empty"), 1);
        for _ in 0..5 {
            assert!(handle.write(Vec::new()).is_ok());
        }
        assert_eq!(handle.metrics().dropped_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_writer_handle_queue_full() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 100;

        // Small queue capacity
        let handle = WriterHandle::spawn(sink, 2);

        let mut rejected = 0;
        for i in 0..10 {
            if let Err(e) = handle.write(vec![Record::value(i as f64)]) {
                assert!(matches!(e, ContractError::QueueFull { .. }));
                rejected += 1;
            }
        }

        assert!(rejected > 0);
        assert_eq!(handle.metrics().dropped_count(), rejected);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_writer_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;

        let handle = WriterHandle::spawn(sink, 10);

        for i in 0..3 {
            handle.write(vec![Record::value(i as f64)]).unwrap();
        }

        // Give worker time to process
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.metrics().failure_count(), 3);

        handle.shutdown().await;
    }
}

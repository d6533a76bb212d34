//! CsvLogger - appends every received message to a CSV log
//!
//! Writes happen on a background task. Messages that arrive while the queue
//! is full are dropped and counted.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{Message, Receiver};
use ingestion::csv::encode_message;

/// Messages buffered between dispatch and the writer task
pub const LOG_QUEUE_CAPACITY: usize = 64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Message logger registered on the global wildcard
pub struct CsvLogger {
    name: String,
    worker: Mutex<Option<(mpsc::Sender<Message>, JoinHandle<u64>)>>,
    dropped: AtomicU64,
}

impl CsvLogger {
    /// Append to `path` (created if missing), `-` writes to stdout.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == "-" {
            return Ok(Self::new("stdout", tokio::io::stdout()));
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(path.display().to_string(), file))
    }

    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        let writer: BoxedWriter = Box::new(writer);
        let handle = tokio::spawn(log_worker(writer, rx, name.clone()));

        Self {
            name,
            worker: Mutex::new(Some((tx, handle))),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write out queued messages and stop the writer task.
    ///
    /// Returns the number of messages written. Later calls return 0.
    #[instrument(name = "csv_logger_stop", skip(self), fields(log = %self.name))]
    pub async fn stop(&self) -> u64 {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some((tx, handle)) = worker else {
            return 0;
        };
        drop(tx);
        match handle.await {
            Ok(written) => written,
            Err(e) => {
                error!(log = %self.name, error = %e, "log writer task failed");
                0
            }
        }
    }
}

impl Receiver for CsvLogger {
    fn receive(&self, message: &Message) {
        let guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some((tx, _)) = guard.as_ref() else {
            return;
        };
        if tx.try_send(message.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            observability::record_csv_log_dropped();
            warn!(log = %self.name, topic = %message.topic, "log queue full, message dropped");
        }
    }
}

async fn log_worker(mut writer: BoxedWriter, mut rx: mpsc::Receiver<Message>, name: String) -> u64 {
    let mut written = 0u64;
    while let Some(message) = rx.recv().await {
        let line = encode_message(&message);
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => written += 1,
            Err(e) => error!(log = %name, error = %e, "failed to write message log"),
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(log = %name, error = %e, "log writer shutdown failed");
    }
    written
}

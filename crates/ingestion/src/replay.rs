//! CsvReplaySource - feeds recorded messages back into the dispatcher
//!
//! Reads the format written by the CSV message logger. Deliveries run on
//! the blocking pool with a bounded number in flight, so message order is
//! only preserved with a concurrency of 1.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use contracts::{ContractError, Message, MessageSource, Receiver};

use crate::csv::{decode_message, is_incomplete, parse_fields, MESSAGE_FIELDS};
use crate::error::{IngestionError, Result};

/// Deliveries in flight when replaying a file
pub const DEFAULT_CONCURRENCY: usize = 32;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Message source backed by a CSV message log
pub struct CsvReplaySource {
    name: String,
    lines: Lines<BufReader<BoxedReader>>,
    line_no: u64,
    concurrency: usize,
}

impl CsvReplaySource {
    /// Open a log file, `-` reads stdin.
    pub async fn open(path: impl AsRef<Path>, concurrency: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == "-" {
            return Ok(Self::from_reader("stdin", tokio::io::stdin(), concurrency));
        }
        let name = path.display().to_string();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestionError::read(&name, e))?;
        Ok(Self::from_reader(name, file, concurrency))
    }

    pub fn from_reader(
        name: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        concurrency: usize,
    ) -> Self {
        let reader: BoxedReader = Box::new(reader);
        Self {
            name: name.into(),
            lines: BufReader::new(reader).lines(),
            line_no: 0,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Next complete record, joining lines of multi-line quoted fields.
    async fn next_record(&mut self) -> Result<Option<(u64, Vec<String>)>> {
        let mut record = String::new();
        let mut first_line = 0;
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| IngestionError::read(&self.name, e))?;
            let Some(line) = line else {
                if record.is_empty() {
                    return Ok(None);
                }
                return Err(IngestionError::UnterminatedQuote { line: first_line });
            };
            self.line_no += 1;

            if record.is_empty() {
                if line.trim().is_empty() {
                    continue;
                }
                first_line = self.line_no;
                record = line;
            } else {
                record.push('\n');
                record.push_str(&line);
            }

            if !is_incomplete(&record) {
                return Ok(Some((first_line, parse_fields(&record))));
            }
        }
    }

    /// Next message, stamped with the epoch when its time is unreadable.
    async fn next_message(&mut self) -> Result<Option<Message>> {
        let Some((line, fields)) = self.next_record().await? else {
            return Ok(None);
        };
        if fields.len() != MESSAGE_FIELDS {
            return Err(IngestionError::FieldCount {
                line,
                expected: MESSAGE_FIELDS,
                found: fields.len(),
            });
        }

        match decode_message(fields) {
            Ok(message) => Ok(Some(message)),
            Err((message, e)) => {
                error!(
                    source_name = %self.name,
                    line,
                    topic = %message.topic,
                    error = %e,
                    "invalid timestamp"
                );
                metrics::counter!("mqlux_replay_invalid_timestamps_total").increment(1);
                Ok(Some(message))
            }
        }
    }

    /// Deliver every record to `receiver`, at most `concurrency` at a time.
    #[instrument(
        name = "csv_replay",
        skip(self, receiver),
        fields(source_name = %self.name, concurrency = self.concurrency)
    )]
    pub async fn replay(&mut self, receiver: Arc<dyn Receiver>) -> Result<u64> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut delivered = 0u64;

        let outcome = loop {
            let message = match self.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break Ok(());
            };
            let receiver = Arc::clone(&receiver);
            tasks.spawn_blocking(move || {
                receiver.receive(&message);
                drop(permit);
            });
            delivered += 1;

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(source_name = %self.name, error = %e, "delivery task failed");
                }
            }
        };

        // in-flight deliveries finish even when reading failed
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(source_name = %self.name, error = %e, "delivery task failed");
            }
        }

        outcome?;
        info!(source_name = %self.name, delivered, lines = self.line_no, "replay finished");
        Ok(delivered)
    }
}

impl MessageSource for CsvReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, receiver: Arc<dyn Receiver>) -> std::result::Result<u64, ContractError> {
        debug!(source_name = %self.name, "replay started");
        self.replay(receiver)
            .await
            .map_err(|e| ContractError::source(&self.name, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Message>>);

    impl Receiver for Collect {
        fn receive(&self, message: &Message) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    fn source(text: &'static str, concurrency: usize) -> CsvReplaySource {
        CsvReplaySource::from_reader("test", text.as_bytes(), concurrency)
    }

    #[tokio::test]
    async fn test_replay_in_order() {
        let collect = Arc::new(Collect::default());
        let mut src = source(
            "2020-09-13T12:26:40Z,/a/1,1\n\
             \n\
             2020-09-13T12:26:41Z,/a/2,\"x,y\"\n\
             2020-09-13T12:26:42Z,/a/3,\"multi\n\
             line\"\n",
            1,
        );

        let delivered = src.run(collect.clone()).await.unwrap();
        assert_eq!(delivered, 3);

        let seen = collect.0.lock().unwrap();
        let topics: Vec<_> = seen.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["/a/1", "/a/2", "/a/3"]);
        assert_eq!(seen[1].payload_str(), "x,y");
        assert_eq!(seen[2].payload_str(), "multi\nline");
        assert_eq!(seen[0].time, Utc.with_ymd_and_hms(2020, 9, 13, 12, 26, 40).unwrap());
        assert!(!seen[0].retained);
    }

    #[tokio::test]
    async fn test_replay_concurrent_delivers_all() {
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&format!("2020-01-01T00:00:00Z,/n/{i},{i}\n"));
        }
        let collect = Arc::new(Collect::default());
        let mut src = CsvReplaySource::from_reader("many", std::io::Cursor::new(text), 32);

        assert_eq!(src.run(collect.clone()).await.unwrap(), 200);
        assert_eq!(collect.0.lock().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_invalid_timestamp_uses_epoch() {
        let collect = Arc::new(Collect::default());
        let mut src = source("not-a-time,/a,1\n", 1);

        assert_eq!(src.run(collect.clone()).await.unwrap(), 1);
        assert_eq!(collect.0.lock().unwrap()[0].time, DateTime::<Utc>::default());
    }

    #[tokio::test]
    async fn test_wrong_field_count_fails() {
        let collect = Arc::new(Collect::default());
        let mut src = source(
            "2020-01-01T00:00:00Z,/a,1\n2020-01-01T00:00:00Z,/a\n2020-01-01T00:00:00Z,/b,2\n",
            1,
        );

        let err = src.replay(collect.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            IngestionError::FieldCount { line: 2, expected: 3, found: 2 }
        ));
        // the record before the bad line was still delivered
        assert_eq!(collect.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unterminated_quote_fails() {
        let mut src = source("2020-01-01T00:00:00Z,/a,\"open\n", 1);
        let err = src.run(Arc::new(Collect::default())).await.unwrap_err();
        assert!(matches!(err, ContractError::Source { .. }));
    }

    #[tokio::test]
    async fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2020-01-01T00:00:00Z,/file,3.5").unwrap();
        file.flush().unwrap();

        let collect = Arc::new(Collect::default());
        let mut src = CsvReplaySource::open(file.path(), DEFAULT_CONCURRENCY)
            .await
            .unwrap();
        assert_eq!(src.concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(src.run(collect.clone()).await.unwrap(), 1);
        assert_eq!(collect.0.lock().unwrap()[0].payload_str(), "3.5");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = CsvReplaySource::open("/nonexistent/messages.csv", 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestionError::Read { .. }));
    }
}

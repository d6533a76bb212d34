//! InfluxSink - writes batches to InfluxDB (1.x HTTP API)
//!
//! Every record becomes one point with a single field `value`, stamped with
//! the time its batch was enqueued.

use std::fmt::Write as _;
use std::time::Duration;

use tracing::{debug, instrument};

use contracts::{ContractError, FieldValue, InfluxDbConfig, Record, RecordBatch, RecordSink};

use crate::DispatcherError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sink posting line protocol to `/write`
pub struct InfluxSink {
    name: String,
    http: reqwest::Client,
    write_url: String,
    database: String,
    retention_policy: Option<String>,
    credentials: Option<(String, Option<String>)>,
}

impl InfluxSink {
    pub fn new(name: impl Into<String>, config: &InfluxDbConfig) -> Result<Self, DispatcherError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatcherError::sink_creation(&name, e.to_string()))?;

        Ok(Self {
            write_url: format!("{}/write", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            retention_policy: config.retention_policy.clone().filter(|rp| !rp.is_empty()),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            name,
            http,
        })
    }
}

impl RecordSink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "influx_sink_write",
        skip(self, batch),
        fields(sink = %self.name, records = batch.records.len())
    )]
    async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
        let body = encode_batch(batch);
        if body.is_empty() {
            return Ok(());
        }

        let mut query = vec![("db", self.database.as_str()), ("precision", "ns")];
        if let Some(rp) = &self.retention_policy {
            query.push(("rp", rp.as_str()));
        }

        let mut request = self.http.post(&self.write_url).query(&query).body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ContractError::sink_write(
                &self.name,
                format!("InfluxDB HTTP {status}: {}", text.trim()),
            ));
        }
        debug!(sink = %self.name, "batch written");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        // every batch is sent immediately
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "InfluxSink closed");
        Ok(())
    }
}

/// Line protocol for a batch, one line per record.
///
/// Records with a null or non-finite value are skipped.
pub fn encode_batch(batch: &RecordBatch) -> String {
    let timestamp = batch.time.timestamp_nanos_opt().unwrap_or_default();
    let mut out = String::new();
    for record in &batch.records {
        if let Some(line) = encode_record(record, timestamp) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&line);
        }
    }
    out
}

fn encode_record(record: &Record, timestamp: i64) -> Option<String> {
    let value = match &record.value {
        FieldValue::Null => return None,
        FieldValue::Float(v) if !v.is_finite() => return None,
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::String(v) => format!("\"{}\"", escape_string(v)),
    };

    let mut line = escape_measurement(&record.measurement);
    for (key, val) in &record.tags {
        // empty tag values are rejected by the server
        if key.is_empty() || val.is_empty() {
            continue;
        }
        let _ = write!(line, ",{}={}", escape_tag(key), escape_tag(val));
    }
    let _ = write!(line, " value={value} {timestamp}");
    Some(line)
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

fn escape_tag(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape_string(s: &str) -> String {
    escape(s, &['"', '\\'])
}

/// Line breaks become a literal `\n` / `\r`; a raw one would end the point.
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => {
                if special.contains(&c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out
}

//! Subscription - one configured topic rule
//!
//! Message handling: match -> retained filter -> tags -> parse -> write. Every
//! step may end the handling of a message; failures are logged and counted,
//! never propagated.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use contracts::{Message, Parser, Receiver, Tags, Writer};
use observability::DropReason;

use crate::metrics::{SubscriptionMetrics, SubscriptionSnapshot};
use crate::topic::TopicPattern;

pub struct Subscription {
    pattern: TopicPattern,
    measurement: String,
    tags: Tags,
    parser: Arc<dyn Parser>,
    writer: Arc<dyn Writer>,
    include_retained: bool,
    metrics: SubscriptionMetrics,
}

impl Subscription {
    pub fn new(
        pattern: TopicPattern,
        measurement: impl Into<String>,
        tags: Tags,
        parser: Arc<dyn Parser>,
        writer: Arc<dyn Writer>,
    ) -> Self {
        Self {
            pattern,
            measurement: measurement.into(),
            tags,
            parser,
            writer,
            include_retained: false,
            metrics: SubscriptionMetrics::new(),
        }
    }

    /// Also process retained messages
    pub fn with_retained(mut self, include_retained: bool) -> Self {
        self.include_retained = include_retained;
        self
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn metrics(&self) -> SubscriptionSnapshot {
        self.metrics.snapshot()
    }

    fn drop_message(&self, message: &Message, reason: DropReason) {
        match reason {
            DropReason::Retained => self.metrics.inc_dropped_retained(),
            DropReason::Unmatched => self.metrics.inc_dropped_unmatched(),
        }
        observability::record_message_dropped(self.pattern.pattern(), reason);
        trace!(
            topic = %message.topic,
            pattern = %self.pattern.pattern(),
            reason = reason.as_str(),
            "message dropped"
        );
    }
}

impl Receiver for Subscription {
    fn receive(&self, message: &Message) {
        self.metrics.inc_received();

        // the router only knows the broker-level topic
        if !self.pattern.matches(&message.topic) {
            self.drop_message(message, DropReason::Unmatched);
            return;
        }

        if message.retained && !self.include_retained {
            self.drop_message(message, DropReason::Retained);
            return;
        }

        let Some(tags) = self.pattern.tags(&message.topic, &self.tags) else {
            self.drop_message(message, DropReason::Unmatched);
            return;
        };

        let records = match self.parser.parse(message, &self.measurement, &tags) {
            Ok(records) => records,
            Err(e) => {
                self.metrics.inc_parse_failures();
                observability::record_parse_failure(&self.measurement);
                warn!(
                    topic = %message.topic,
                    measurement = %self.measurement,
                    error = %e,
                    "parse failed"
                );
                return;
            }
        };

        if records.is_empty() {
            debug!(topic = %message.topic, "parser produced no records");
            return;
        }

        let count = records.len();
        match self.writer.write(records) {
            Ok(()) => {
                self.metrics.add_records_written(count);
                observability::record_records_written(&self.measurement, count);
            }
            Err(e) => {
                self.metrics.inc_write_failures();
                observability::record_write_failure(&self.measurement);
                warn!(
                    topic = %message.topic,
                    measurement = %self.measurement,
                    records = count,
                    error = %e,
                    "write failed"
                );
            }
        }
    }
}

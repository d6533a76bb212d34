//! # Dispatcher
//!
//! Message routing and delivery.
//!
//! Responsibilities:
//! - Match topics against subscription patterns (`TopicPattern`, `Router`)
//! - Parse matched messages into records and hand them to a `Writer`
//! - Isolate slow sinks behind a bounded queue (`WriterHandle`)
//! - Log raw messages and watch for broker silence

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod router;
pub mod sinks;
pub mod subscription;
pub mod topic;
pub mod watchdog;

pub use contracts::{Message, Receiver, Record, Writer};
pub use dispatcher::{create_dispatcher, Dispatcher};
pub use error::DispatcherError;
pub use handle::WriterHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics, SubscriptionMetrics, SubscriptionSnapshot};
pub use router::Router;
pub use sinks::{encode_batch, CsvLogger, InfluxSink, LogWriter};
pub use subscription::Subscription;
pub use topic::{non_regex_topic, split_topic, TopicPattern, WILDCARD};
pub use watchdog::{Watchdog, WatchdogExpired, WATCHDOG_EXIT_CODE};

//! Dispatcher - routes inbound messages to subscriptions

use std::sync::Arc;

use tracing::{info, instrument, trace};

use contracts::{Message, Parser, Receiver, SubscriptionConfig, Writer};
use transform::{FloatParser, ScriptTransform};

use crate::error::DispatcherError;
use crate::metrics::SubscriptionSnapshot;
use crate::router::Router;
use crate::subscription::Subscription;
use crate::topic::{split_topic, TopicPattern};

/// Routes every message to the handlers registered for its topic
#[derive(Default)]
pub struct Dispatcher {
    router: Router<Arc<dyn Receiver>>,
    subscriptions: Vec<Arc<Subscription>>,
    topics: Vec<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription under its broker-level topic
    pub fn add_subscription(&mut self, subscription: Subscription) {
        let subscription = Arc::new(subscription);
        let topic = subscription.pattern().subscribe_topic().to_string();
        self.subscriptions.push(Arc::clone(&subscription));
        self.add_receiver(&topic, subscription);
    }

    /// Register an auxiliary handler (watchdog, message logger) under a
    /// broker-level topic such as `#`
    pub fn add_receiver(&mut self, topic: &str, receiver: Arc<dyn Receiver>) {
        self.router.add(split_topic(topic), receiver);
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_string());
        }
    }

    /// Distinct broker-level topics, in registration order
    pub fn subscribe_topics(&self) -> &[String] {
        &self.topics
    }

    pub fn subscriptions(&self) -> &[Arc<Subscription>] {
        &self.subscriptions
    }

    /// Per-subscription counters keyed by configured pattern
    pub fn metrics(&self) -> Vec<(String, SubscriptionSnapshot)> {
        self.subscriptions
            .iter()
            .map(|s| (s.pattern().pattern().to_string(), s.metrics()))
            .collect()
    }

    /// Counters summed over all subscriptions
    pub fn totals(&self) -> SubscriptionSnapshot {
        let mut total = SubscriptionSnapshot::default();
        for sub in &self.subscriptions {
            total += sub.metrics();
        }
        total
    }
}

impl Receiver for Dispatcher {
    fn receive(&self, message: &Message) {
        observability::record_message_received();
        if self.router.deliver(message) == 0 {
            observability::record_message_unrouted();
            trace!(topic = %message.topic, "no handler for topic");
        }
    }
}

/// Build the parser of one configured subscription
fn build_parser(config: &SubscriptionConfig) -> Result<Arc<dyn Parser>, DispatcherError> {
    if let Some(source) = &config.script {
        let script = ScriptTransform::compile(source)
            .map_err(|e| DispatcherError::transform(&config.topic, e))?;
        return Ok(Arc::new(script));
    }
    if let Some(path) = &config.script_file {
        let script = ScriptTransform::from_file(path)
            .map_err(|e| DispatcherError::transform(&config.topic, e))?;
        return Ok(Arc::new(script));
    }
    Ok(Arc::new(FloatParser))
}

/// Compile configured subscriptions into a dispatcher
///
/// Any invalid pattern or script aborts construction.
#[instrument(
    name = "dispatcher_create",
    skip(subscriptions, writer),
    fields(subscriptions = subscriptions.len())
)]
pub fn create_dispatcher(
    subscriptions: &[SubscriptionConfig],
    writer: Arc<dyn Writer>,
) -> Result<Dispatcher, DispatcherError> {
    let mut dispatcher = Dispatcher::new();
    for config in subscriptions {
        let pattern = TopicPattern::new(&config.topic)?;
        let parser = build_parser(config)?;
        info!(
            topic = %config.topic,
            subscribe = %pattern.subscribe_topic(),
            regex = pattern.is_regex(),
            scripted = config.is_scripted(),
            measurement = %config.measurement,
            "subscription registered"
        );
        let subscription = Subscription::new(
            pattern,
            config.measurement.clone(),
            config.tags.clone(),
            parser,
            Arc::clone(&writer),
        )
        .with_retained(config.include_retained);
        dispatcher.add_subscription(subscription);
    }
    Ok(dispatcher)
}

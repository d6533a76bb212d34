//! ChannelSource - messages pushed in by another task
//!
//! The seam a broker client plugs into: its callback sends into the
//! channel, the source delivers them one by one in arrival order.

use std::sync::Arc;

use async_channel::{bounded, Receiver as ChannelReceiver, Sender};
use tracing::{debug, error, instrument};

use contracts::{ContractError, Message, MessageSource, Receiver};

/// Message source fed through an async channel
pub struct ChannelSource {
    name: String,
    rx: ChannelReceiver<Message>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>, rx: ChannelReceiver<Message>) -> Self {
        Self {
            name: name.into(),
            rx,
        }
    }

    /// Bounded channel and the source draining it.
    ///
    /// The source finishes once every sender is dropped.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Sender<Message>, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        (tx, Self::new(name, rx))
    }
}

impl MessageSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "channel_source_run", skip(self, receiver), fields(source_name = %self.name))]
    async fn run(&mut self, receiver: Arc<dyn Receiver>) -> Result<u64, ContractError> {
        let mut delivered = 0u64;
        while let Ok(message) = self.rx.recv().await {
            let receiver = Arc::clone(&receiver);
            let joined = tokio::task::spawn_blocking(move || receiver.receive(&message)).await;
            if let Err(e) = joined {
                error!(source_name = %self.name, error = %e, "delivery task failed");
                continue;
            }
            delivered += 1;
        }
        debug!(source_name = %self.name, delivered, "channel closed");
        Ok(delivered)
    }
}

//! MessageSource trait - inbound message stream abstraction
//!
//! Decouples the dispatcher from any concrete broker client. A live broker
//! connection, a replay file and a test harness all drive the same
//! `Receiver`.

use std::sync::Arc;

use crate::{ContractError, Receiver};

/// Inbound message source
///
/// # Example
///
/// ```ignore
/// let mut source = CsvReplaySource::open("messages.csv", 32).await?;
/// let delivered = source.run(dispatcher.clone()).await?;
/// ```
#[trait_variant::make(MessageSource: Send)]
pub trait LocalMessageSource {
    /// Source name (used for logging)
    fn name(&self) -> &str;

    /// Deliver every message to `receiver` until the source is exhausted.
    ///
    /// Returns the number of delivered messages.
    async fn run(&mut self, receiver: Arc<dyn Receiver>) -> Result<u64, ContractError>;
}

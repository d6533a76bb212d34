//! Parser / Writer / Receiver - the synchronous dispatch seams
//!
//! All three are called on the dispatching task and must be safe to call
//! from several tasks at once (replay runs deliveries concurrently).

use std::sync::Arc;

use crate::{ContractError, Message, Record, Tags};

/// Converts one message into zero or more records.
///
/// `measurement` and `tags` are the subscription defaults; a parser may
/// override them per record.
pub trait Parser: Send + Sync {
    fn parse(
        &self,
        message: &Message,
        measurement: &str,
        tags: &Tags,
    ) -> Result<Vec<Record>, ContractError>;
}

impl<F> Parser for F
where
    F: Fn(&Message, &str, &Tags) -> Result<Vec<Record>, ContractError> + Send + Sync,
{
    fn parse(
        &self,
        message: &Message,
        measurement: &str,
        tags: &Tags,
    ) -> Result<Vec<Record>, ContractError> {
        self(message, measurement, tags)
    }
}

/// Writes records to the metrics sink.
///
/// An empty slice must be accepted as a no-op.
pub trait Writer: Send + Sync {
    fn write(&self, records: Vec<Record>) -> Result<(), ContractError>;
}

impl<F> Writer for F
where
    F: Fn(Vec<Record>) -> Result<(), ContractError> + Send + Sync,
{
    fn write(&self, records: Vec<Record>) -> Result<(), ContractError> {
        self(records)
    }
}

/// Takes and processes one incoming message.
pub trait Receiver: Send + Sync {
    fn receive(&self, message: &Message);
}

impl<R: Receiver + ?Sized> Receiver for Arc<R> {
    fn receive(&self, message: &Message) {
        (**self).receive(message)
    }
}

//! FloatParser - default parser for unscripted subscriptions

use contracts::{ContractError, Message, Parser, Record, Tags};

/// Parses the whole payload as one float.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatParser;

impl Parser for FloatParser {
    fn parse(
        &self,
        message: &Message,
        measurement: &str,
        tags: &Tags,
    ) -> Result<Vec<Record>, ContractError> {
        let payload = message.payload_str();
        let value: f64 = payload.trim().parse().map_err(|e| {
            ContractError::parse(
                &message.topic,
                measurement,
                format!("payload {:?} is not a float: {e}", payload.as_ref()),
            )
        })?;
        Ok(vec![Record::new(measurement, tags.clone(), value)])
    }
}

//! Message CSV codec
//!
//! One message per record: `time,topic,payload`, time in RFC 3339 with
//! second precision. Quoting follows RFC 4180, so payloads may contain
//! commas, quotes and line breaks.

use chrono::{DateTime, SecondsFormat, Utc};

use contracts::Message;

/// Fields per message record
pub const MESSAGE_FIELDS: usize = 3;

/// Encode a message as one CSV record, terminated by `\n`.
pub fn encode_message(message: &Message) -> String {
    let time = message.time.to_rfc3339_opts(SecondsFormat::Secs, true);
    let payload = message.payload_str();
    let mut line = encode_fields(&[&time, &message.topic, &payload]);
    line.push('\n');
    line
}

/// Build a message from decoded fields.
///
/// An invalid timestamp is reported as `Err` together with the message,
/// stamped with the Unix epoch, so callers can log and still deliver it.
pub fn decode_message(fields: Vec<String>) -> Result<Message, (Message, chrono::ParseError)> {
    let mut fields = fields.into_iter();
    let time = fields.next().unwrap_or_default();
    let topic = fields.next().unwrap_or_default();
    let payload = fields.next().unwrap_or_default();

    let message = Message::new(topic, payload);
    match DateTime::parse_from_rfc3339(time.trim()) {
        Ok(t) => Ok(message.at(t.with_timezone(&Utc))),
        Err(e) => Err((message.at(DateTime::<Utc>::default()), e)),
    }
}

/// Join fields into one record, quoting where needed.
pub fn encode_fields(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if needs_quotes(field) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out
}

fn needs_quotes(field: &str) -> bool {
    field.starts_with([' ', '\t']) || field.contains([',', '"', '\r', '\n'])
}

/// Whether `record` ends inside a quoted field (needs more lines).
pub fn is_incomplete(record: &str) -> bool {
    // escaped quotes come in pairs, so an odd count means an open field
    record.bytes().filter(|b| *b == b'"').count() % 2 == 1
}

/// Split one complete record into fields.
pub fn parse_fields(record: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = record.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}

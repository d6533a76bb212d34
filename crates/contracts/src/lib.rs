//! # Contracts
//!
//! Frozen interface contracts shared by every mqlux crate: the message and
//! record data model, the parser/writer/receiver seams and the configuration
//! schema. Business crates depend on this crate only, never on each other's
//! internals.
//!
//! ## Data flow
//! broker -> `Receiver::receive(Message)` -> `Parser` -> `Vec<Record>` -> `Writer`

mod config;
mod error;
mod handler;
mod message;
mod sink;
mod source;

pub use config::*;
pub use error::*;
pub use handler::{Parser, Receiver, Writer};
pub use message::{FieldValue, Message, Record, Tags};
pub use sink::{LocalRecordSink, RecordBatch, RecordSink};
pub use source::{LocalMessageSource, MessageSource};

//! # Transform
//!
//! Payload parsers used by subscriptions.
//!
//! - `FloatParser`: payload is a single number
//! - `ScriptTransform`: payload is handed to a user supplied Rhai script

mod error;
mod float;
mod script;

pub use error::TransformError;
pub use float::FloatParser;
pub use script::ScriptTransform;

//! Bridge Protocol Definitions
//!
//! This crate defines the event messages exchanged between the simulation and
//! the bridge, the framing used on the event socket, and the fixed response
//! strings the simulation relies on.

pub mod codec;
pub mod messages;

pub use codec::{EventCodec, Framing};
pub use messages::*;

/// Default maximum size of a single event message (64KB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Response sent when a message is not well-formed JSON
pub const RESPONSE_INVALID_JSON: &str = "Invalid JSON data";

/// Response sent when a JSON message is missing or mistypes a required field
pub const RESPONSE_INVALID_DATA: &str = "Invalid data";

/// Response sent when no handler is registered for the event type
pub const RESPONSE_UNKNOWN_EVENT: &str = "Unknown event type";

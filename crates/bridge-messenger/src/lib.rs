//! Outbound messaging to the simulation
//!
//! Generated text is pushed to the simulation as OSC messages carried in UDP
//! datagrams. Delivery is fire-and-forget; only local send failures are
//! reported.

pub mod messenger;
pub mod osc;

pub use messenger::{MessengerError, OutboundMessenger};
pub use osc::{OscArg, OscError, OscMessage};

/// Address used for generated dialogue lines
pub const DIALOGUE_ADDRESS: &str = "/dialogue";

/// Port the simulation listens on for OSC messages by default
pub const DEFAULT_OSC_PORT: u16 = 54321;

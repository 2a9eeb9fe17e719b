//! Event server
//!
//! Accepts event messages from the simulation on a local TCP socket,
//! dispatches them to the handler registered for their kind and writes one
//! response string per message.

pub mod dispatch;
pub mod handlers;
pub mod server;

pub use dispatch::{DispatchTable, EventHandler, HandlerError};
pub use handlers::{DialogueHandler, ThoughtHandler, DEFAULT_MAX_AGENTS, DEFAULT_THOUGHTS};
pub use server::{process_message, EventServer, ServerConfig, ServerError};

//! Chat-completion client for the inference endpoint
//!
//! The endpoint is reached on a local port, usually through the SSH tunnel
//! managed by `bridge-tunnel`.

pub mod client;
pub mod config;
pub mod history;

pub use client::{InferenceClient, InferenceError};
pub use config::InferenceConfig;
pub use history::{ChatMessage, ConversationHistory, Role};
